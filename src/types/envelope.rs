//! Polymorphic ("oneOf") envelopes.
//!
//! The control plane type-erases union-typed values behind a generic
//! envelope: a discriminator plus an opaque payload. This module resolves
//! such envelopes into closed Rust enums and back.
//!
//! # Wire Shape
//!
//! ```json
//! { "$objectType": "datapolicies.v4.config.LinearRetention", "$value": { "local": 3 } }
//! ```
//!
//! Discriminators are usually type names, but some unions are keyed by small
//! integers. Both forms compare by exact value; anything outside the declared
//! set is [`EnvelopeError::UnknownVariant`], never a silent default.
//!
//! # Implementing a Union
//!
//! A union is a Rust enum implementing [`OneOf`]. The `decode_variant`
//! implementation must be a single exhaustive `match` on the discriminator so
//! that adding a variant forces the decode table to be updated.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::types::entity::EntityRecord;
use crate::types::task::{TaskReference, TaskSnapshot};

/// Discriminator of a polymorphic value: a type name or an integer code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Discriminator {
    /// Integer-keyed variant.
    Code(i64),
    /// Name-keyed variant.
    Name(String),
}

impl fmt::Display for Discriminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "{code}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

impl From<&str> for Discriminator {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for Discriminator {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<i64> for Discriminator {
    fn from(code: i64) -> Self {
        Self::Code(code)
    }
}

/// Errors raised while moving data between an envelope and a concrete type.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The discriminator is outside the union's declared set.
    #[error("unknown {union} variant: {discriminator}")]
    UnknownVariant {
        /// Name of the union being decoded.
        union: &'static str,
        /// The raw discriminator, kept for diagnostics.
        discriminator: Discriminator,
    },

    /// The envelope decoded to a valid variant, just not the one the
    /// caller needed (e.g. an entity where a task reference was expected).
    #[error("expected {expected}, found {found}")]
    UnexpectedVariant {
        /// The discriminator the caller expected.
        expected: &'static str,
        /// The discriminator actually present.
        found: Discriminator,
    },

    /// The discriminator was recognized but the payload does not fit it.
    #[error("invalid {union} payload for {discriminator}: {source}")]
    Payload {
        /// Name of the union being decoded.
        union: &'static str,
        /// The recognized discriminator.
        discriminator: Discriminator,
        /// Underlying deserialization failure.
        #[source]
        source: serde_json::Error,
    },

    /// A concrete value could not be serialized into a payload.
    #[error("failed to encode {union} payload: {source}")]
    Encode {
        /// Name of the union being encoded.
        union: &'static str,
        /// Underlying serialization failure.
        #[source]
        source: serde_json::Error,
    },
}

/// A closed union that can be carried inside a [`PolymorphicValue`].
pub trait OneOf: Sized {
    /// Name of the union, used in diagnostics.
    const UNION: &'static str;

    /// Discriminator of this value's variant.
    fn discriminator(&self) -> Discriminator;

    /// Resolves `payload` to the variant selected by `discriminator`.
    ///
    /// # Errors
    ///
    /// [`EnvelopeError::UnknownVariant`] for a discriminator outside the
    /// declared set, [`EnvelopeError::Payload`] when the payload does not
    /// match the selected shape.
    fn decode_variant(discriminator: &Discriminator, payload: Value) -> Result<Self, EnvelopeError>;

    /// Serializes the variant's native payload, without the discriminator.
    ///
    /// # Errors
    ///
    /// [`EnvelopeError::Encode`] if the payload cannot be serialized.
    fn encode_payload(&self) -> Result<Value, EnvelopeError>;

    /// Builds the [`EnvelopeError::UnknownVariant`] for this union.
    fn unknown(discriminator: &Discriminator) -> EnvelopeError {
        EnvelopeError::UnknownVariant {
            union: Self::UNION,
            discriminator: discriminator.clone(),
        }
    }
}

/// Deserializes the payload of a recognized variant.
///
/// # Errors
///
/// [`EnvelopeError::Payload`] when `payload` does not fit `T`.
pub fn decode_payload<T: DeserializeOwned>(
    union: &'static str,
    discriminator: &Discriminator,
    payload: Value,
) -> Result<T, EnvelopeError> {
    serde_json::from_value(payload).map_err(|source| EnvelopeError::Payload {
        union,
        discriminator: discriminator.clone(),
        source,
    })
}

/// Serializes the payload of a variant.
///
/// # Errors
///
/// [`EnvelopeError::Encode`] when `value` cannot be serialized.
pub fn encode_payload<T: Serialize>(
    union: &'static str,
    value: &T,
) -> Result<Value, EnvelopeError> {
    serde_json::to_value(value).map_err(|source| EnvelopeError::Encode { union, source })
}

/// Generic envelope: a discriminator and an opaque payload.
///
/// # Examples
///
/// ```
/// use prism_tasks::types::envelope::PolymorphicValue;
/// use prism_tasks::types::retention::{LinearRetention, ScheduleRetention};
///
/// let retention = ScheduleRetention::Linear(LinearRetention { local: 3, remote: None });
/// let envelope = PolymorphicValue::encode(&retention).unwrap();
/// assert_eq!(
///     envelope.object_type.to_string(),
///     "datapolicies.v4.config.LinearRetention"
/// );
///
/// let back: ScheduleRetention = envelope.decode().unwrap();
/// assert_eq!(back, retention);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolymorphicValue {
    /// Variant selector.
    #[serde(rename = "$objectType")]
    pub object_type: Discriminator,

    /// Variant payload, opaque until decoded.
    #[serde(rename = "$value", default)]
    pub payload: Value,
}

impl PolymorphicValue {
    /// Creates an envelope from raw parts.
    pub fn new(object_type: impl Into<Discriminator>, payload: Value) -> Self {
        Self {
            object_type: object_type.into(),
            payload,
        }
    }

    /// Wraps a concrete value, writing its discriminator and payload.
    ///
    /// # Errors
    ///
    /// [`EnvelopeError::Encode`] if the payload cannot be serialized.
    pub fn encode<T: OneOf>(value: &T) -> Result<Self, EnvelopeError> {
        Ok(Self {
            object_type: value.discriminator(),
            payload: value.encode_payload()?,
        })
    }

    /// Resolves the envelope into a variant of `T`.
    ///
    /// # Errors
    ///
    /// See [`OneOf::decode_variant`].
    pub fn decode<T: OneOf>(&self) -> Result<T, EnvelopeError> {
        T::decode_variant(&self.object_type, self.payload.clone())
    }

    /// Like [`decode`](Self::decode), consuming the envelope.
    ///
    /// # Errors
    ///
    /// See [`OneOf::decode_variant`].
    pub fn into_decoded<T: OneOf>(self) -> Result<T, EnvelopeError> {
        T::decode_variant(&self.object_type, self.payload)
    }
}

/// Discriminator of a task reference returned by every mutation.
pub const TASK_REFERENCE_TYPE: &str = "prism.v4.config.TaskReference";

/// Discriminator of a task status document.
pub const TASK_TYPE: &str = "prism.v4.config.Task";

/// Discriminator of a single entity.
pub const ENTITY_TYPE: &str = "common.v1.config.Entity";

/// Discriminator of an entity collection.
pub const ENTITY_LIST_TYPE: &str = "List<common.v1.config.Entity>";

/// Payload of the top-level response envelope.
///
/// Which variant appears depends on the call: mutations answer with a task
/// reference, task lookups with a task, reads with an entity or a list.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseData {
    /// Handle to a background task.
    TaskReference(TaskReference),
    /// Status of a background task.
    Task(TaskSnapshot),
    /// A single entity.
    Entity(EntityRecord),
    /// A collection of entities.
    EntityList(Vec<EntityRecord>),
}

impl OneOf for ResponseData {
    const UNION: &'static str = "ResponseData";

    fn discriminator(&self) -> Discriminator {
        let name = match self {
            Self::TaskReference(_) => TASK_REFERENCE_TYPE,
            Self::Task(_) => TASK_TYPE,
            Self::Entity(_) => ENTITY_TYPE,
            Self::EntityList(_) => ENTITY_LIST_TYPE,
        };
        Discriminator::from(name)
    }

    fn decode_variant(
        discriminator: &Discriminator,
        payload: Value,
    ) -> Result<Self, EnvelopeError> {
        let Discriminator::Name(name) = discriminator else {
            return Err(Self::unknown(discriminator));
        };
        match name.as_str() {
            TASK_REFERENCE_TYPE => {
                decode_payload(Self::UNION, discriminator, payload).map(Self::TaskReference)
            },
            TASK_TYPE => decode_payload(Self::UNION, discriminator, payload).map(Self::Task),
            ENTITY_TYPE => decode_payload(Self::UNION, discriminator, payload).map(Self::Entity),
            ENTITY_LIST_TYPE => {
                decode_payload(Self::UNION, discriminator, payload).map(Self::EntityList)
            },
            _ => Err(Self::unknown(discriminator)),
        }
    }

    fn encode_payload(&self) -> Result<Value, EnvelopeError> {
        match self {
            Self::TaskReference(reference) => encode_payload(Self::UNION, reference),
            Self::Task(task) => encode_payload(Self::UNION, task),
            Self::Entity(entity) => encode_payload(Self::UNION, entity),
            Self::EntityList(entities) => encode_payload(Self::UNION, entities),
        }
    }
}

/// Metadata attached to a response envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    /// Total size of a collection, for list responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_available_results: Option<u64>,
}

/// Top-level response envelope returned by every remote call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    /// Type-erased payload, see [`ResponseData`].
    pub data: PolymorphicValue,

    /// Optional response metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResponseMetadata>,
}

impl ApiResponse {
    /// Wraps `data` in a response envelope.
    ///
    /// # Errors
    ///
    /// [`EnvelopeError::Encode`] if the payload cannot be serialized.
    pub fn new(data: &ResponseData) -> Result<Self, EnvelopeError> {
        Ok(Self {
            data: PolymorphicValue::encode(data)?,
            metadata: None,
        })
    }

    /// Decodes the payload into whichever variant it carries.
    ///
    /// # Errors
    ///
    /// See [`OneOf::decode_variant`].
    pub fn decode(&self) -> Result<ResponseData, EnvelopeError> {
        self.data.decode()
    }

    /// Decodes the payload, requiring a task reference.
    ///
    /// # Errors
    ///
    /// [`EnvelopeError::UnexpectedVariant`] for any other variant, plus the
    /// errors of [`decode`](Self::decode).
    pub fn into_task_reference(self) -> Result<TaskReference, EnvelopeError> {
        match self.data.into_decoded()? {
            ResponseData::TaskReference(reference) => Ok(reference),
            other => Err(unexpected(TASK_REFERENCE_TYPE, &other)),
        }
    }

    /// Decodes the payload, requiring a task status document.
    ///
    /// # Errors
    ///
    /// [`EnvelopeError::UnexpectedVariant`] for any other variant, plus the
    /// errors of [`decode`](Self::decode).
    pub fn into_task(self) -> Result<TaskSnapshot, EnvelopeError> {
        match self.data.into_decoded()? {
            ResponseData::Task(task) => Ok(task),
            other => Err(unexpected(TASK_TYPE, &other)),
        }
    }

    /// Decodes the payload, requiring a single entity.
    ///
    /// # Errors
    ///
    /// [`EnvelopeError::UnexpectedVariant`] for any other variant, plus the
    /// errors of [`decode`](Self::decode).
    pub fn into_entity(self) -> Result<EntityRecord, EnvelopeError> {
        match self.data.into_decoded()? {
            ResponseData::Entity(entity) => Ok(entity),
            other => Err(unexpected(ENTITY_TYPE, &other)),
        }
    }

    /// Decodes the payload, requiring an entity collection.
    ///
    /// # Errors
    ///
    /// [`EnvelopeError::UnexpectedVariant`] for any other variant, plus the
    /// errors of [`decode`](Self::decode).
    pub fn into_entity_list(self) -> Result<Vec<EntityRecord>, EnvelopeError> {
        match self.data.into_decoded()? {
            ResponseData::EntityList(entities) => Ok(entities),
            other => Err(unexpected(ENTITY_LIST_TYPE, &other)),
        }
    }
}

fn unexpected(expected: &'static str, found: &ResponseData) -> EnvelopeError {
    EnvelopeError::UnexpectedVariant {
        expected,
        found: found.discriminator(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::task::TaskHandle;
    use serde_json::json;

    #[test]
    fn discriminator_accepts_names_and_codes() {
        let name: Discriminator = serde_json::from_value(json!("prism.v4.config.Task")).unwrap();
        assert_eq!(name, Discriminator::from(TASK_TYPE));

        let code: Discriminator = serde_json::from_value(json!(5)).unwrap();
        assert_eq!(code, Discriminator::Code(5));
        assert_eq!(code.to_string(), "5");
    }

    #[test]
    fn response_decodes_task_reference() {
        let response: ApiResponse = serde_json::from_value(json!({
            "data": {
                "$objectType": TASK_REFERENCE_TYPE,
                "$value": { "extId": "task-1" }
            }
        }))
        .unwrap();

        let reference = response.into_task_reference().unwrap();
        assert_eq!(reference.ext_id, TaskHandle::from("task-1"));
    }

    #[test]
    fn response_with_unknown_type_is_rejected() {
        let response = ApiResponse {
            data: PolymorphicValue::new("prism.v9.config.Mystery", json!({})),
            metadata: None,
        };
        let err = response.decode().unwrap_err();
        assert!(matches!(
            err,
            EnvelopeError::UnknownVariant { union: "ResponseData", .. }
        ));
        assert!(err.to_string().contains("prism.v9.config.Mystery"));
    }

    #[test]
    fn response_with_numeric_discriminator_is_rejected() {
        let response = ApiResponse {
            data: PolymorphicValue::new(3, json!({})),
            metadata: None,
        };
        assert!(matches!(
            response.decode(),
            Err(EnvelopeError::UnknownVariant { discriminator: Discriminator::Code(3), .. })
        ));
    }

    #[test]
    fn wrong_variant_reports_what_was_found() {
        let response = ApiResponse::new(&ResponseData::EntityList(vec![])).unwrap();
        let err = response.into_task_reference().unwrap_err();
        match err {
            EnvelopeError::UnexpectedVariant { expected, found } => {
                assert_eq!(expected, TASK_REFERENCE_TYPE);
                assert_eq!(found, Discriminator::from(ENTITY_LIST_TYPE));
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn payload_mismatch_is_a_payload_error() {
        let response = ApiResponse {
            data: PolymorphicValue::new(TASK_REFERENCE_TYPE, json!({ "extId": 42 })),
            metadata: None,
        };
        assert!(matches!(
            response.decode(),
            Err(EnvelopeError::Payload { .. })
        ));
    }
}
