//! Remote control plane collaborator.
//!
//! The [`ControlPlane`] trait is the only way the orchestration core talks to
//! the outside world. Transport, authentication and per-resource endpoint
//! mapping live behind it.
//!
//! # Contract
//!
//! - [`submit_mutation`](ControlPlane::submit_mutation) answers with a task
//!   reference envelope, or fails before any task exists.
//! - [`get_task`](ControlPlane::get_task) answers with a task envelope.
//!   Once a task is terminal, every later fetch must report the same
//!   terminal status.
//! - [`read_entity`](ControlPlane::read_entity) carries the entity tag in
//!   the `ETag` response header.
//! - A write whose `If-Match` tag differs from the entity's current tag
//!   must be rejected with [`RemoteError::PreconditionFailed`].

pub mod memory;

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::tag::EntityTag;
use crate::types::entity::{EntityKind, EntityRef};
use crate::types::envelope::ApiResponse;
use crate::types::task::TaskHandle;

/// Kind of mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Create a new entity.
    Create,
    /// Modify an existing entity.
    Update,
    /// Remove an existing entity.
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// An outgoing write.
///
/// Not `Clone`: an attached [`EntityTag`] is consumed by exactly one request.
#[derive(Debug)]
pub struct MutationRequest {
    /// Requested operation.
    pub operation: Operation,
    /// Kind of the entity being written.
    pub kind: EntityKind,
    /// Identifier of the entity, for updates and deletes.
    pub target: Option<String>,
    /// Owning entity, for sub-resources created under a parent.
    pub parent: Option<EntityRef>,
    /// Request body.
    pub payload: Value,
    /// Precondition tag, sent as `If-Match`.
    pub if_match: Option<EntityTag>,
}

impl MutationRequest {
    /// A top-level create.
    pub fn create(kind: EntityKind, payload: Value) -> Self {
        Self {
            operation: Operation::Create,
            kind,
            target: None,
            parent: None,
            payload,
            if_match: None,
        }
    }

    /// A create of a sub-resource under `parent`.
    pub fn create_child(parent: EntityRef, kind: EntityKind, payload: Value) -> Self {
        Self {
            parent: Some(parent),
            ..Self::create(kind, payload)
        }
    }

    /// An update of `target`.
    pub fn update(target: EntityRef, payload: Value) -> Self {
        Self {
            operation: Operation::Update,
            kind: target.kind,
            target: Some(target.ext_id),
            parent: None,
            payload,
            if_match: None,
        }
    }

    /// A delete of `target`.
    pub fn delete(target: EntityRef) -> Self {
        Self {
            operation: Operation::Delete,
            kind: target.kind,
            target: Some(target.ext_id),
            parent: None,
            payload: Value::Null,
            if_match: None,
        }
    }

    /// The entity whose tag guards this request: the target for updates and
    /// deletes, the parent for sub-resource creates.
    pub fn guarded_entity(&self) -> Option<EntityRef> {
        match (&self.target, &self.parent) {
            (Some(ext_id), _) => Some(EntityRef::new(self.kind.clone(), ext_id.clone())),
            (None, Some(parent)) => Some(parent.clone()),
            (None, None) => None,
        }
    }

    /// The attached precondition tag, if any.
    pub fn precondition(&self) -> Option<&str> {
        self.if_match.as_ref().map(EntityTag::as_str)
    }
}

/// Response to a read: headers plus the decoded-later body.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadResponse {
    /// Response headers.
    pub headers: HashMap<String, String>,
    /// Response body.
    pub body: ApiResponse,
}

impl ReadResponse {
    /// Creates a response with no headers.
    pub fn new(body: ApiResponse) -> Self {
        Self {
            headers: HashMap::new(),
            body,
        }
    }

    /// Adds a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Looks up a header, ignoring ASCII case of the name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Errors reported by a [`ControlPlane`].
///
/// # Examples
///
/// ```
/// use prism_tasks::remote::RemoteError;
///
/// let err = RemoteError::PreconditionFailed {
///     target: "pp-1".to_string(),
///     message: "If-Match etag-1 does not match etag-2".to_string(),
/// };
/// assert!(err.to_string().contains("pp-1"));
/// ```
#[derive(Debug)]
pub enum RemoteError {
    /// The addressed entity or task does not exist.
    NotFound {
        /// What was looked up.
        what: String,
    },

    /// The attached entity tag does not match the server's current tag.
    PreconditionFailed {
        /// Entity the write addressed.
        target: String,
        /// Message reported by the server.
        message: String,
    },

    /// The server rejected the request body.
    Validation {
        /// Message reported by the server.
        message: String,
    },

    /// Network, protocol or server-side failure.
    Transport {
        /// Human-readable description.
        message: String,
        /// Underlying error, if available. Accessible via
        /// [`std::error::Error::source()`].
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl RemoteError {
    /// A transport failure wrapping `source`.
    pub fn transport(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { what } => write!(f, "not found: {what}"),
            Self::PreconditionFailed { target, message } => {
                write!(f, "precondition failed for {target}: {message}")
            },
            Self::Validation { message } => write!(f, "validation error: {message}"),
            Self::Transport { message, .. } => write!(f, "transport error: {message}"),
        }
    }
}

impl std::error::Error for RemoteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport {
                source: Some(src), ..
            } => Some(src.as_ref()),
            _ => None,
        }
    }
}

/// The remote API the orchestration core drives.
///
/// Implementations must be `Send + Sync`; one instance is shared by every
/// orchestration call.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Submits a write and returns the task reference envelope.
    ///
    /// # Errors
    ///
    /// - [`RemoteError::PreconditionFailed`] if `If-Match` is stale.
    /// - [`RemoteError::Validation`] if the payload is rejected.
    /// - [`RemoteError::NotFound`] if the target does not exist.
    /// - [`RemoteError::Transport`] on I/O failures.
    async fn submit_mutation(&self, request: MutationRequest) -> Result<ApiResponse, RemoteError>;

    /// Fetches the current status of a task.
    ///
    /// # Errors
    ///
    /// - [`RemoteError::NotFound`] if the handle is unknown.
    /// - [`RemoteError::Transport`] on I/O failures.
    async fn get_task(&self, handle: &TaskHandle) -> Result<ApiResponse, RemoteError>;

    /// Reads a single entity, including its `ETag` header.
    ///
    /// # Errors
    ///
    /// - [`RemoteError::NotFound`] if the entity does not exist.
    /// - [`RemoteError::Transport`] on I/O failures.
    async fn read_entity(&self, target: &EntityRef) -> Result<ReadResponse, RemoteError>;

    /// Lists the sub-resources of `kind` under `parent`.
    ///
    /// # Errors
    ///
    /// - [`RemoteError::NotFound`] if the parent does not exist.
    /// - [`RemoteError::Transport`] on I/O failures.
    async fn list_children(
        &self,
        parent: &EntityRef,
        kind: &EntityKind,
    ) -> Result<ApiResponse, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn remote_error_display() {
        let err = RemoteError::NotFound {
            what: "task t-1".to_string(),
        };
        assert_eq!(err.to_string(), "not found: task t-1");

        let err = RemoteError::Validation {
            message: "name is required".to_string(),
        };
        assert_eq!(err.to_string(), "validation error: name is required");
    }

    #[test]
    fn transport_error_exposes_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = RemoteError::transport("connection lost", io);
        assert_eq!(err.to_string(), "transport error: connection lost");
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "reset");

        let err = RemoteError::NotFound {
            what: "x".to_string(),
        };
        assert!(std::error::Error::source(&err).is_none());
    }

    #[test]
    fn guarded_entity_follows_operation() {
        let vm = EntityRef::new("vmm:ahv:config:vm", "vm-1");

        let update = MutationRequest::update(vm.clone(), json!({}));
        assert_eq!(update.guarded_entity(), Some(vm.clone()));

        let child = MutationRequest::create_child(
            vm.clone(),
            EntityKind::from("vmm:ahv:config:vm:disk"),
            json!({}),
        );
        assert_eq!(child.guarded_entity(), Some(vm));

        let create =
            MutationRequest::create(EntityKind::from("networking:config:subnet"), json!({}));
        assert_eq!(create.guarded_entity(), None);
    }

    #[test]
    fn header_lookup_ignores_case() {
        let body =
            ApiResponse::new(&crate::types::envelope::ResponseData::EntityList(vec![])).unwrap();
        let response = ReadResponse::new(body).with_header("etag", "etag-3");
        assert_eq!(response.header("ETag"), Some("etag-3"));
        assert_eq!(response.header("If-Match"), None);
    }
}
