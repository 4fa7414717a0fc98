//! Task wire types and the terminal completion record.
//!
//! A mutation answers with a [`TaskReference`]; the task service answers
//! status fetches with a [`TaskSnapshot`]. Once a snapshot carries a terminal
//! [`TaskStatus`], it is frozen into a [`CompletionRecord`].
//!
//! # Status Encoding
//!
//! The task service reports status either as a name (`"RUNNING"`) or as a
//! small integer code. Both are accepted; the snapshot keeps the raw
//! [`Discriminator`] so that an unrecognized value surfaces as
//! [`EnvelopeError::UnknownVariant`] instead of a generic payload error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::types::entity::EntityKind;
use crate::types::envelope::{
    decode_payload, encode_payload, Discriminator, EnvelopeError, OneOf, PolymorphicValue,
};

/// Lifecycle status of a background task.
///
/// # State Machine
///
/// ```text
/// QUEUED | PENDING | RUNNING -> any status
/// SUCCEEDED                  -> SUCCEEDED (terminal)
/// FAILED                     -> FAILED (terminal)
/// CANCELED                   -> CANCELED (terminal)
/// ```
///
/// # Examples
///
/// ```
/// use prism_tasks::TaskStatus;
///
/// let status = TaskStatus::from_code(3).unwrap();
/// assert_eq!(status, TaskStatus::Running);
/// assert!(status.is_pending());
/// assert!(status.can_transition_to(&TaskStatus::Succeeded));
/// assert!(!TaskStatus::Failed.can_transition_to(&TaskStatus::Running));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Discriminator", into = "Discriminator")]
pub enum TaskStatus {
    /// Accepted, waiting for a worker.
    Queued,
    /// Accepted, not yet scheduled.
    Pending,
    /// Executing.
    Running,
    /// Completed successfully (terminal).
    Succeeded,
    /// Completed with an error (terminal).
    Failed,
    /// Aborted before completion (terminal).
    Canceled,
}

impl TaskStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 6] = [
        Self::Queued,
        Self::Pending,
        Self::Running,
        Self::Succeeded,
        Self::Failed,
        Self::Canceled,
    ];

    /// Name of the status union, used in decode errors.
    pub const UNION: &'static str = "TaskStatus";

    /// Returns `true` for `QUEUED`, `PENDING` and `RUNNING`.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Queued | Self::Pending | Self::Running)
    }

    /// Returns `true` for `SUCCEEDED`, `FAILED` and `CANCELED`.
    pub fn is_terminal(&self) -> bool {
        !self.is_pending()
    }

    /// Returns `true` only for `SUCCEEDED`.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Returns `true` for `FAILED` and `CANCELED`.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Canceled)
    }

    /// Returns `true` if a poll that saw `self` may next see `next`.
    ///
    /// Pending statuses may move anywhere, including back to another pending
    /// status. A terminal status may only be observed again unchanged.
    pub fn can_transition_to(&self, next: &Self) -> bool {
        if self.is_pending() {
            return true;
        }
        self == next
    }

    /// Wire code of this status. `PENDING` has no numeric form.
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Queued => Some(2),
            Self::Pending => None,
            Self::Running => Some(3),
            Self::Succeeded => Some(5),
            Self::Failed => Some(6),
            Self::Canceled => Some(7),
        }
    }

    /// Wire name of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
        }
    }

    /// Resolves a wire code. Codes outside the declared set are rejected.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            2 => Some(Self::Queued),
            3 => Some(Self::Running),
            5 => Some(Self::Succeeded),
            6 => Some(Self::Failed),
            7 => Some(Self::Canceled),
            _ => None,
        }
    }

    /// Resolves a wire name, case-sensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == name)
    }

    /// Resolves either form of discriminator.
    ///
    /// # Errors
    ///
    /// [`EnvelopeError::UnknownVariant`] carrying the raw value.
    pub fn from_discriminator(discriminator: &Discriminator) -> Result<Self, EnvelopeError> {
        let status = match discriminator {
            Discriminator::Code(code) => Self::from_code(*code),
            Discriminator::Name(name) => Self::from_name(name),
        };
        status.ok_or_else(|| EnvelopeError::UnknownVariant {
            union: Self::UNION,
            discriminator: discriminator.clone(),
        })
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<Discriminator> for TaskStatus {
    type Error = EnvelopeError;

    fn try_from(discriminator: Discriminator) -> Result<Self, Self::Error> {
        Self::from_discriminator(&discriminator)
    }
}

impl From<TaskStatus> for Discriminator {
    fn from(status: TaskStatus) -> Self {
        Discriminator::from(status.as_str())
    }
}

/// Opaque identifier of a background task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskHandle(String);

impl TaskHandle {
    /// Wraps a raw task identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskHandle {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TaskHandle {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immediate answer to a mutation: a handle to the task doing the work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskReference {
    /// Handle of the spawned task.
    pub ext_id: TaskHandle,
}

/// An entity touched by a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityReference {
    /// External identifier of the entity.
    pub ext_id: String,
    /// Relation kind, e.g. `vmm:ahv:config:vm`.
    pub rel: EntityKind,
    /// Display name, when the task service reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl EntityReference {
    /// Creates an unnamed reference.
    pub fn new(rel: impl Into<EntityKind>, ext_id: impl Into<String>) -> Self {
        Self {
            ext_id: ext_id.into(),
            rel: rel.into(),
            name: None,
        }
    }
}

/// Human-readable error reported by a failed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMessage {
    /// Message text.
    pub message: String,
    /// Service-specific error code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorMessage {
    /// Creates a message without a code.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }
}

/// Typed value of a completion detail.
///
/// Carried as a polymorphic value keyed by the primitive type name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionValue {
    /// A single string, possibly a comma-separated id list.
    String(String),
    /// An integer.
    Integer(i64),
    /// A boolean flag.
    Boolean(bool),
    /// A list of strings.
    StringList(Vec<String>),
}

impl OneOf for CompletionValue {
    const UNION: &'static str = "CompletionValue";

    fn discriminator(&self) -> Discriminator {
        let name = match self {
            Self::String(_) => "String",
            Self::Integer(_) => "Integer",
            Self::Boolean(_) => "Boolean",
            Self::StringList(_) => "List<String>",
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
            "String" => decode_payload(Self::UNION, discriminator, payload).map(Self::String),
            "Integer" => decode_payload(Self::UNION, discriminator, payload).map(Self::Integer),
            "Boolean" => decode_payload(Self::UNION, discriminator, payload).map(Self::Boolean),
            "List<String>" => {
                decode_payload(Self::UNION, discriminator, payload).map(Self::StringList)
            },
            _ => Err(Self::unknown(discriminator)),
        }
    }

    fn encode_payload(&self) -> Result<Value, EnvelopeError> {
        match self {
            Self::String(value) => encode_payload(Self::UNION, value),
            Self::Integer(value) => encode_payload(Self::UNION, value),
            Self::Boolean(value) => encode_payload(Self::UNION, value),
            Self::StringList(value) => encode_payload(Self::UNION, value),
        }
    }
}

/// Named result value attached to a finished task, e.g. the id of a newly
/// created entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionDetail {
    /// Detail name, e.g. `protectionPolicyExtId`.
    pub name: String,
    /// Polymorphic value, see [`CompletionValue`].
    pub value: PolymorphicValue,
}

impl CompletionDetail {
    /// Creates a string-valued detail.
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: PolymorphicValue::new("String", Value::String(value.into())),
        }
    }

    /// Decodes the value.
    ///
    /// # Errors
    ///
    /// [`EnvelopeError::UnknownVariant`] for an unrecognized value type.
    pub fn decoded_value(&self) -> Result<CompletionValue, EnvelopeError> {
        self.value.decode()
    }
}

/// One status fetch of a task, as returned by the task service.
///
/// # Examples
///
/// ```
/// use prism_tasks::{TaskSnapshot, TaskStatus};
///
/// let snapshot = TaskSnapshot::new("task-1", TaskStatus::Running).with_progress(40);
/// assert_eq!(snapshot.status().unwrap(), TaskStatus::Running);
/// assert_eq!(snapshot.progress_percentage, Some(40));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    /// Handle of the task.
    pub ext_id: TaskHandle,

    /// Raw status, resolved with [`status`](Self::status).
    pub status: Discriminator,

    /// Progress in percent, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_percentage: Option<u8>,

    /// Error messages, meaningful only for failure terminals.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub error_messages: Vec<ErrorMessage>,

    /// Entities the task touched.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities_affected: Vec<EntityReference>,

    /// Named result values.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub completion_details: Vec<CompletionDetail>,

    /// When the task started executing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_time: Option<DateTime<Utc>>,

    /// When the task reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_time: Option<DateTime<Utc>>,
}

impl TaskSnapshot {
    /// Creates a bare snapshot.
    pub fn new(ext_id: impl Into<TaskHandle>, status: TaskStatus) -> Self {
        Self {
            ext_id: ext_id.into(),
            status: status.into(),
            progress_percentage: None,
            error_messages: Vec::new(),
            entities_affected: Vec::new(),
            completion_details: Vec::new(),
            started_time: None,
            completed_time: None,
        }
    }

    /// Sets the progress percentage.
    pub fn with_progress(mut self, percentage: u8) -> Self {
        self.progress_percentage = Some(percentage);
        self
    }

    /// Appends an error message.
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_messages.push(ErrorMessage::new(message));
        self
    }

    /// Appends an affected entity.
    pub fn with_affected_entity(mut self, entity: EntityReference) -> Self {
        self.entities_affected.push(entity);
        self
    }

    /// Appends a completion detail.
    pub fn with_completion_detail(mut self, detail: CompletionDetail) -> Self {
        self.completion_details.push(detail);
        self
    }

    /// Resolves the raw status.
    ///
    /// # Errors
    ///
    /// [`EnvelopeError::UnknownVariant`] for a status outside the declared set.
    pub fn status(&self) -> Result<TaskStatus, EnvelopeError> {
        TaskStatus::from_discriminator(&self.status)
    }
}

/// Terminal payload of a task. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRecord {
    handle: TaskHandle,
    status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    progress_percentage: Option<u8>,
    error_messages: Vec<ErrorMessage>,
    entities_affected: Vec<EntityReference>,
    completion_details: Vec<CompletionDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed_time: Option<DateTime<Utc>>,
}

impl CompletionRecord {
    /// Freezes a terminal snapshot. `last_progress` fills in a progress
    /// percentage seen on an earlier tick when the final one omits it.
    pub(crate) fn from_snapshot(
        snapshot: TaskSnapshot,
        status: TaskStatus,
        last_progress: Option<u8>,
    ) -> Self {
        Self {
            handle: snapshot.ext_id,
            status,
            progress_percentage: snapshot.progress_percentage.or(last_progress),
            error_messages: snapshot.error_messages,
            entities_affected: snapshot.entities_affected,
            completion_details: snapshot.completion_details,
            completed_time: snapshot.completed_time,
        }
    }

    /// Handle of the task.
    pub fn handle(&self) -> &TaskHandle {
        &self.handle
    }

    /// Terminal status.
    pub fn status(&self) -> TaskStatus {
        self.status
    }

    /// Last known progress percentage.
    pub fn progress_percentage(&self) -> Option<u8> {
        self.progress_percentage
    }

    /// Error messages.
    pub fn error_messages(&self) -> &[ErrorMessage] {
        &self.error_messages
    }

    /// First non-empty error message, if any.
    pub fn first_error_message(&self) -> Option<&str> {
        self.error_messages
            .iter()
            .map(|m| m.message.as_str())
            .find(|m| !m.is_empty())
    }

    /// Entities the task touched.
    pub fn entities_affected(&self) -> &[EntityReference] {
        &self.entities_affected
    }

    /// Named result values.
    pub fn completion_details(&self) -> &[CompletionDetail] {
        &self.completion_details
    }

    /// Looks up a completion detail by name.
    pub fn completion_detail(&self, name: &str) -> Option<&CompletionDetail> {
        self.completion_details.iter().find(|d| d.name == name)
    }

    /// When the task reached its terminal status, if reported.
    pub fn completed_time(&self) -> Option<DateTime<Utc>> {
        self.completed_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_accepts_codes_and_names() {
        let coded: TaskStatus = serde_json::from_value(json!(5)).unwrap();
        assert_eq!(coded, TaskStatus::Succeeded);

        let named: TaskStatus = serde_json::from_value(json!("PENDING")).unwrap();
        assert_eq!(named, TaskStatus::Pending);

        assert_eq!(serde_json::to_value(TaskStatus::Canceled).unwrap(), "CANCELED");
    }

    #[test]
    fn status_rejects_unknown_codes() {
        for code in [0, 1, 4, 8, -1] {
            let err = TaskStatus::from_discriminator(&Discriminator::Code(code)).unwrap_err();
            assert!(matches!(err, EnvelopeError::UnknownVariant { union: "TaskStatus", .. }));
        }
        assert!(serde_json::from_value::<TaskStatus>(json!("running")).is_err());
    }

    #[test]
    fn pending_and_terminal_sets_partition_statuses() {
        for status in TaskStatus::ALL {
            assert_ne!(status.is_pending(), status.is_terminal(), "{status}");
            if status.is_terminal() {
                assert_ne!(status.is_success(), status.is_failure(), "{status}");
            }
        }
    }

    #[test]
    fn snapshot_parses_wire_document() {
        let snapshot: TaskSnapshot = serde_json::from_value(json!({
            "extId": "task-9",
            "status": 6,
            "progressPercentage": 70,
            "errorMessages": [{ "message": "disk full" }],
            "entitiesAffected": [{ "extId": "vm-1", "rel": "vmm:ahv:config:vm" }],
            "completedTime": "2026-01-02T03:04:05Z"
        }))
        .unwrap();

        assert_eq!(snapshot.status().unwrap(), TaskStatus::Failed);
        assert_eq!(snapshot.error_messages[0].message, "disk full");
        assert_eq!(snapshot.entities_affected[0].rel.as_str(), "vmm:ahv:config:vm");
        assert!(snapshot.completed_time.is_some());
    }

    #[test]
    fn snapshot_with_unknown_status_still_parses() {
        let snapshot: TaskSnapshot =
            serde_json::from_value(json!({ "extId": "t", "status": 42 })).unwrap();
        assert!(matches!(
            snapshot.status(),
            Err(EnvelopeError::UnknownVariant { discriminator: Discriminator::Code(42), .. })
        ));
    }

    #[test]
    fn record_keeps_earlier_progress() {
        let snapshot = TaskSnapshot::new("t", TaskStatus::Failed).with_error("").with_error("boom");
        let record = CompletionRecord::from_snapshot(snapshot, TaskStatus::Failed, Some(55));
        assert_eq!(record.progress_percentage(), Some(55));
        assert_eq!(record.first_error_message(), Some("boom"));
    }

    #[test]
    fn completion_value_decodes_lists() {
        let detail = CompletionDetail {
            name: "vmExtIds".to_string(),
            value: PolymorphicValue::new("List<String>", json!(["a", "b"])),
        };
        assert_eq!(
            detail.decoded_value().unwrap(),
            CompletionValue::StringList(vec!["a".to_string(), "b".to_string()])
        );

        let text = CompletionDetail::text("id", "abc");
        assert_eq!(text.decoded_value().unwrap(), CompletionValue::String("abc".to_string()));
    }
}
