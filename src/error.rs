//! Error taxonomy surfaced by the orchestration core.
//!
//! Every failure of an orchestration call is an [`OrchestrationError`].
//! Use [`kind`](OrchestrationError::kind) to branch on the category and
//! [`is_outcome_unknown`](OrchestrationError::is_outcome_unknown) to decide
//! whether the remote task may still be running.

use std::time::Duration;
use thiserror::Error;

use crate::remote::{Operation, RemoteError};
use crate::types::entity::{EntityKind, EntityRef};
use crate::types::envelope::{Discriminator, EnvelopeError};
use crate::types::task::{CompletionRecord, TaskHandle, TaskStatus};

/// Errors returned by [`MutationOrchestrator`](crate::MutationOrchestrator)
/// and the components it composes.
///
/// # Examples
///
/// ```
/// use prism_tasks::{ErrorKind, OrchestrationError, TaskHandle};
/// use std::time::Duration;
///
/// let err = OrchestrationError::Timeout {
///     handle: Some(TaskHandle::from("task-1")),
///     last_status: None,
///     waited: Duration::from_secs(30),
/// };
/// assert_eq!(err.kind(), ErrorKind::Timeout);
/// assert!(err.is_outcome_unknown());
/// ```
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// The read preceding a write failed.
    #[error("failed to read {target} before writing: {source}")]
    ReadFailed {
        /// Entity that was being read.
        target: EntityRef,
        /// Underlying remote failure.
        #[source]
        source: RemoteError,
    },

    /// The read preceding a write carried no entity tag.
    #[error("read of {target} returned no entity tag")]
    MissingEntityTag {
        /// Entity that was read.
        target: EntityRef,
    },

    /// The mutation request was rejected before a task was created.
    #[error("{operation} of {kind} was rejected: {source}")]
    SubmissionFailed {
        /// Requested operation.
        operation: Operation,
        /// Kind of the entity being mutated.
        kind: EntityKind,
        /// Underlying remote failure.
        #[source]
        source: RemoteError,
    },

    /// The entity changed between the read and the write.
    #[error("concurrent modification of {target}: {message}")]
    ConcurrentModification {
        /// Entity whose tag was stale.
        target: EntityRef,
        /// Message reported by the server.
        message: String,
    },

    /// The deadline elapsed while the task was still pending.
    #[error("timed out after {waited:?} waiting for task {}", display_handle(.handle))]
    Timeout {
        /// Task being awaited, if submission had completed.
        handle: Option<TaskHandle>,
        /// Last status observed before the deadline.
        last_status: Option<TaskStatus>,
        /// Time spent before giving up.
        waited: Duration,
    },

    /// The task ended `FAILED` or `CANCELED`.
    #[error(
        "task {handle} ended {status}: error_detail: {}, progress_message: {}",
        display_message(.message),
        display_progress(.progress)
    )]
    TaskFailed {
        /// The failed task.
        handle: TaskHandle,
        /// `FAILED` or `CANCELED`.
        status: TaskStatus,
        /// First error message reported by the task.
        message: Option<String>,
        /// Last known progress percentage.
        progress: Option<u8>,
        /// Full terminal record.
        record: Box<CompletionRecord>,
    },

    /// A polymorphic value carried a discriminator outside its declared set.
    #[error("unknown {union} variant: {discriminator}")]
    UnknownVariant {
        /// Name of the union.
        union: &'static str,
        /// The raw discriminator.
        discriminator: Discriminator,
    },

    /// A response could not be decoded into the expected shape.
    #[error("malformed response: {0}")]
    MalformedPayload(#[source] EnvelopeError),

    /// The task succeeded but did not report the affected entity.
    #[error("task {handle} reported no {expected} in its completion data")]
    CompletionDataMissing {
        /// The finished task.
        handle: TaskHandle,
        /// Kind the caller expected.
        expected: EntityKind,
    },

    /// The collection-diff fallback found zero or several candidates.
    #[error(
        "could not correlate task {handle} to a single {kind}: {} candidate(s) {:?}",
        .candidates.len(),
        .candidates
    )]
    CorrelationAmbiguous {
        /// The finished task.
        handle: TaskHandle,
        /// Kind being resolved.
        kind: EntityKind,
        /// Identifiers of the candidates found.
        candidates: Vec<String>,
    },

    /// A status fetch failed mid-poll.
    #[error("failed to fetch status of task {handle}: {source}")]
    StatusFetchFailed {
        /// Task being awaited.
        handle: TaskHandle,
        /// Underlying remote failure.
        #[source]
        source: RemoteError,
    },

    /// The caller aborted the wait.
    #[error("wait for task {} was cancelled", display_handle(.handle))]
    Cancelled {
        /// Task being awaited, if submission had completed.
        handle: Option<TaskHandle>,
        /// Last status observed before cancellation.
        last_status: Option<TaskStatus>,
    },

    /// A task seen terminal was later reported with a different status.
    #[error("task {handle} regressed from terminal {from} to {to}")]
    TerminalRegression {
        /// The task.
        handle: TaskHandle,
        /// Terminal status observed first.
        from: TaskStatus,
        /// Status observed afterwards.
        to: TaskStatus,
    },
}

/// Category of an [`OrchestrationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`OrchestrationError::ReadFailed`].
    ReadFailed,
    /// See [`OrchestrationError::MissingEntityTag`].
    MissingEntityTag,
    /// See [`OrchestrationError::SubmissionFailed`].
    SubmissionFailed,
    /// See [`OrchestrationError::ConcurrentModification`].
    ConcurrentModification,
    /// See [`OrchestrationError::Timeout`].
    Timeout,
    /// See [`OrchestrationError::TaskFailed`].
    TaskFailed,
    /// See [`OrchestrationError::UnknownVariant`].
    UnknownVariant,
    /// See [`OrchestrationError::MalformedPayload`].
    MalformedPayload,
    /// See [`OrchestrationError::CompletionDataMissing`].
    CompletionDataMissing,
    /// See [`OrchestrationError::CorrelationAmbiguous`].
    CorrelationAmbiguous,
    /// See [`OrchestrationError::StatusFetchFailed`].
    StatusFetchFailed,
    /// See [`OrchestrationError::Cancelled`].
    Cancelled,
    /// See [`OrchestrationError::TerminalRegression`].
    TerminalRegression,
}

impl OrchestrationError {
    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ReadFailed { .. } => ErrorKind::ReadFailed,
            Self::MissingEntityTag { .. } => ErrorKind::MissingEntityTag,
            Self::SubmissionFailed { .. } => ErrorKind::SubmissionFailed,
            Self::ConcurrentModification { .. } => ErrorKind::ConcurrentModification,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::TaskFailed { .. } => ErrorKind::TaskFailed,
            Self::UnknownVariant { .. } => ErrorKind::UnknownVariant,
            Self::MalformedPayload(_) => ErrorKind::MalformedPayload,
            Self::CompletionDataMissing { .. } => ErrorKind::CompletionDataMissing,
            Self::CorrelationAmbiguous { .. } => ErrorKind::CorrelationAmbiguous,
            Self::StatusFetchFailed { .. } => ErrorKind::StatusFetchFailed,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::TerminalRegression { .. } => ErrorKind::TerminalRegression,
        }
    }

    /// Returns `true` if the remote task may have completed, failed, or
    /// still be running: the wait ended without observing a terminal status.
    pub fn is_outcome_unknown(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Cancelled { .. } | Self::StatusFetchFailed { .. }
        )
    }

    /// Returns the handle of the task involved, if one was created.
    pub fn task_handle(&self) -> Option<&TaskHandle> {
        match self {
            Self::Timeout { handle, .. } | Self::Cancelled { handle, .. } => handle.as_ref(),
            Self::TaskFailed { handle, .. }
            | Self::CompletionDataMissing { handle, .. }
            | Self::CorrelationAmbiguous { handle, .. }
            | Self::StatusFetchFailed { handle, .. }
            | Self::TerminalRegression { handle, .. } => Some(handle),
            Self::ReadFailed { .. }
            | Self::MissingEntityTag { .. }
            | Self::SubmissionFailed { .. }
            | Self::ConcurrentModification { .. }
            | Self::UnknownVariant { .. }
            | Self::MalformedPayload(_) => None,
        }
    }

    /// Builds a [`TaskFailed`](Self::TaskFailed) from a failure record.
    pub(crate) fn task_failed(record: CompletionRecord) -> Self {
        Self::TaskFailed {
            handle: record.handle().clone(),
            status: record.status(),
            message: record.first_error_message().map(str::to_string),
            progress: record.progress_percentage(),
            record: Box::new(record),
        }
    }
}

impl From<EnvelopeError> for OrchestrationError {
    fn from(err: EnvelopeError) -> Self {
        match err {
            EnvelopeError::UnknownVariant {
                union,
                discriminator,
            } => Self::UnknownVariant {
                union,
                discriminator,
            },
            other => Self::MalformedPayload(other),
        }
    }
}

fn display_handle(handle: &Option<TaskHandle>) -> String {
    handle
        .as_ref()
        .map_or_else(|| "<not submitted>".to_string(), ToString::to_string)
}

fn display_message(message: &Option<String>) -> &str {
    message.as_deref().unwrap_or("<none>")
}

fn display_progress(progress: &Option<u8>) -> String {
    progress.map_or_else(|| "<unknown>".to_string(), |p| p.to_string())
}
