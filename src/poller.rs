//! Task polling.
//!
//! The wait for a task is an explicit state machine, [`PollState`], driven by
//! [`TaskPoller`]. The state machine knows nothing about timing; the poller
//! supplies ticks, the deadline and cancellation.
//!
//! # State Machine
//!
//! ```text
//! Pending --QUEUED/PENDING/RUNNING--> Pending
//! Pending --SUCCEEDED---------------> Succeeded (terminal)
//! Pending --FAILED/CANCELED---------> Failed    (terminal)
//! Succeeded/Failed --same status----> unchanged
//! Succeeded/Failed --other status---> TerminalRegression error
//! ```
//!
//! # Timing
//!
//! The first status fetch happens immediately. Later fetches are spaced by
//! a [`PollSchedule`] that grows geometrically up to a ceiling. A deadline
//! bounds the whole wait; reaching it, or the caller cancelling, ends the
//! wait with an "outcome unknown" error and leaves the task running.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::constants::{
    DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_MAX_POLL_INTERVAL_MS, DEFAULT_POLL_INTERVAL_MS,
};
use crate::error::OrchestrationError;
use crate::remote::ControlPlane;
use crate::types::task::{CompletionRecord, TaskHandle, TaskSnapshot, TaskStatus};

/// State of one wait for a task.
#[derive(Debug, Clone, PartialEq)]
pub enum PollState {
    /// Not yet terminal.
    Pending {
        /// Status seen on the latest tick, `None` before the first one.
        last_status: Option<TaskStatus>,
        /// Latest progress percentage reported.
        progress: Option<u8>,
        /// Number of ticks observed.
        polls: u32,
    },
    /// Ended `SUCCEEDED`.
    Succeeded(CompletionRecord),
    /// Ended `FAILED` or `CANCELED`.
    Failed(CompletionRecord),
}

impl PollState {
    /// The state entered when a handle is received.
    pub fn initial() -> Self {
        Self::Pending {
            last_status: None,
            progress: None,
            polls: 0,
        }
    }

    /// Returns `true` for [`Succeeded`](Self::Succeeded) and
    /// [`Failed`](Self::Failed).
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending { .. })
    }

    /// The latest status observed.
    pub fn last_status(&self) -> Option<TaskStatus> {
        match self {
            Self::Pending { last_status, .. } => *last_status,
            Self::Succeeded(record) | Self::Failed(record) => Some(record.status()),
        }
    }

    /// Applies one status fetch.
    ///
    /// # Examples
    ///
    /// ```
    /// use prism_tasks::poller::PollState;
    /// use prism_tasks::{TaskSnapshot, TaskStatus};
    ///
    /// let state = PollState::initial()
    ///     .transition(TaskSnapshot::new("t-1", TaskStatus::Running).with_progress(50))
    ///     .unwrap()
    ///     .transition(TaskSnapshot::new("t-1", TaskStatus::Succeeded))
    ///     .unwrap();
    ///
    /// let PollState::Succeeded(record) = state else { panic!("expected success") };
    /// assert_eq!(record.progress_percentage(), Some(50));
    /// ```
    ///
    /// # Errors
    ///
    /// - [`OrchestrationError::UnknownVariant`] if the status is unrecognized.
    /// - [`OrchestrationError::TerminalRegression`] if a terminal state sees
    ///   any status other than its own.
    pub fn transition(self, snapshot: TaskSnapshot) -> Result<Self, OrchestrationError> {
        let status = snapshot.status()?;
        match self {
            Self::Pending {
                progress, polls, ..
            } => {
                if status.is_pending() {
                    return Ok(Self::Pending {
                        last_status: Some(status),
                        progress: snapshot.progress_percentage.or(progress),
                        polls: polls.saturating_add(1),
                    });
                }
                let record = CompletionRecord::from_snapshot(snapshot, status, progress);
                if status.is_success() {
                    Ok(Self::Succeeded(record))
                } else {
                    Ok(Self::Failed(record))
                }
            },
            Self::Succeeded(ref record) | Self::Failed(ref record) => {
                if record.status().can_transition_to(&status) {
                    Ok(self)
                } else {
                    Err(OrchestrationError::TerminalRegression {
                        handle: record.handle().clone(),
                        from: record.status(),
                        to: status,
                    })
                }
            },
        }
    }
}

/// Spacing of status fetches.
///
/// # Examples
///
/// ```
/// use prism_tasks::poller::PollSchedule;
/// use std::time::Duration;
///
/// let schedule = PollSchedule::new(Duration::from_secs(1), Duration::from_secs(3), 2.0);
/// assert_eq!(schedule.delay_for(0), Duration::from_secs(1));
/// assert_eq!(schedule.delay_for(1), Duration::from_secs(2));
/// assert_eq!(schedule.delay_for(5), Duration::from_secs(3));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollSchedule {
    initial: Duration,
    max: Duration,
    multiplier: f64,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            Duration::from_millis(DEFAULT_MAX_POLL_INTERVAL_MS),
            DEFAULT_BACKOFF_MULTIPLIER,
        )
    }
}

impl PollSchedule {
    /// A schedule starting at `initial`, multiplied by `multiplier` after
    /// every pending tick and capped at `max`. Multipliers below 1 are
    /// treated as 1; a `max` below `initial` is raised to `initial`.
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        let multiplier = if multiplier.is_finite() {
            multiplier.max(1.0)
        } else {
            1.0
        };
        Self {
            initial,
            max: max.max(initial),
            multiplier,
        }
    }

    /// A constant interval.
    pub fn fixed(interval: Duration) -> Self {
        Self::new(interval, interval, 1.0)
    }

    /// Delay after the `attempt`-th pending tick (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            return self.max;
        }
        Duration::from_secs_f64(secs)
    }
}

/// Awaits tasks against a [`ControlPlane`].
pub struct TaskPoller<'a> {
    api: &'a dyn ControlPlane,
    schedule: PollSchedule,
}

impl<'a> TaskPoller<'a> {
    /// Creates a poller with the default schedule.
    pub fn new(api: &'a dyn ControlPlane) -> Self {
        Self {
            api,
            schedule: PollSchedule::default(),
        }
    }

    /// Replaces the schedule.
    pub fn with_schedule(mut self, schedule: PollSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Polls `handle` until it is terminal, `deadline` passes, or `cancel`
    /// fires.
    ///
    /// Returns the completion record of a `SUCCEEDED` task.
    ///
    /// # Errors
    ///
    /// - [`OrchestrationError::TaskFailed`] for `FAILED` or `CANCELED`.
    /// - [`OrchestrationError::Timeout`] if the deadline passes first.
    /// - [`OrchestrationError::Cancelled`] if `cancel` fires first.
    /// - [`OrchestrationError::StatusFetchFailed`] if a fetch fails.
    /// - Decode errors for malformed status documents.
    pub async fn await_completion(
        &self,
        handle: &TaskHandle,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<CompletionRecord, OrchestrationError> {
        let started = Instant::now();
        let mut state = PollState::initial();
        let mut attempt: u32 = 0;

        loop {
            let snapshot = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(cancelled(handle, &state)),
                () = tokio::time::sleep_until(deadline) => {
                    return Err(timed_out(handle, &state, started));
                },
                fetched = self.fetch(handle) => fetched?,
            };

            state = match state.transition(snapshot)? {
                PollState::Succeeded(record) => {
                    tracing::debug!(
                        task_id = %handle,
                        details = %serde_json::to_string(&record).unwrap_or_default(),
                        "task succeeded"
                    );
                    return Ok(record);
                },
                PollState::Failed(record) => {
                    tracing::debug!(
                        task_id = %handle,
                        status = %record.status(),
                        details = %serde_json::to_string(&record).unwrap_or_default(),
                        "task failed"
                    );
                    return Err(OrchestrationError::task_failed(record));
                },
                pending => pending,
            };

            let delay = self.schedule.delay_for(attempt);
            attempt = attempt.saturating_add(1);
            tracing::trace!(
                task_id = %handle,
                status = ?state.last_status(),
                delay_ms = delay.as_millis() as u64,
                "task still pending"
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(cancelled(handle, &state)),
                () = tokio::time::sleep_until(deadline) => {
                    return Err(timed_out(handle, &state, started));
                },
                () = tokio::time::sleep(delay) => {},
            }
        }
    }

    /// Re-fetches a task already seen terminal and checks it has not moved.
    ///
    /// Returns the record built from the fresh fetch.
    ///
    /// # Errors
    ///
    /// - [`OrchestrationError::TerminalRegression`] if the status differs.
    /// - [`OrchestrationError::StatusFetchFailed`] if the fetch fails.
    pub async fn observe(
        &self,
        record: &CompletionRecord,
    ) -> Result<CompletionRecord, OrchestrationError> {
        let snapshot = self.fetch(record.handle()).await?;
        let status = snapshot.status()?;
        if status != record.status() {
            tracing::warn!(
                task_id = %record.handle(),
                from = %record.status(),
                to = %status,
                "terminal task reported a different status"
            );
            return Err(OrchestrationError::TerminalRegression {
                handle: record.handle().clone(),
                from: record.status(),
                to: status,
            });
        }
        Ok(CompletionRecord::from_snapshot(
            snapshot,
            status,
            record.progress_percentage(),
        ))
    }

    async fn fetch(&self, handle: &TaskHandle) -> Result<TaskSnapshot, OrchestrationError> {
        let response = self.api.get_task(handle).await.map_err(|source| {
            tracing::warn!(task_id = %handle, error = %source, "status fetch failed");
            OrchestrationError::StatusFetchFailed {
                handle: handle.clone(),
                source,
            }
        })?;
        Ok(response.into_task()?)
    }
}

fn cancelled(handle: &TaskHandle, state: &PollState) -> OrchestrationError {
    tracing::debug!(task_id = %handle, "wait cancelled by caller");
    OrchestrationError::Cancelled {
        handle: Some(handle.clone()),
        last_status: state.last_status(),
    }
}

fn timed_out(handle: &TaskHandle, state: &PollState, started: Instant) -> OrchestrationError {
    let waited = started.elapsed();
    tracing::warn!(
        task_id = %handle,
        waited_ms = waited.as_millis() as u64,
        "deadline reached while task still pending"
    );
    OrchestrationError::Timeout {
        handle: Some(handle.clone()),
        last_status: state.last_status(),
        waited,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::envelope::Discriminator;
    use pretty_assertions::assert_eq;

    fn snapshot(status: TaskStatus) -> TaskSnapshot {
        TaskSnapshot::new("task-1", status)
    }

    #[test]
    fn pending_statuses_keep_pending() {
        let mut state = PollState::initial();
        for status in [TaskStatus::Queued, TaskStatus::Pending, TaskStatus::Running] {
            state = state.transition(snapshot(status)).unwrap();
            assert!(!state.is_terminal());
            assert_eq!(state.last_status(), Some(status));
        }
        assert!(matches!(state, PollState::Pending { polls: 3, .. }));
    }

    #[test]
    fn canceled_is_a_failure() {
        let state = PollState::initial()
            .transition(snapshot(TaskStatus::Canceled))
            .unwrap();
        assert!(matches!(state, PollState::Failed(ref r) if r.status() == TaskStatus::Canceled));
    }

    #[test]
    fn terminal_state_absorbs_repeats() {
        let state = PollState::initial()
            .transition(snapshot(TaskStatus::Succeeded))
            .unwrap();
        let again = state.clone().transition(snapshot(TaskStatus::Succeeded)).unwrap();
        assert_eq!(again, state);
    }

    #[test]
    fn terminal_state_rejects_regression() {
        let state = PollState::initial()
            .transition(snapshot(TaskStatus::Failed))
            .unwrap();
        let err = state.transition(snapshot(TaskStatus::Running)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TerminalRegression);
    }

    #[test]
    fn unknown_status_fails_closed() {
        let mut raw = snapshot(TaskStatus::Running);
        raw.status = Discriminator::Code(4);
        let err = PollState::initial().transition(raw).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownVariant);
    }

    #[test]
    fn schedule_backs_off_to_ceiling() {
        let schedule = PollSchedule::default();
        assert_eq!(schedule.delay_for(0), Duration::from_millis(1_000));
        assert_eq!(schedule.delay_for(1), Duration::from_millis(1_500));
        assert_eq!(schedule.delay_for(100), Duration::from_millis(10_000));
        assert_eq!(schedule.delay_for(u32::MAX), Duration::from_millis(10_000));
    }

    #[test]
    fn fixed_schedule_never_grows() {
        let schedule = PollSchedule::fixed(Duration::from_millis(250));
        assert_eq!(schedule.delay_for(0), schedule.delay_for(50));
    }
}
