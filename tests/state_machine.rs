//! Poll state machine tests.
//!
//! Drives `PollState` through the status sequences a task can report and
//! checks the terminal states are absorbing.

use prism_tasks::constants::REL_VM;
use prism_tasks::poller::PollState;
use prism_tasks::{
    CompletionDetail, EntityReference, ErrorKind, OrchestrationError, TaskSnapshot, TaskStatus,
};

fn tick(status: TaskStatus) -> TaskSnapshot {
    TaskSnapshot::new("task-sm", status)
}

fn drive(statuses: &[TaskStatus]) -> Result<PollState, OrchestrationError> {
    statuses
        .iter()
        .try_fold(PollState::initial(), |state, status| state.transition(tick(*status)))
}

// ─── Status Sets ────────────────────────────────────────────────────────────

mod status_set_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_pending_and_terminal_partition() {
        let pending: Vec<_> = TaskStatus::ALL
            .into_iter()
            .filter(TaskStatus::is_pending)
            .collect();
        let terminal: Vec<_> = TaskStatus::ALL
            .into_iter()
            .filter(TaskStatus::is_terminal)
            .collect();

        assert_eq!(
            pending,
            vec![TaskStatus::Queued, TaskStatus::Pending, TaskStatus::Running]
        );
        assert_eq!(
            terminal,
            vec![TaskStatus::Succeeded, TaskStatus::Failed, TaskStatus::Canceled]
        );
    }

    #[test]
    fn test_only_succeeded_is_success() {
        for status in TaskStatus::ALL {
            assert_eq!(status.is_success(), status == TaskStatus::Succeeded);
            assert_eq!(
                status.is_failure(),
                matches!(status, TaskStatus::Failed | TaskStatus::Canceled)
            );
        }
    }

    #[test]
    fn test_terminal_statuses_only_transition_to_themselves() {
        for from in TaskStatus::ALL.into_iter().filter(TaskStatus::is_terminal) {
            for to in TaskStatus::ALL {
                assert_eq!(from.can_transition_to(&to), from == to, "{from} -> {to}");
            }
        }
    }
}

// ─── Transitions ────────────────────────────────────────────────────────────

mod transition_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_initial_state() {
        let state = PollState::initial();
        assert!(!state.is_terminal());
        assert_eq!(state.last_status(), None);
    }

    #[test]
    fn test_pending_statuses_may_go_backwards() {
        let state = drive(&[
            TaskStatus::Running,
            TaskStatus::Queued,
            TaskStatus::Running,
        ])
        .unwrap();
        assert_eq!(
            state,
            PollState::Pending {
                last_status: Some(TaskStatus::Running),
                progress: None,
                polls: 3,
            }
        );
    }

    #[test]
    fn test_success_carries_completion_data() {
        let state = PollState::initial()
            .transition(tick(TaskStatus::Running).with_progress(60))
            .unwrap()
            .transition(
                tick(TaskStatus::Succeeded)
                    .with_affected_entity(EntityReference::new(REL_VM, "vm-7"))
                    .with_completion_detail(CompletionDetail::text("vmExtIds", "vm-7")),
            )
            .unwrap();

        let PollState::Succeeded(record) = state else {
            panic!("expected success");
        };
        assert_eq!(record.status(), TaskStatus::Succeeded);
        assert_eq!(record.progress_percentage(), Some(60));
        assert_eq!(record.entities_affected()[0].ext_id, "vm-7");
        assert!(record.completion_detail("vmExtIds").is_some());
    }

    #[test]
    fn test_failure_keeps_first_non_empty_message() {
        let state = PollState::initial()
            .transition(
                tick(TaskStatus::Failed)
                    .with_error("")
                    .with_error("disk quota exceeded")
                    .with_error("rolled back"),
            )
            .unwrap();

        let PollState::Failed(record) = state else {
            panic!("expected failure");
        };
        assert_eq!(record.first_error_message(), Some("disk quota exceeded"));
        assert_eq!(record.progress_percentage(), None);
    }

    #[test]
    fn test_terminal_state_is_absorbing() {
        let state = drive(&[TaskStatus::Running, TaskStatus::Succeeded]).unwrap();
        let again = state.clone().transition(tick(TaskStatus::Succeeded)).unwrap();
        assert_eq!(again, state);
    }

    #[test]
    fn test_terminal_regression() {
        for next in [TaskStatus::Running, TaskStatus::Failed] {
            let err = drive(&[TaskStatus::Succeeded, next]).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::TerminalRegression);
        }
    }
}
