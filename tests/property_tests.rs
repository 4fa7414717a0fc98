//! Property-based tests for status decoding, the poll state machine, the
//! backoff schedule and completion-detail id lists.

use std::time::Duration;

use proptest::prelude::*;
use serde_json::{json, Value};

use prism_tasks::constants::REL_VM;
use prism_tasks::poller::{PollSchedule, PollState};
use prism_tasks::remote::memory::InMemoryControlPlane;
use prism_tasks::types::envelope::{Discriminator, EnvelopeError, PolymorphicValue, ResponseData};
use prism_tasks::{
    CompletionCorrelator, CompletionDetail, OperationContext, TaskSnapshot, TaskStatus,
};

// ─── Arbitrary Strategies ───────────────────────────────────────────────────

fn arb_task_status() -> impl Strategy<Value = TaskStatus> {
    prop::sample::select(TaskStatus::ALL.to_vec())
}

fn arb_pending_status() -> impl Strategy<Value = TaskStatus> {
    prop::sample::select(vec![TaskStatus::Queued, TaskStatus::Pending, TaskStatus::Running])
}

fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-zA-Z_<>.]{0,24}".prop_map(Value::from),
    ];
    leaf.prop_recursive(3, 16, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::from),
            prop::collection::btree_map("[a-z$]{1,8}", inner, 0..4)
                .prop_map(|m| json!(m)),
        ]
    })
}

fn arb_ext_id() -> impl Strategy<Value = String> {
    "[a-z0-9][a-z0-9-]{0,11}"
}

fn tick(status: TaskStatus) -> TaskSnapshot {
    TaskSnapshot::new("task-prop", status)
}

// ─── Status Decoding ────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn prop_only_declared_codes_decode(code in -16i64..32) {
        let decoded = TaskStatus::from_discriminator(&Discriminator::Code(code));
        let declared = [2, 3, 5, 6, 7].contains(&code);
        prop_assert_eq!(decoded.is_ok(), declared);
        match decoded {
            Ok(status) => prop_assert_eq!(status.code(), Some(code)),
            Err(err) => prop_assert!(
                matches!(err, EnvelopeError::UnknownVariant { .. }),
                "expected UnknownVariant, got {:?}",
                err
            ),
        }
    }

    #[test]
    fn prop_status_json_never_panics(value in arb_json()) {
        let _ = serde_json::from_value::<TaskStatus>(value.clone());
        let _ = serde_json::from_value::<Discriminator>(value.clone());
        let _ = serde_json::from_value::<TaskSnapshot>(value);
    }

    #[test]
    fn prop_response_envelope_never_panics(
        object_type in "[a-zA-Z.<>]{0,32}",
        payload in arb_json(),
    ) {
        let _ = PolymorphicValue::new(object_type, payload).decode::<ResponseData>();
    }

    #[test]
    fn prop_status_serializes_back(status in arb_task_status()) {
        let wire = serde_json::to_value(status).unwrap();
        let back: TaskStatus = serde_json::from_value(wire).unwrap();
        prop_assert_eq!(back, status);
    }
}

// ─── Poll State Machine ─────────────────────────────────────────────────────

proptest! {
    #[test]
    fn prop_pending_prefix_never_terminates(
        statuses in prop::collection::vec(arb_pending_status(), 1..32)
    ) {
        let mut state = PollState::initial();
        for status in &statuses {
            state = state.transition(tick(*status)).unwrap();
            prop_assert!(!state.is_terminal());
        }
        prop_assert_eq!(state.last_status(), statuses.last().copied());
    }

    #[test]
    fn prop_terminal_is_stable(
        prefix in prop::collection::vec(arb_pending_status(), 0..8),
        terminal in arb_task_status().prop_filter("terminal", TaskStatus::is_terminal),
        next in arb_task_status(),
    ) {
        let mut state = PollState::initial();
        for status in prefix {
            state = state.transition(tick(status)).unwrap();
        }
        let state = state.transition(tick(terminal)).unwrap();
        prop_assert!(state.is_terminal());

        let observed = state.clone().transition(tick(next));
        if next == terminal {
            prop_assert_eq!(observed.unwrap(), state);
        } else {
            prop_assert!(observed.is_err());
        }
    }
}

// ─── Backoff Schedule ───────────────────────────────────────────────────────

proptest! {
    #[test]
    fn prop_schedule_is_monotonic_and_capped(
        initial_ms in 1u64..5_000,
        max_ms in 1u64..60_000,
        multiplier in 0.0f64..4.0,
    ) {
        let schedule = PollSchedule::new(
            Duration::from_millis(initial_ms),
            Duration::from_millis(max_ms),
            multiplier,
        );
        let cap = Duration::from_millis(max_ms.max(initial_ms));
        let mut previous = Duration::ZERO;
        for attempt in 0..64 {
            let delay = schedule.delay_for(attempt);
            prop_assert!(delay >= previous);
            prop_assert!(delay <= cap);
            previous = delay;
        }
    }
}

// ─── Completion Details ─────────────────────────────────────────────────────

proptest! {
    #[test]
    fn prop_comma_list_yields_every_id(ids in prop::collection::vec(arb_ext_id(), 1..8)) {
        let snapshot = tick(TaskStatus::Succeeded)
            .with_completion_detail(CompletionDetail::text("vmExtIds", ids.join(", ")));
        let PollState::Succeeded(record) = PollState::initial().transition(snapshot).unwrap() else {
            panic!("expected success");
        };

        let plane = InMemoryControlPlane::new();
        let context = OperationContext::new(REL_VM).with_completion_detail("vmExtIds");
        let found = CompletionCorrelator::new(&plane).correlate_all(&record, &context).unwrap();
        prop_assert_eq!(found, ids);
    }
}
