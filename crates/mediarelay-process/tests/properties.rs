//! Property tests for the state order and the scheduler queue

use std::collections::HashMap;
use std::time::Duration;

use mediarelay_process::{ProcessId, ProcessState, TerminationScheduler};
use proptest::prelude::*;
use tokio::time::Instant;

fn any_state() -> impl Strategy<Value = ProcessState> {
    prop::sample::select(ProcessState::ALL.to_vec())
}

#[derive(Debug, Clone)]
enum Op {
    Schedule { process: u8, offset_ms: u16 },
    Cancel { process: u8 },
    Pop { at_ms: u16 },
}

fn any_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..8, 0u16..1000).prop_map(|(process, offset_ms)| Op::Schedule { process, offset_ms }),
        (0u8..8).prop_map(|process| Op::Cancel { process }),
        (0u16..1000).prop_map(|at_ms| Op::Pop { at_ms }),
    ]
}

proptest! {
    /// Any accepted sequence of transitions only moves forward, except into REAPED
    #[test]
    fn prop_transitions_are_monotonic(requests in prop::collection::vec(any_state(), 0..20)) {
        let mut state = ProcessState::Running;
        for next in requests {
            let allowed = state.can_advance_to(next);
            if allowed {
                prop_assert!(next > state);
                state = next;
            } else {
                prop_assert!(state.is_terminal() || next <= state);
            }
        }
    }

    /// REAPED is reachable from every state but never left
    #[test]
    fn prop_reaped_is_absorbing(from in any_state(), next in any_state()) {
        if !from.is_terminal() {
            prop_assert!(from.can_advance_to(ProcessState::Reaped));
        }
        prop_assert!(!ProcessState::Reaped.can_advance_to(next));
    }

    /// The queue never holds two entries for one process and always keeps the
    /// earliest requested deadline
    #[test]
    fn prop_scheduler_matches_model(ops in prop::collection::vec(any_op(), 0..64)) {
        let base = Instant::now();
        let mut scheduler = TerminationScheduler::new();
        let mut model: HashMap<u8, u16> = HashMap::new();
        let id_of = |n: u8| ProcessId::from_raw(n as u64);

        for op in ops {
            match op {
                Op::Schedule { process, offset_ms } => {
                    let deadline = base + Duration::from_millis(offset_ms as u64);
                    scheduler.schedule(deadline, id_of(process));
                    let entry = model.entry(process).or_insert(offset_ms);
                    *entry = (*entry).min(offset_ms);
                }
                Op::Cancel { process } => {
                    let removed = scheduler.cancel(id_of(process));
                    prop_assert_eq!(removed, model.remove(&process).is_some());
                }
                Op::Pop { at_ms } => {
                    let due = scheduler.pop_due(base + Duration::from_millis(at_ms as u64));
                    let mut expected: Vec<(u16, u8)> = model
                        .iter()
                        .filter(|(_, offset)| **offset <= at_ms)
                        .map(|(process, offset)| (*offset, *process))
                        .collect();
                    expected.sort();
                    model.retain(|_, offset| *offset > at_ms);
                    let expected: Vec<_> = expected.into_iter().map(|(_, p)| id_of(p)).collect();
                    prop_assert_eq!(due, expected);
                }
            }

            prop_assert_eq!(scheduler.len(), model.len());
            let earliest = model.values().min().map(|ms| base + Duration::from_millis(*ms as u64));
            prop_assert_eq!(scheduler.next_deadline(), earliest);
        }
    }
}
