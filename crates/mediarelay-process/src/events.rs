//! Lifecycle events broadcast to subscribers

use serde::Serialize;

use mediarelay_pipe::HintKind;

use crate::controller::ControlAction;
use crate::info::ProcessId;
use crate::state::ProcessState;

/// Something that happened to a managed process
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProcessEvent {
    Registered {
        id: ProcessId,
        pid: u32,
        name: String,
    },
    StopRequested {
        id: ProcessId,
        terminate_timeout_ms: u64,
    },
    Escalated {
        id: ProcessId,
        from: ProcessState,
        to: ProcessState,
    },
    StrategySkipped {
        id: ProcessId,
        action: ControlAction,
    },
    StrategyFailed {
        id: ProcessId,
        action: ControlAction,
        reason: String,
    },
    /// Every strategy was tried and the process is still alive
    Exhausted { id: ProcessId },
    Reaped {
        id: ProcessId,
        from: ProcessState,
    },
    PipeHint {
        id: ProcessId,
        pipe: String,
        kind: HintKind,
    },
}

impl ProcessEvent {
    pub fn id(&self) -> ProcessId {
        match self {
            ProcessEvent::Registered { id, .. }
            | ProcessEvent::StopRequested { id, .. }
            | ProcessEvent::Escalated { id, .. }
            | ProcessEvent::StrategySkipped { id, .. }
            | ProcessEvent::StrategyFailed { id, .. }
            | ProcessEvent::Exhausted { id }
            | ProcessEvent::Reaped { id, .. }
            | ProcessEvent::PipeHint { id, .. } => *id,
        }
    }
}
