//! Lifecycle states of a managed process

use std::fmt;

use serde::{Deserialize, Serialize};

/// Escalation stage of a managed process
///
/// Variants are declared in escalation order, so `Ord` compares how invasive
/// the last delivered stop request was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessState {
    /// No stop request delivered yet
    Running,
    /// Graceful close delivered (SIGTERM / WM_CLOSE)
    WmClosed,
    /// Control signal delivered (SIGINT / CTRL_C_EVENT)
    CtrlC,
    /// Kill utility ran successfully
    Taskkill,
    /// Forced termination delivered (SIGKILL / TerminateProcess)
    #[serde(rename = "TERMINATEPROCESS")]
    TerminateProcess,
    /// The OS confirmed the process exited
    Reaped,
}

impl ProcessState {
    /// All states, in escalation order
    pub const ALL: [ProcessState; 6] = [
        ProcessState::Running,
        ProcessState::WmClosed,
        ProcessState::CtrlC,
        ProcessState::Taskkill,
        ProcessState::TerminateProcess,
        ProcessState::Reaped,
    ];

    pub fn is_terminal(self) -> bool {
        self == ProcessState::Reaped
    }

    /// Whether moving from `self` to `next` respects the escalation order
    ///
    /// `Reaped` is reachable from every live state; otherwise states only move
    /// forward.
    pub fn can_advance_to(self, next: ProcessState) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == ProcessState::Reaped || next > self
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessState::Running => "RUNNING",
            ProcessState::WmClosed => "WM_CLOSED",
            ProcessState::CtrlC => "CTRL_C",
            ProcessState::Taskkill => "TASKKILL",
            ProcessState::TerminateProcess => "TERMINATEPROCESS",
            ProcessState::Reaped => "REAPED",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_only() {
        assert!(ProcessState::Running.can_advance_to(ProcessState::WmClosed));
        assert!(ProcessState::Running.can_advance_to(ProcessState::Taskkill));
        assert!(!ProcessState::CtrlC.can_advance_to(ProcessState::WmClosed));
        assert!(!ProcessState::CtrlC.can_advance_to(ProcessState::CtrlC));
    }

    #[test]
    fn test_reaped_from_anywhere_and_terminal() {
        for state in &ProcessState::ALL[..5] {
            assert!(state.can_advance_to(ProcessState::Reaped));
        }
        for state in ProcessState::ALL {
            assert!(!ProcessState::Reaped.can_advance_to(state));
        }
    }

    #[test]
    fn test_display_and_serde_names_match() {
        for state in ProcessState::ALL {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state));
        }
    }
}
