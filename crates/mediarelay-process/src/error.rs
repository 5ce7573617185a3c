//! Error types for process management

use std::io;
use thiserror::Error;

use mediarelay_pipe::PipeError;

use crate::controller::ControlAction;
use crate::info::ProcessId;

/// Process management errors
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The platform cannot perform this action; the strategy is skipped
    #[error("{action} is not supported on this platform")]
    UnsupportedPlatformAction { action: ControlAction },

    /// The action was attempted and failed; escalation falls through
    #[error("{action} failed for PID {pid}: {reason}")]
    TransientControlFailure {
        action: ControlAction,
        pid: u32,
        reason: String,
    },

    /// Every strategy was tried and the process is still alive
    #[error("Escalation exhausted for process {name} (PID: {pid})")]
    EscalationExhausted { name: String, pid: u32 },

    /// The child has already been waited on and has no PID
    #[error("Process has already exited")]
    AlreadyExited,

    /// Process not found
    #[error("Process not found ({id})")]
    NotFound { id: ProcessId },

    /// The manager has been shut down
    #[error("Process manager is shut down")]
    ShutDown,

    #[error(transparent)]
    Pipe(#[from] PipeError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ProcessError {
    pub(crate) fn unsupported(action: ControlAction) -> Self {
        ProcessError::UnsupportedPlatformAction { action }
    }

    pub(crate) fn transient(action: ControlAction, pid: u32, reason: impl Into<String>) -> Self {
        ProcessError::TransientControlFailure {
            action,
            pid,
            reason: reason.into(),
        }
    }

    /// Whether the error only means "try the next strategy"
    pub fn is_unsupported(&self) -> bool {
        matches!(self, ProcessError::UnsupportedPlatformAction { .. })
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Parse error: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Config file not found: {0}")]
    NotFound(String),
}

/// Result type for process operations
pub type Result<T> = std::result::Result<T, ProcessError>;
