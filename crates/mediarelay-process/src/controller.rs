//! The OS-facing seam of the termination machinery
//!
//! A [`ProcessController`] exposes the four stop primitives. Implementations
//! return [`ProcessError::UnsupportedPlatformAction`] for primitives they
//! cannot perform and [`ProcessError::TransientControlFailure`] when an
//! attempt fails; the escalation policy treats both as "move on".
//!
//! [`ProcessError::UnsupportedPlatformAction`]: crate::ProcessError::UnsupportedPlatformAction
//! [`ProcessError::TransientControlFailure`]: crate::ProcessError::TransientControlFailure

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::info::ProcessId;

/// A stop primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    GracefulClose,
    ControlSignal,
    KillByUtility,
    ForceTerminate,
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ControlAction::GracefulClose => "graceful close",
            ControlAction::ControlSignal => "control signal",
            ControlAction::KillByUtility => "kill by utility",
            ControlAction::ForceTerminate => "force terminate",
        };
        f.write_str(s)
    }
}

/// The process a primitive is aimed at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlTarget {
    pub id: ProcessId,
    pub pid: u32,
    pub name: String,
}

/// Platform process-control primitives
#[async_trait]
pub trait ProcessController: Send + Sync {
    /// Short platform tag used in logs
    fn platform(&self) -> &'static str;

    /// Whether `action` can be attempted at all on this host
    fn supports(&self, action: ControlAction) -> bool;

    /// SIGTERM on Unix, WM_CLOSE to the process' top-level windows on Windows
    async fn send_graceful_close(&self, target: &ControlTarget) -> Result<()>;

    /// SIGINT on Unix, CTRL_C_EVENT through the ctrl-sender helper on Windows
    async fn send_control_signal(&self, target: &ControlTarget) -> Result<()>;

    /// `kill -KILL` on Unix, `taskkill /PID` on Windows
    async fn force_kill_by_utility(&self, target: &ControlTarget) -> Result<()>;

    /// SIGKILL on Unix, TerminateProcess on Windows
    async fn force_terminate(&self, target: &ControlTarget) -> Result<()>;

    /// Liveness probe; `None` when the platform cannot tell
    async fn is_running(&self, _pid: u32) -> Option<bool> {
        None
    }

    /// Dispatch `action` to the matching primitive
    async fn perform(&self, action: ControlAction, target: &ControlTarget) -> Result<()> {
        match action {
            ControlAction::GracefulClose => self.send_graceful_close(target).await,
            ControlAction::ControlSignal => self.send_control_signal(target).await,
            ControlAction::KillByUtility => self.force_kill_by_utility(target).await,
            ControlAction::ForceTerminate => self.force_terminate(target).await,
        }
    }
}
