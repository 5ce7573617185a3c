//! Signal-based process control

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::{debug, trace};

use super::{run_helper, HelperOutcome};
use crate::config::{ControllerConfig, ResolvedHelpers};
use crate::controller::{ControlAction, ControlTarget, ProcessController};
use crate::diagnostics::{describe_errno, describe_io};
use crate::error::{ProcessError, Result};

/// Controller for Linux, macOS and the BSDs
#[derive(Debug, Clone)]
pub struct UnixController {
    config: ControllerConfig,
    helpers: ResolvedHelpers,
}

impl UnixController {
    pub fn new(config: ControllerConfig, helpers: ResolvedHelpers) -> Self {
        Self { config, helpers }
    }

    fn signal(&self, action: ControlAction, target: &ControlTarget, signal: Signal) -> Result<()> {
        if !self.supports(action) {
            return Err(ProcessError::unsupported(action));
        }
        let pid = to_pid(action, target.pid)?;
        match kill(pid, signal) {
            Ok(()) => {
                debug!(pid = %target.pid, name = %target.name, signal = ?signal, "Sent signal");
                Ok(())
            }
            // Already gone; the next liveness probe reaps it
            Err(Errno::ESRCH) => {
                trace!(pid = %target.pid, signal = ?signal, "Signal target no longer exists");
                Ok(())
            }
            Err(errno) => Err(ProcessError::transient(
                action,
                target.pid,
                describe_errno(errno),
            )),
        }
    }
}

#[async_trait]
impl ProcessController for UnixController {
    fn platform(&self) -> &'static str {
        "unix"
    }

    fn supports(&self, action: ControlAction) -> bool {
        match action {
            ControlAction::GracefulClose => self.config.graceful_close,
            ControlAction::ControlSignal => self.config.control_signal,
            ControlAction::KillByUtility => self.helpers.kill_utility.is_some(),
            ControlAction::ForceTerminate => true,
        }
    }

    async fn send_graceful_close(&self, target: &ControlTarget) -> Result<()> {
        self.signal(ControlAction::GracefulClose, target, Signal::SIGTERM)
    }

    async fn send_control_signal(&self, target: &ControlTarget) -> Result<()> {
        self.signal(ControlAction::ControlSignal, target, Signal::SIGINT)
    }

    async fn force_kill_by_utility(&self, target: &ControlTarget) -> Result<()> {
        let action = ControlAction::KillByUtility;
        let utility = self
            .helpers
            .kill_utility
            .as_ref()
            .ok_or_else(|| ProcessError::unsupported(action))?;
        to_pid(action, target.pid)?;

        let pid = target.pid.to_string();
        let outcome = run_helper(utility, ["-KILL", pid.as_str()], self.config.probe_timeout())
            .await
            .map_err(|e| ProcessError::transient(action, target.pid, describe_io(&e)))?;

        match outcome {
            HelperOutcome::Exited(status) if status.success() => {
                debug!(pid = %target.pid, name = %target.name, "kill -KILL succeeded");
                Ok(())
            }
            HelperOutcome::Exited(status) => Err(ProcessError::transient(
                action,
                target.pid,
                format!("{} exited with {}", utility.display(), status),
            )),
            HelperOutcome::TimedOut => Err(ProcessError::transient(
                action,
                target.pid,
                format!("{} did not finish within {:?}", utility.display(), self.config.probe_timeout()),
            )),
        }
    }

    async fn force_terminate(&self, target: &ControlTarget) -> Result<()> {
        self.signal(ControlAction::ForceTerminate, target, Signal::SIGKILL)
    }

    async fn is_running(&self, pid: u32) -> Option<bool> {
        let pid = i32::try_from(pid).ok().filter(|p| *p > 0)?;
        match kill(Pid::from_raw(pid), None) {
            Ok(()) => Some(true),
            Err(Errno::ESRCH) => Some(false),
            // Exists but belongs to someone else
            Err(Errno::EPERM) => Some(true),
            Err(_) => None,
        }
    }
}

/// Reject pids that `kill(2)` would treat as process groups
fn to_pid(action: ControlAction, pid: u32) -> Result<Pid> {
    match i32::try_from(pid) {
        Ok(raw) if raw > 1 => Ok(Pid::from_raw(raw)),
        _ => Err(ProcessError::transient(action, pid, "refusing to signal this PID")),
    }
}
