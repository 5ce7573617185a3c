//! Per-OS process controllers

use std::ffi::OsStr;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info};

use crate::config::ControllerConfig;
use crate::controller::ProcessController;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::UnixController;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::WindowsController;

/// The controller for the host OS family
pub fn default_controller(config: &ControllerConfig) -> Arc<dyn ProcessController> {
    let helpers = config.resolve();

    #[cfg(unix)]
    let controller: Arc<dyn ProcessController> =
        Arc::new(UnixController::new(config.clone(), helpers));
    #[cfg(windows)]
    let controller: Arc<dyn ProcessController> =
        Arc::new(WindowsController::new(config.clone(), helpers));

    info!(platform = controller.platform(), "Process controller selected");
    controller
}

/// Outcome of running a helper executable
#[derive(Debug)]
pub(crate) enum HelperOutcome {
    Exited(ExitStatus),
    TimedOut,
}

/// Run a helper with null stdio, killing it if it outlives `timeout`
pub(crate) async fn run_helper<I, S>(
    program: &Path,
    args: I,
    timeout: Duration,
) -> std::io::Result<HelperOutcome>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()?;

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => Ok(HelperOutcome::Exited(status?)),
        Err(_) => {
            debug!(helper = %program.display(), "Helper timed out, killing it");
            let _ = child.start_kill();
            Ok(HelperOutcome::TimedOut)
        }
    }
}
