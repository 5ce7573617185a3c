//! Win32 process control

use std::io;

use async_trait::async_trait;
use tracing::{debug, trace, warn};
use windows_sys::Win32::Foundation::{CloseHandle, BOOL, FALSE, HANDLE, HWND, LPARAM, STILL_ACTIVE, TRUE};
use windows_sys::Win32::System::Threading::{
    GetExitCodeProcess, OpenProcess, TerminateProcess, PROCESS_QUERY_LIMITED_INFORMATION,
    PROCESS_TERMINATE,
};
use windows_sys::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetWindowThreadProcessId, PostMessageW, WM_CLOSE,
};

use super::{run_helper, HelperOutcome};
use crate::config::{ControllerConfig, ResolvedHelpers};
use crate::controller::{ControlAction, ControlTarget, ProcessController};
use crate::diagnostics::{describe_io, describe_win32};
use crate::error::{ProcessError, Result};

const CTRL_C_EVENT: u32 = 0;
/// Exit code of the ctrl-sender helper when it cannot attach to the console
const CTRL_SENDER_ATTACH_FAILED: i32 = 1;

/// Controller for Windows
#[derive(Debug, Clone)]
pub struct WindowsController {
    config: ControllerConfig,
    helpers: ResolvedHelpers,
}

impl WindowsController {
    pub fn new(config: ControllerConfig, helpers: ResolvedHelpers) -> Self {
        Self { config, helpers }
    }

    async fn run(
        &self,
        action: ControlAction,
        target: &ControlTarget,
        program: &std::path::Path,
        args: &[&str],
    ) -> Result<std::process::ExitStatus> {
        let outcome = run_helper(program, args, self.config.probe_timeout())
            .await
            .map_err(|e| ProcessError::transient(action, target.pid, describe_io(&e)))?;
        match outcome {
            HelperOutcome::Exited(status) => Ok(status),
            HelperOutcome::TimedOut => Err(ProcessError::transient(
                action,
                target.pid,
                format!(
                    "{} did not finish within {:?}",
                    program.display(),
                    self.config.probe_timeout()
                ),
            )),
        }
    }
}

/// An owned process handle, closed on drop
struct ProcessHandle(HANDLE);

impl ProcessHandle {
    fn open(access: u32, pid: u32) -> io::Result<Self> {
        // SAFETY: OpenProcess has no memory-safety preconditions
        let handle = unsafe { OpenProcess(access, FALSE, pid) };
        if handle == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self(handle))
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        // SAFETY: the handle came from OpenProcess and is closed once
        unsafe {
            CloseHandle(self.0);
        }
    }
}

#[repr(C)]
struct WindowSearch {
    pid: u32,
    posted: u32,
}

unsafe extern "system" fn post_close(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let search = &mut *(lparam as *mut WindowSearch);
    let mut owner = 0u32;
    GetWindowThreadProcessId(hwnd, &mut owner);
    if owner == search.pid && PostMessageW(hwnd, WM_CLOSE, 0, 0) != 0 {
        search.posted += 1;
    }
    TRUE
}

fn os_failure(action: ControlAction, pid: u32, err: io::Error) -> ProcessError {
    let reason = match err.raw_os_error() {
        Some(code) => describe_win32(code as u32),
        None => err.to_string(),
    };
    ProcessError::transient(action, pid, reason)
}

#[async_trait]
impl ProcessController for WindowsController {
    fn platform(&self) -> &'static str {
        "windows"
    }

    fn supports(&self, action: ControlAction) -> bool {
        match action {
            ControlAction::GracefulClose => self.config.graceful_close,
            ControlAction::ControlSignal => self.helpers.ctrl_sender.is_some(),
            ControlAction::KillByUtility => self.helpers.kill_utility.is_some(),
            ControlAction::ForceTerminate => true,
        }
    }

    async fn send_graceful_close(&self, target: &ControlTarget) -> Result<()> {
        let action = ControlAction::GracefulClose;
        if !self.config.graceful_close {
            return Err(ProcessError::unsupported(action));
        }
        // Fails fast if the process is already gone or not ours
        let _handle = ProcessHandle::open(PROCESS_TERMINATE, target.pid)
            .map_err(|e| os_failure(action, target.pid, e))?;

        let mut search = WindowSearch {
            pid: target.pid,
            posted: 0,
        };
        // SAFETY: `search` outlives the EnumWindows call that hands it to the callback
        unsafe {
            EnumWindows(Some(post_close), &mut search as *mut WindowSearch as LPARAM);
        }

        if search.posted == 0 {
            trace!(pid = %target.pid, name = %target.name, "No windows to send WM_CLOSE to");
            return Err(ProcessError::transient(action, target.pid, "process has no top-level windows"));
        }
        debug!(pid = %target.pid, name = %target.name, windows = search.posted, "Posted WM_CLOSE");
        Ok(())
    }

    async fn send_control_signal(&self, target: &ControlTarget) -> Result<()> {
        let action = ControlAction::ControlSignal;
        let sender = self
            .helpers
            .ctrl_sender
            .clone()
            .ok_or_else(|| ProcessError::unsupported(action))?;
        let pid = target.pid.to_string();
        let event = CTRL_C_EVENT.to_string();

        let status = self.run(action, target, &sender, &[pid.as_str(), event.as_str()]).await?;
        match status.code() {
            Some(0) => {
                debug!(pid = %target.pid, name = %target.name, "Sent CTRL_C_EVENT");
                Ok(())
            }
            Some(CTRL_SENDER_ATTACH_FAILED) => Err(ProcessError::transient(
                action,
                target.pid,
                "ctrl sender could not attach to the process console",
            )),
            code => {
                warn!(pid = %target.pid, code = ?code, "Ctrl sender failed internally");
                Err(ProcessError::transient(
                    action,
                    target.pid,
                    format!("ctrl sender exited with {}", status),
                ))
            }
        }
    }

    async fn force_kill_by_utility(&self, target: &ControlTarget) -> Result<()> {
        let action = ControlAction::KillByUtility;
        let taskkill = self
            .helpers
            .kill_utility
            .clone()
            .ok_or_else(|| ProcessError::unsupported(action))?;
        let pid = target.pid.to_string();

        let status = self.run(action, target, &taskkill, &["/PID", pid.as_str()]).await?;
        if !status.success() {
            return Err(ProcessError::transient(
                action,
                target.pid,
                format!("taskkill exited with {}", status),
            ));
        }
        debug!(pid = %target.pid, name = %target.name, "taskkill succeeded");
        Ok(())
    }

    async fn force_terminate(&self, target: &ControlTarget) -> Result<()> {
        let action = ControlAction::ForceTerminate;
        let handle = ProcessHandle::open(PROCESS_TERMINATE, target.pid)
            .map_err(|e| os_failure(action, target.pid, e))?;

        // SAFETY: the handle is valid for the lifetime of `handle`
        let terminated = unsafe { TerminateProcess(handle.0, 1) };
        if terminated == 0 {
            return Err(os_failure(action, target.pid, io::Error::last_os_error()));
        }
        debug!(pid = %target.pid, name = %target.name, "TerminateProcess performed");
        Ok(())
    }

    async fn is_running(&self, pid: u32) -> Option<bool> {
        let handle = match ProcessHandle::open(PROCESS_QUERY_LIMITED_INFORMATION, pid) {
            Ok(handle) => handle,
            // No such process
            Err(e) if e.raw_os_error() == Some(87) => return Some(false),
            Err(_) => return None,
        };
        let mut code = 0u32;
        // SAFETY: `code` is a valid out pointer and the handle is open
        if unsafe { GetExitCodeProcess(handle.0, &mut code) } == 0 {
            return None;
        }
        Some(code == STILL_ACTIVE as u32)
    }
}
