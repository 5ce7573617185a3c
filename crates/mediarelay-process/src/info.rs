//! Registry records for managed processes

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;

use mediarelay_pipe::PipeEndpoint;

use crate::config::clamp_terminate_timeout;
use crate::state::ProcessState;

/// Identifier issued by the manager at registration; never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(pub(crate) u64);

impl ProcessId {
    /// Rebuild an id from [`as_u64`](Self::as_u64), e.g. a pipe owner tag
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Per-process settings supplied at registration
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    pub(crate) name: String,
    pub(crate) terminate_timeout: Option<Duration>,
    pub(crate) max_run_time: Option<Duration>,
}

impl ProcessOptions {
    /// Options for a process shown as `name` in logs
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            terminate_timeout: None,
            max_run_time: None,
        }
    }

    /// Time each stop strategy gets; at least 100 ms
    pub fn terminate_timeout(mut self, timeout: Duration) -> Self {
        self.terminate_timeout = Some(clamp_terminate_timeout(timeout));
        self
    }

    /// Stop the process automatically once it has run this long
    pub fn max_run_time(mut self, limit: Duration) -> Self {
        self.max_run_time = Some(limit);
        self
    }
}

/// Record of one managed process
#[derive(Debug)]
pub(crate) struct ProcessInfo {
    pub id: ProcessId,
    pub pid: u32,
    pub name: String,
    pub state: ProcessState,
    pub state_entered: Instant,
    pub started_at: Instant,
    pub terminate_timeout: Duration,
    pub pipes: Vec<PipeEndpoint>,
    pub stop_requested: bool,
    /// An escalation step for this process is running right now
    pub in_flight: bool,
    /// Asks the exit watcher to kill the owned child handle
    pub destroy: Option<mpsc::Sender<()>>,
}

impl ProcessInfo {
    pub fn new(id: ProcessId, pid: u32, name: String, terminate_timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            id,
            pid,
            name,
            state: ProcessState::Running,
            state_entered: now,
            started_at: now,
            terminate_timeout,
            pipes: Vec::new(),
            stop_requested: false,
            in_flight: false,
            destroy: None,
        }
    }

    /// Move to `next` if the escalation order allows it
    pub fn advance(&mut self, next: ProcessState) -> bool {
        if !self.state.can_advance_to(next) {
            return false;
        }
        self.state = next;
        self.state_entered = Instant::now();
        true
    }

    pub fn snapshot(&self) -> ProcessSnapshot {
        ProcessSnapshot {
            id: self.id,
            pid: self.pid,
            name: self.name.clone(),
            state: self.state,
            stop_requested: self.stop_requested,
            terminate_timeout_ms: self.terminate_timeout.as_millis() as u64,
            uptime_ms: self.started_at.elapsed().as_millis() as u64,
            in_state_ms: self.state_entered.elapsed().as_millis() as u64,
            pipes: self.pipes.iter().map(|p| p.name().to_string()).collect(),
        }
    }
}

/// Point-in-time view of a managed process
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessSnapshot {
    pub id: ProcessId,
    pub pid: u32,
    pub name: String,
    pub state: ProcessState,
    pub stop_requested: bool,
    pub terminate_timeout_ms: u64,
    pub uptime_ms: u64,
    pub in_state_ms: u64,
    pub pipes: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> ProcessInfo {
        ProcessInfo::new(ProcessId(1), 4242, "ffmpeg".to_string(), Duration::from_millis(100))
    }

    #[tokio::test(start_paused = true)]
    async fn test_advance_records_entry_time() {
        let mut info = info();
        let started = info.state_entered;
        tokio::time::advance(Duration::from_millis(30)).await;

        assert!(info.advance(ProcessState::CtrlC));
        assert_eq!(info.state, ProcessState::CtrlC);
        assert_eq!(info.state_entered - started, Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_advance_rejects_backwards() {
        let mut info = info();
        assert!(info.advance(ProcessState::Taskkill));
        assert!(!info.advance(ProcessState::WmClosed));
        assert_eq!(info.state, ProcessState::Taskkill);
        assert!(info.advance(ProcessState::Reaped));
        assert!(!info.advance(ProcessState::TerminateProcess));
    }

    #[test]
    fn test_options_clamp_timeout() {
        let options = ProcessOptions::new("mencoder").terminate_timeout(Duration::from_millis(5));
        assert_eq!(options.terminate_timeout, Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_process_id_display() {
        assert_eq!(ProcessId(7).to_string(), "#7");
    }
}
