//! Scripted controller shared by the scenario tests

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use mediarelay_process::{
    ControlAction, ControlTarget, ProcessController, ProcessError, ProcessEvent, Result,
};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// Controller that records calls and answers from a script
///
/// The process stays alive until an action listed in `stops_on` is performed.
#[derive(Debug, Default)]
pub struct ScriptedController {
    pub unsupported: HashSet<ControlAction>,
    pub failing: HashSet<ControlAction>,
    pub stops_on: HashSet<ControlAction>,
    pub calls: Mutex<Vec<ControlAction>>,
    pub gone: AtomicBool,
}

impl ScriptedController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unsupported(mut self, actions: &[ControlAction]) -> Self {
        self.unsupported.extend(actions.iter().copied());
        self
    }

    pub fn failing(mut self, actions: &[ControlAction]) -> Self {
        self.failing.extend(actions.iter().copied());
        self
    }

    pub fn stops_on(mut self, actions: &[ControlAction]) -> Self {
        self.stops_on.extend(actions.iter().copied());
        self
    }

    pub fn calls(&self) -> Vec<ControlAction> {
        self.calls.lock().clone()
    }

    fn answer(&self, action: ControlAction, target: &ControlTarget) -> Result<()> {
        if self.unsupported.contains(&action) {
            return Err(ProcessError::UnsupportedPlatformAction { action });
        }
        self.calls.lock().push(action);
        if self.failing.contains(&action) {
            return Err(ProcessError::TransientControlFailure {
                action,
                pid: target.pid,
                reason: "scripted failure".to_string(),
            });
        }
        if self.stops_on.contains(&action) {
            self.gone.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[async_trait]
impl ProcessController for ScriptedController {
    fn platform(&self) -> &'static str {
        "scripted"
    }

    fn supports(&self, action: ControlAction) -> bool {
        !self.unsupported.contains(&action)
    }

    async fn send_graceful_close(&self, target: &ControlTarget) -> Result<()> {
        self.answer(ControlAction::GracefulClose, target)
    }

    async fn send_control_signal(&self, target: &ControlTarget) -> Result<()> {
        self.answer(ControlAction::ControlSignal, target)
    }

    async fn force_kill_by_utility(&self, target: &ControlTarget) -> Result<()> {
        self.answer(ControlAction::KillByUtility, target)
    }

    async fn force_terminate(&self, target: &ControlTarget) -> Result<()> {
        self.answer(ControlAction::ForceTerminate, target)
    }

    async fn is_running(&self, _pid: u32) -> Option<bool> {
        Some(!self.gone.load(Ordering::SeqCst))
    }
}

/// Receive events until `done` matches, recording when each arrived
pub async fn collect_until(
    events: &mut broadcast::Receiver<ProcessEvent>,
    start: Instant,
    done: impl Fn(&ProcessEvent) -> bool,
) -> Vec<(Duration, ProcessEvent)> {
    let mut seen = Vec::new();
    loop {
        let event = events.recv().await.expect("event channel closed");
        let finished = done(&event);
        seen.push((start.elapsed(), event));
        if finished {
            return seen;
        }
    }
}
