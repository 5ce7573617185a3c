//! Ordered stop strategies and the policy that walks them

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::controller::{ControlAction, ControlTarget, ProcessController};
use crate::error::{ProcessError, Result};
use crate::state::ProcessState;

/// Minimum wait after a forced termination before giving up on the process
pub const TERMINATE_RECHECK_FLOOR: Duration = Duration::from_millis(500);

/// One way of stopping a process
#[async_trait]
pub trait StopStrategy: Send + Sync {
    /// State the process enters when the attempt succeeds
    fn target_state(&self) -> ProcessState;

    /// The primitive this strategy uses, for events and logs
    fn action(&self) -> ControlAction;

    fn is_supported(&self, controller: &dyn ProcessController) -> bool;

    async fn attempt(&self, controller: &dyn ProcessController, target: &ControlTarget) -> Result<()>;
}

/// A strategy backed by a single controller primitive
#[derive(Debug, Clone, Copy)]
pub struct PrimitiveStrategy {
    action: ControlAction,
    target_state: ProcessState,
}

impl PrimitiveStrategy {
    pub const fn new(action: ControlAction, target_state: ProcessState) -> Self {
        Self {
            action,
            target_state,
        }
    }
}

#[async_trait]
impl StopStrategy for PrimitiveStrategy {
    fn target_state(&self) -> ProcessState {
        self.target_state
    }

    fn action(&self) -> ControlAction {
        self.action
    }

    fn is_supported(&self, controller: &dyn ProcessController) -> bool {
        controller.supports(self.action)
    }

    async fn attempt(&self, controller: &dyn ProcessController, target: &ControlTarget) -> Result<()> {
        controller.perform(self.action, target).await
    }
}

/// What one escalation step did
#[derive(Debug, Default)]
pub struct StepReport {
    /// State reached by the first strategy that succeeded
    pub reached: Option<ProcessState>,
    /// Strategies passed over because the platform cannot perform them
    pub skipped: Vec<ControlAction>,
    /// Strategies that were attempted and failed
    pub failed: Vec<(ControlAction, ProcessError)>,
}

impl StepReport {
    pub fn is_exhausted(&self) -> bool {
        self.reached.is_none()
    }
}

/// Ordered list of stop strategies, least invasive first
#[derive(Clone)]
pub struct EscalationPolicy {
    strategies: Vec<Arc<dyn StopStrategy>>,
}

impl std::fmt::Debug for EscalationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.strategies.iter().map(|s| s.target_state()))
            .finish()
    }
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self::new(vec![
            Arc::new(PrimitiveStrategy::new(
                ControlAction::GracefulClose,
                ProcessState::WmClosed,
            )),
            Arc::new(PrimitiveStrategy::new(
                ControlAction::ControlSignal,
                ProcessState::CtrlC,
            )),
            Arc::new(PrimitiveStrategy::new(
                ControlAction::KillByUtility,
                ProcessState::Taskkill,
            )),
            Arc::new(PrimitiveStrategy::new(
                ControlAction::ForceTerminate,
                ProcessState::TerminateProcess,
            )),
        ])
    }
}

impl EscalationPolicy {
    /// Build a policy; strategies are ordered by their target state
    pub fn new(mut strategies: Vec<Arc<dyn StopStrategy>>) -> Self {
        strategies.retain(|s| {
            let state = s.target_state();
            state != ProcessState::Running && state != ProcessState::Reaped
        });
        strategies.sort_by_key(|s| s.target_state());
        Self { strategies }
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Try every strategy beyond `current`, stopping at the first success
    ///
    /// Unsupported strategies are skipped and failed attempts fall through to
    /// the next strategy, all within this call.
    pub async fn step(
        &self,
        current: ProcessState,
        controller: &dyn ProcessController,
        target: &ControlTarget,
    ) -> StepReport {
        let mut report = StepReport::default();

        for strategy in self.strategies.iter().filter(|s| s.target_state() > current) {
            let action = strategy.action();
            if !strategy.is_supported(controller) {
                trace!(pid = %target.pid, action = %action, "Strategy not supported, skipping");
                report.skipped.push(action);
                continue;
            }

            match strategy.attempt(controller, target).await {
                Ok(()) => {
                    debug!(
                        pid = %target.pid,
                        name = %target.name,
                        action = %action,
                        state = %strategy.target_state(),
                        "Stop strategy delivered"
                    );
                    report.reached = Some(strategy.target_state());
                    break;
                }
                Err(e) if e.is_unsupported() => {
                    trace!(pid = %target.pid, action = %action, "Strategy unsupported at runtime, skipping");
                    report.skipped.push(action);
                }
                Err(e) => {
                    debug!(pid = %target.pid, action = %action, error = %e, "Stop strategy failed");
                    report.failed.push((action, e));
                }
            }
        }

        report
    }
}

/// How long to wait in `state` before escalating again
pub fn recheck_delay(state: ProcessState, terminate_timeout: Duration) -> Duration {
    match state {
        ProcessState::TerminateProcess => terminate_timeout.max(TERMINATE_RECHECK_FLOOR),
        _ => terminate_timeout,
    }
}
