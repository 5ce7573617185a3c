//! Process manager - registry, scheduler loop and exit watchers

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use tokio::process::Child;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use mediarelay_pipe::{ConnectionState, PipeConfig, PipeDirection, PipeEndpoint, PipeHint};

use crate::config::{clamp_terminate_timeout, MediaRelayConfig, ProcessManagerConfig};
use crate::controller::{ControlTarget, ProcessController};
use crate::escalation::{recheck_delay, EscalationPolicy};
use crate::events::ProcessEvent;
use crate::info::{ProcessId, ProcessInfo, ProcessOptions, ProcessSnapshot};
use crate::platform::default_controller;
use crate::scheduler::TerminationScheduler;
use crate::state::ProcessState;
use crate::error::{ProcessError, Result};

/// Live processes plus their pending escalation entries
///
/// One lock covers both so that insert, reschedule, cancel and pop are atomic
/// with respect to the process records they refer to.
#[derive(Debug, Default)]
struct Registry {
    processes: HashMap<ProcessId, ProcessInfo>,
    scheduler: TerminationScheduler,
    /// Recently reaped processes, oldest first
    reaped: VecDeque<ProcessId>,
}

impl Registry {
    /// Schedule `id` unless a step for it is already running
    fn schedule(&mut self, id: ProcessId, deadline: Instant) -> bool {
        match self.processes.get(&id) {
            Some(info) if !info.in_flight => self.scheduler.schedule(deadline, id),
            _ => false,
        }
    }

    fn remember_reaped(&mut self, id: ProcessId, capacity: usize) {
        if capacity == 0 {
            return;
        }
        while self.reaped.len() >= capacity {
            self.reaped.pop_front();
        }
        self.reaped.push_back(id);
    }
}

struct Shared {
    config: ProcessManagerConfig,
    pipes: PipeConfig,
    controller: Arc<dyn ProcessController>,
    policy: EscalationPolicy,
    registry: Mutex<Registry>,
    wake: Notify,
    events: broadcast::Sender<ProcessEvent>,
    hints: mpsc::UnboundedSender<PipeHint>,
    live: watch::Sender<usize>,
    shutdown: CancellationToken,
    closed: AtomicBool,
    next_id: AtomicU64,
    runtime: Handle,
}

impl Shared {
    fn emit(&self, event: ProcessEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn insert(&self, pid: u32, options: ProcessOptions, destroy: Option<mpsc::Sender<()>>) -> ProcessId {
        let id = ProcessId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let terminate_timeout = options
            .terminate_timeout
            .unwrap_or_else(|| self.config.terminate_timeout());
        let mut info = ProcessInfo::new(id, pid, options.name.clone(), terminate_timeout);
        info.destroy = destroy;

        {
            let mut registry = self.registry.lock();
            registry.processes.insert(id, info);
            if let Some(limit) = options.max_run_time {
                registry.scheduler.schedule(Instant::now() + limit, id);
            }
            self.live.send_replace(registry.processes.len());
        }
        if options.max_run_time.is_some() {
            self.wake.notify_one();
        }

        info!(
            id = %id,
            pid = %pid,
            name = %options.name,
            terminate_timeout_ms = terminate_timeout.as_millis() as u64,
            max_run_time = ?options.max_run_time,
            "Process registered"
        );
        self.emit(ProcessEvent::Registered {
            id,
            pid,
            name: options.name,
        });
        id
    }

    fn request_stop(&self, id: ProcessId, timeout: Option<Duration>) -> bool {
        let terminate_timeout = {
            let mut registry = self.registry.lock();
            let info = match registry.processes.get_mut(&id) {
                Some(info) => info,
                None => {
                    trace!(id = %id, "Stop requested for unknown or reaped process");
                    return false;
                }
            };
            if info.state.is_terminal() || info.stop_requested || info.in_flight {
                trace!(id = %id, state = %info.state, "Process is already stopping");
                return false;
            }
            info.stop_requested = true;
            if let Some(timeout) = timeout {
                info.terminate_timeout = clamp_terminate_timeout(timeout);
            }
            let terminate_timeout = info.terminate_timeout;
            registry.scheduler.schedule(Instant::now(), id);
            terminate_timeout
        };

        self.wake.notify_one();
        debug!(id = %id, terminate_timeout_ms = terminate_timeout.as_millis() as u64, "Stop requested");
        self.emit(ProcessEvent::StopRequested {
            id,
            terminate_timeout_ms: terminate_timeout.as_millis() as u64,
        });
        true
    }

    /// Drop the record and its pending entry, optionally keeping it queryable as reaped
    fn remove(&self, id: ProcessId, reaped: bool) -> Option<ProcessInfo> {
        let mut registry = self.registry.lock();
        let removed = registry.processes.remove(&id);
        if removed.is_some() {
            registry.scheduler.cancel(id);
            if reaped {
                registry.remember_reaped(id, self.config.reaped_history);
            }
            self.live.send_replace(registry.processes.len());
        }
        removed
    }

    /// Record that the OS confirmed exit; releases owned pipes and drops the record
    fn mark_reaped(&self, id: ProcessId) {
        let Some(mut info) = self.remove(id, true) else {
            return;
        };
        let from = info.state;
        info.advance(ProcessState::Reaped);
        for pipe in info.pipes.drain(..) {
            self.release_pipe(pipe);
        }

        info!(
            id = %id,
            pid = %info.pid,
            name = %info.name,
            from = %from,
            uptime_ms = info.started_at.elapsed().as_millis() as u64,
            "Process reaped"
        );
        self.emit(ProcessEvent::Reaped { id, from });
    }

    /// Close an owned pipe whose owner is gone
    ///
    /// Pipes without a peer close at once. A connected pipe stays open until
    /// its reader or writer sees end of stream, and a half-open inbound pipe
    /// gets `pipe_connect_grace` for output the exited child left behind.
    fn release_pipe(&self, pipe: PipeEndpoint) {
        let state = pipe.state();
        let half_open = state == ConnectionState::Connecting && pipe.direction() == PipeDirection::Inbound;
        if state != ConnectionState::Connected && !half_open {
            pipe.close();
            return;
        }

        let grace = self.config.pipe_connect_grace();
        let shutdown = self.shutdown.clone();
        self.runtime.spawn(async move {
            let mut states = pipe.watch_state();
            if half_open {
                let settled = tokio::time::timeout(
                    grace,
                    states.wait_for(|s| *s != ConnectionState::Connecting),
                )
                .await
                .is_ok();
                if !settled {
                    trace!(pipe = %pipe.name(), "No output left on pipe of reaped process");
                    pipe.close();
                    return;
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => {}
                drained = async { states.wait_for(|s| *s != ConnectionState::Connected).await.is_ok() } => {
                    trace!(pipe = %pipe.name(), drained, "Pipe of reaped process released");
                }
            }
            pipe.close();
        });
    }

    /// Record the hint and return the pid to check for exit
    ///
    /// A hint never moves an escalation deadline; the process only leaves
    /// early when the liveness check confirms it is gone.
    fn on_pipe_hint(&self, hint: PipeHint) -> Option<u32> {
        let id = ProcessId(hint.owner);
        let pid = self.registry.lock().processes.get(&id).map(|info| info.pid);

        debug!(id = %id, pipe = %hint.pipe, kind = ?hint.kind, live = pid.is_some(), "Pipe hint");
        self.emit(ProcessEvent::PipeHint {
            id,
            pipe: hint.pipe,
            kind: hint.kind,
        });
        pid
    }

    /// Pop due entries and mark them in flight
    fn take_due(&self) -> Vec<ProcessId> {
        let mut registry = self.registry.lock();
        let due = registry.scheduler.pop_due(Instant::now());
        due.into_iter()
            .filter(|id| match registry.processes.get_mut(id) {
                Some(info) if !info.in_flight => {
                    info.in_flight = true;
                    true
                }
                _ => false,
            })
            .collect()
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.registry.lock().scheduler.next_deadline()
    }
}

/// Reap `id` early if its peer hung up because it exited
async fn check_after_hint(shared: Arc<Shared>, id: ProcessId, pid: u32) {
    if shared.controller.is_running(pid).await == Some(false) {
        debug!(id = %id, pid = %pid, "Process gone after pipe hint");
        shared.mark_reaped(id);
    }
}

/// One escalation step for `id`
async fn run_step(shared: Arc<Shared>, id: ProcessId) {
    let (target, current, max_run_time_expired) = {
        let mut registry = shared.registry.lock();
        let Some(info) = registry.processes.get_mut(&id) else {
            return;
        };
        let expired = !info.stop_requested;
        info.stop_requested = true;
        let target = ControlTarget {
            id,
            pid: info.pid,
            name: info.name.clone(),
        };
        (target, info.state, expired)
    };

    if max_run_time_expired {
        info!(id = %id, pid = %target.pid, name = %target.name, "Process exceeded its maximum run time");
        let timeout = shared
            .registry
            .lock()
            .processes
            .get(&id)
            .map(|info| info.terminate_timeout.as_millis() as u64)
            .unwrap_or_default();
        shared.emit(ProcessEvent::StopRequested {
            id,
            terminate_timeout_ms: timeout,
        });
    }

    if shared.controller.is_running(target.pid).await == Some(false) {
        debug!(id = %id, pid = %target.pid, "Liveness probe reports process gone");
        shared.mark_reaped(id);
        return;
    }

    let report = shared
        .policy
        .step(current, shared.controller.as_ref(), &target)
        .await;

    for action in &report.skipped {
        shared.emit(ProcessEvent::StrategySkipped { id, action: *action });
    }
    for (action, error) in &report.failed {
        warn!(id = %id, pid = %target.pid, action = %action, error = %error, "Stop strategy failed");
        shared.emit(ProcessEvent::StrategyFailed {
            id,
            action: *action,
            reason: error.to_string(),
        });
    }

    let mut registry = shared.registry.lock();
    let Some(info) = registry.processes.get_mut(&id) else {
        // Reaped while the step was running
        return;
    };
    info.in_flight = false;

    match report.reached {
        Some(next) => {
            info.advance(next);
            let delay = recheck_delay(next, info.terminate_timeout);
            registry.scheduler.schedule(Instant::now() + delay, id);
            drop(registry);

            info!(
                id = %id,
                pid = %target.pid,
                from = %current,
                to = %next,
                recheck_ms = delay.as_millis() as u64,
                "Process escalated"
            );
            shared.emit(ProcessEvent::Escalated {
                id,
                from: current,
                to: next,
            });
        }
        None => {
            let destroy = info.destroy.clone();
            drop(registry);

            let error = ProcessError::EscalationExhausted {
                name: target.name.clone(),
                pid: target.pid,
            };
            warn!(id = %id, state = %current, error = %error, "Stop strategies exhausted");
            shared.emit(ProcessEvent::Exhausted { id });
            match destroy {
                Some(destroy) => {
                    warn!(id = %id, pid = %target.pid, "Falling back to runtime kill");
                    let _ = destroy.try_send(());
                }
                None => {
                    warn!(id = %id, pid = %target.pid, "Process is not owned, giving up");
                    if let Some(mut info) = shared.remove(id, false) {
                        for pipe in info.pipes.drain(..) {
                            shared.release_pipe(pipe);
                        }
                    }
                }
            }
        }
    }
}

async fn run_scheduler(shared: Arc<Shared>, mut hints: mpsc::UnboundedReceiver<PipeHint>) {
    debug!("Termination scheduler started");
    let mut running: FuturesUnordered<BoxFuture<'static, ()>> = FuturesUnordered::new();

    loop {
        for id in shared.take_due() {
            running.push(run_step(shared.clone(), id).boxed());
        }

        let next = shared.next_deadline();
        let sleep = async move {
            match next {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => break,
            Some(()) = running.next(), if !running.is_empty() => {}
            Some(hint) = hints.recv() => {
                let id = ProcessId(hint.owner);
                if let Some(pid) = shared.on_pipe_hint(hint) {
                    running.push(check_after_hint(shared.clone(), id, pid).boxed());
                }
            }
            _ = shared.wake.notified() => {}
            _ = sleep => {}
        }
    }

    debug!(abandoned_steps = running.len(), "Termination scheduler stopped");
}

/// Wait for an owned child, killing the handle when escalation is exhausted
async fn watch_exit(shared: Arc<Shared>, id: ProcessId, mut child: Child, mut destroy: mpsc::Receiver<()>) {
    let waited = tokio::select! {
        status = child.wait() => Some(status),
        Some(()) = destroy.recv() => None,
    };

    let status = match waited {
        Some(status) => status,
        None => {
            warn!(id = %id, "Killing child through the runtime handle");
            if let Err(e) = child.start_kill() {
                warn!(id = %id, error = %e, "Runtime kill failed");
            }
            child.wait().await
        }
    };

    match status {
        Ok(status) => debug!(id = %id, status = %status, "Child exited"),
        Err(e) => warn!(id = %id, error = %e, "Error waiting for child"),
    }
    shared.mark_reaped(id);
}

/// Owns every transcoder child process and stops them on request
///
/// # Examples
/// ```no_run
/// use mediarelay_process::{MediaRelayConfig, ProcessManager, ProcessOptions};
/// use tokio::process::Command;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let manager = ProcessManager::new(MediaRelayConfig::default());
/// let child = Command::new("ffmpeg").args(["-i", "movie.mkv", "-f", "mpegts", "-"]).spawn()?;
/// let id = manager.register(child, ProcessOptions::new("ffmpeg"))?;
///
/// // client went away
/// manager.request_stop(id);
/// # Ok(())
/// # }
/// ```
pub struct ProcessManager {
    shared: Arc<Shared>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ProcessManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessManager")
            .field("platform", &self.shared.controller.platform())
            .field("processes", &self.len())
            .field("policy", &self.shared.policy)
            .finish()
    }
}

impl ProcessManager {
    /// Create a manager using the host platform's controller
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: MediaRelayConfig) -> Self {
        let controller = default_controller(&config.process.controller);
        Self::with_controller(config, controller)
    }

    /// Create a manager with an explicit controller
    pub fn with_controller(config: MediaRelayConfig, controller: Arc<dyn ProcessController>) -> Self {
        Self::with_policy(config, controller, EscalationPolicy::default())
    }

    /// Create a manager with an explicit controller and strategy list
    pub fn with_policy(
        config: MediaRelayConfig,
        controller: Arc<dyn ProcessController>,
        policy: EscalationPolicy,
    ) -> Self {
        let (events, _) = broadcast::channel(config.process.event_capacity.max(1));
        let (hints, hints_rx) = mpsc::unbounded_channel();
        let (live, _) = watch::channel(0);

        let shared = Arc::new(Shared {
            config: config.process,
            pipes: config.pipes,
            controller,
            policy,
            registry: Mutex::new(Registry::default()),
            wake: Notify::new(),
            events,
            hints,
            live,
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            runtime: Handle::current(),
        });

        let handle = tokio::spawn(run_scheduler(shared.clone(), hints_rx));
        info!(platform = shared.controller.platform(), "Process manager started");

        Self {
            shared,
            scheduler: Mutex::new(Some(handle)),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(ProcessError::ShutDown);
        }
        Ok(())
    }

    /// Take ownership of a spawned child and watch for its exit
    pub fn register(&self, child: Child, options: ProcessOptions) -> Result<ProcessId> {
        self.ensure_open()?;
        let pid = child.id().ok_or(ProcessError::AlreadyExited)?;
        let (destroy_tx, destroy_rx) = mpsc::channel(1);
        let id = self.shared.insert(pid, options, Some(destroy_tx));
        tokio::spawn(watch_exit(self.shared.clone(), id, child, destroy_rx));
        Ok(id)
    }

    /// Manage a process known only by pid
    ///
    /// Exit is learned from [`report_exit`](Self::report_exit) or from the
    /// controller's liveness probe at each escalation deadline.
    pub fn track(&self, pid: u32, options: ProcessOptions) -> Result<ProcessId> {
        self.ensure_open()?;
        Ok(self.shared.insert(pid, options, None))
    }

    /// Ask for the process to be stopped with its registered terminate timeout
    ///
    /// Returns `false` when nothing was scheduled: the process is unknown,
    /// already reaped, or already stopping.
    pub fn request_stop(&self, id: ProcessId) -> bool {
        self.shared.request_stop(id, None)
    }

    /// Like [`request_stop`](Self::request_stop) with a new terminate timeout
    pub fn request_stop_with_timeout(&self, id: ProcessId, terminate_timeout: Duration) -> bool {
        self.shared.request_stop(id, Some(terminate_timeout))
    }

    /// Out-of-band notification that the process exited
    pub fn report_exit(&self, id: ProcessId) {
        self.shared.mark_reaped(id);
    }

    /// Stop managing a process without stopping it
    pub fn unregister(&self, id: ProcessId) -> bool {
        match self.shared.remove(id, false) {
            Some(info) => {
                debug!(id = %id, pid = %info.pid, name = %info.name, "Process unregistered");
                true
            }
            None => false,
        }
    }

    pub fn is_alive(&self, id: ProcessId) -> bool {
        self.shared.registry.lock().processes.contains_key(&id)
    }

    /// Current state; recently reaped processes report `Reaped`
    pub fn current_state(&self, id: ProcessId) -> Option<ProcessState> {
        let registry = self.shared.registry.lock();
        if let Some(info) = registry.processes.get(&id) {
            return Some(info.state);
        }
        registry
            .reaped
            .contains(&id)
            .then_some(ProcessState::Reaped)
    }

    pub fn snapshot(&self, id: ProcessId) -> Option<ProcessSnapshot> {
        self.shared
            .registry
            .lock()
            .processes
            .get(&id)
            .map(ProcessInfo::snapshot)
    }

    /// Snapshots of every live process, ordered by id
    pub fn processes(&self) -> Vec<ProcessSnapshot> {
        let mut all: Vec<_> = self
            .shared
            .registry
            .lock()
            .processes
            .values()
            .map(ProcessInfo::snapshot)
            .collect();
        all.sort_by_key(|s| s.id);
        all
    }

    /// Number of live processes
    pub fn len(&self) -> usize {
        self.shared.registry.lock().processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of pending escalation entries
    pub fn pending_escalations(&self) -> usize {
        self.shared.registry.lock().scheduler.len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProcessEvent> {
        self.shared.events.subscribe()
    }

    /// Create a pipe endpoint, optionally owned by a managed process
    ///
    /// Owned endpoints report peer disconnects to this manager and are closed
    /// once the owner is reaped and their data is drained.
    pub fn open_pipe(
        &self,
        owner: Option<ProcessId>,
        name: &str,
        direction: PipeDirection,
        reconnect: bool,
    ) -> Result<PipeEndpoint> {
        self.ensure_open()?;
        let mut options = self.shared.pipes.options(name, direction).reconnect(reconnect);
        if let Some(id) = owner {
            if !self.is_alive(id) {
                return Err(ProcessError::NotFound { id });
            }
            options = options.owner(id.as_u64(), self.shared.hints.clone());
        }

        let endpoint = PipeEndpoint::open_with(options)?;

        if let Some(id) = owner {
            let attached = {
                let mut registry = self.shared.registry.lock();
                match registry.processes.get_mut(&id) {
                    Some(info) => {
                        info.pipes.push(endpoint.clone());
                        true
                    }
                    None => false,
                }
            };
            if !attached {
                // Owner was reaped while the pipe was being created
                endpoint.close();
                return Err(ProcessError::NotFound { id });
            }
        }

        debug!(owner = ?owner.map(|id| id.as_u64()), pipe = %name, direction = %direction, "Pipe opened");
        Ok(endpoint)
    }

    /// Close an endpoint and detach it from its owner
    pub fn close_pipe(&self, endpoint: &PipeEndpoint) {
        endpoint.close();
        if let Some(owner) = endpoint.owner() {
            let mut registry = self.shared.registry.lock();
            if let Some(info) = registry.processes.get_mut(&ProcessId(owner)) {
                info.pipes.retain(|p| !p.same_endpoint(endpoint));
            }
        }
    }

    /// Stop every process, wait for them to be reaped, and stop the scheduler
    ///
    /// Returns the processes still alive when the wait ran out.
    pub async fn shutdown_all(&self) -> Vec<ProcessId> {
        self.shared.closed.store(true, Ordering::Release);
        let cap = self.shared.config.shutdown_terminate_timeout();

        let stopping = {
            let mut registry = self.shared.registry.lock();
            let ids: Vec<ProcessId> = registry.processes.keys().copied().collect();
            let now = Instant::now();
            for id in &ids {
                if let Some(info) = registry.processes.get_mut(id) {
                    info.terminate_timeout = info.terminate_timeout.min(cap);
                    info.stop_requested = true;
                }
                registry.schedule(*id, now);
            }
            ids.len()
        };
        self.shared.wake.notify_one();
        info!(processes = stopping, "Shutting down all processes");

        let mut live = self.shared.live.subscribe();
        let drained = tokio::time::timeout(
            self.shared.config.shutdown_wait(),
            live.wait_for(|count| *count == 0),
        )
        .await
        .is_ok();

        self.shared.shutdown.cancel();
        let handle = self.scheduler.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Termination scheduler task failed");
            }
        }

        let remaining: Vec<ProcessId> = {
            let registry = self.shared.registry.lock();
            let mut ids: Vec<_> = registry.processes.keys().copied().collect();
            ids.sort();
            for id in &ids {
                if let Some(destroy) = registry.processes.get(id).and_then(|i| i.destroy.as_ref()) {
                    let _ = destroy.try_send(());
                }
            }
            ids
        };

        if drained {
            info!("All processes stopped");
        } else {
            warn!(remaining = remaining.len(), "Processes still alive after shutdown");
        }
        remaining
    }
}

impl Drop for ProcessManager {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ControlAction;
    use async_trait::async_trait;

    /// Accepts every primitive but never stops anything
    #[derive(Debug, Default)]
    struct InertController {
        calls: Mutex<Vec<ControlAction>>,
        gone: AtomicBool,
    }

    #[async_trait]
    impl ProcessController for InertController {
        fn platform(&self) -> &'static str {
            "inert"
        }

        fn supports(&self, _action: ControlAction) -> bool {
            true
        }

        async fn send_graceful_close(&self, _target: &ControlTarget) -> Result<()> {
            self.calls.lock().push(ControlAction::GracefulClose);
            Ok(())
        }

        async fn send_control_signal(&self, _target: &ControlTarget) -> Result<()> {
            self.calls.lock().push(ControlAction::ControlSignal);
            Ok(())
        }

        async fn force_kill_by_utility(&self, _target: &ControlTarget) -> Result<()> {
            self.calls.lock().push(ControlAction::KillByUtility);
            Ok(())
        }

        async fn force_terminate(&self, _target: &ControlTarget) -> Result<()> {
            self.calls.lock().push(ControlAction::ForceTerminate);
            Ok(())
        }

        async fn is_running(&self, _pid: u32) -> Option<bool> {
            Some(!self.gone.load(Ordering::SeqCst))
        }
    }

    fn manager(controller: Arc<InertController>) -> ProcessManager {
        crate::logging::init_test_tracing();
        ProcessManager::with_controller(MediaRelayConfig::default(), controller)
    }

    #[test]
    fn test_reaped_history_is_bounded() {
        let mut registry = Registry::default();
        for n in 0..5 {
            registry.remember_reaped(ProcessId(n), 3);
        }
        assert_eq!(
            registry.reaped.iter().copied().collect::<Vec<_>>(),
            vec![ProcessId(2), ProcessId(3), ProcessId(4)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_stop_unknown_is_noop() {
        let manager = manager(Arc::new(InertController::default()));
        assert!(!manager.request_stop(ProcessId(42)));
        assert_eq!(manager.pending_escalations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_request_is_noop() {
        let controller = Arc::new(InertController::default());
        let manager = manager(controller.clone());
        let id = manager.track(1234, ProcessOptions::new("ffmpeg")).unwrap();

        assert!(manager.request_stop(id));
        assert!(!manager.request_stop(id));
        assert_eq!(manager.pending_escalations(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_reports_gone() {
        let controller = Arc::new(InertController::default());
        controller.gone.store(true, Ordering::SeqCst);
        let manager = manager(controller.clone());
        let id = manager.track(1234, ProcessOptions::new("mplayer")).unwrap();
        let mut events = manager.subscribe();

        manager.request_stop(id);
        loop {
            if let ProcessEvent::Reaped { from, .. } = events.recv().await.unwrap() {
                assert_eq!(from, ProcessState::Running);
                break;
            }
        }
        assert!(controller.calls.lock().is_empty());
        assert_eq!(manager.current_state(id), Some(ProcessState::Reaped));
        assert!(!manager.is_alive(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_run_time_triggers_stop() {
        let controller = Arc::new(InertController::default());
        let manager = manager(controller.clone());
        let id = manager
            .track(
                1234,
                ProcessOptions::new("tsMuxeR").max_run_time(Duration::from_secs(10)),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(manager.current_state(id), Some(ProcessState::Running));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(manager.current_state(id), Some(ProcessState::WmClosed));
        assert!(!manager.request_stop(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_pipe_for_unknown_owner() {
        let manager = manager(Arc::new(InertController::default()));
        let result = manager.open_pipe(Some(ProcessId(99)), "orphan", PipeDirection::Inbound, false);
        assert!(matches!(result, Err(ProcessError::NotFound { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_after_shutdown_fails() {
        let manager = manager(Arc::new(InertController::default()));
        assert!(manager.shutdown_all().await.is_empty());
        assert!(matches!(
            manager.track(1, ProcessOptions::new("late")),
            Err(ProcessError::ShutDown)
        ));
    }
}
