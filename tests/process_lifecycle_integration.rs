//! Real child processes stopped through the platform controller
//!
//! Exercises the whole path: registration, exit watching, signal delivery and
//! escalation past processes that ignore polite requests.

#![cfg(unix)]

use std::time::Duration;

use mediarelay_process::{
    MediaRelayConfig, ProcessEvent, ProcessManager, ProcessOptions, ProcessState,
};
use tokio::process::Command;
use tokio::sync::broadcast;

fn manager() -> ProcessManager {
    mediarelay_process::logging::init_test_tracing();
    ProcessManager::new(MediaRelayConfig::default())
}

fn spawn_sleep() -> tokio::process::Child {
    Command::new("sleep").arg("30").spawn().expect("Failed to spawn sleep")
}

async fn wait_reaped(
    events: &mut broadcast::Receiver<ProcessEvent>,
    limit: Duration,
) -> (ProcessState, Vec<ProcessState>) {
    tokio::time::timeout(limit, async {
        let mut escalations = Vec::new();
        loop {
            match events.recv().await.expect("event channel closed") {
                ProcessEvent::Escalated { to, .. } => escalations.push(to),
                ProcessEvent::Reaped { from, .. } => return (from, escalations),
                _ => {}
            }
        }
    })
    .await
    .expect("process was not reaped in time")
}

#[tokio::test]
async fn test_graceful_close_stops_sleep() {
    let manager = manager();
    let mut events = manager.subscribe();
    let id = manager
        .register(spawn_sleep(), ProcessOptions::new("sleep"))
        .unwrap();
    assert!(manager.is_alive(id));
    assert_eq!(manager.current_state(id), Some(ProcessState::Running));
    let snapshot = serde_json::to_value(manager.snapshot(id).unwrap()).unwrap();
    assert_eq!(snapshot["state"], "RUNNING");
    assert_eq!(snapshot["name"], "sleep");

    assert!(manager.request_stop_with_timeout(id, Duration::from_secs(5)));
    let (from, escalations) = wait_reaped(&mut events, Duration::from_secs(5)).await;

    // The exit watcher may reap before the step records WM_CLOSED
    assert!(escalations.iter().all(|s| *s == ProcessState::WmClosed));
    assert!(from <= ProcessState::WmClosed);
    assert!(!manager.is_alive(id));
    assert_eq!(manager.current_state(id), Some(ProcessState::Reaped));
    assert!(manager.shutdown_all().await.is_empty());
}

#[tokio::test]
async fn test_escalates_past_ignored_signals() {
    let manager = manager();
    let mut events = manager.subscribe();
    let child = Command::new("sh")
        .args(["-c", "trap '' TERM INT; exec sleep 30"])
        .spawn()
        .unwrap();
    let id = manager
        .register(
            child,
            ProcessOptions::new("stubborn").terminate_timeout(Duration::from_millis(100)),
        )
        .unwrap();

    // Let the shell install its traps before the first signal
    tokio::time::sleep(Duration::from_millis(200)).await;
    manager.request_stop(id);
    let (from, escalations) = wait_reaped(&mut events, Duration::from_secs(10)).await;

    assert_eq!(&escalations[..2], &[ProcessState::WmClosed, ProcessState::CtrlC]);
    assert!(from >= ProcessState::CtrlC, "reaped from {}", from);
    assert!(escalations.len() <= 4);
    assert!(manager.shutdown_all().await.is_empty());
}

#[tokio::test]
async fn test_natural_exit_is_reaped_without_stop() {
    let manager = manager();
    let mut events = manager.subscribe();
    let child = Command::new("true").spawn().unwrap();
    let id = manager.register(child, ProcessOptions::new("true")).unwrap();

    let (from, escalations) = wait_reaped(&mut events, Duration::from_secs(5)).await;
    assert_eq!(from, ProcessState::Running);
    assert!(escalations.is_empty());
    assert!(!manager.request_stop(id));
    assert_eq!(manager.pending_escalations(), 0);
}

#[tokio::test]
async fn test_max_run_time_stops_process() {
    let manager = manager();
    let mut events = manager.subscribe();
    let id = manager
        .register(
            spawn_sleep(),
            ProcessOptions::new("sleep").max_run_time(Duration::from_millis(100)),
        )
        .unwrap();

    let (from, _) = wait_reaped(&mut events, Duration::from_secs(5)).await;
    assert!(from <= ProcessState::WmClosed);
    assert!(!manager.is_alive(id));
}

#[tokio::test]
async fn test_shutdown_all_stops_everything() {
    let manager = manager();
    let ids: Vec<_> = (0..3)
        .map(|n| {
            manager
                .register(spawn_sleep(), ProcessOptions::new(format!("sleep-{}", n)))
                .unwrap()
        })
        .collect();
    let stubborn = Command::new("sh")
        .args(["-c", "trap '' TERM INT; exec sleep 30"])
        .spawn()
        .unwrap();
    let stubborn = manager
        .register(stubborn, ProcessOptions::new("stubborn"))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let remaining = manager.shutdown_all().await;

    assert!(remaining.is_empty(), "still alive: {:?}", remaining);
    for id in ids.into_iter().chain([stubborn]) {
        assert_eq!(manager.current_state(id), Some(ProcessState::Reaped));
    }
    assert!(manager.is_empty());
}

#[tokio::test]
async fn test_unregister_leaves_process_running() {
    let manager = manager();
    let mut child = spawn_sleep();
    let pid = child.id().unwrap();
    let id = manager.track(pid, ProcessOptions::new("sleep")).unwrap();

    assert!(manager.unregister(id));
    assert!(!manager.request_stop(id));
    assert_eq!(manager.current_state(id), None);
    assert!(child.try_wait().unwrap().is_none());

    child.kill().await.unwrap();
}
