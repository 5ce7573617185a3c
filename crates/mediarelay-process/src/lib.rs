//! # mediarelay-process
//!
//! **Purpose**: Lifecycle management for transcoder child processes
//!
//! Stops external decoders and transcoders reliably, even when they ignore
//! signals, have no window to close, or hang inside a driver.
//!
//! ## Features
//!
//! - **Escalating Termination**: graceful close → control signal → kill utility
//!   → forced termination, each with its own timeout
//! - **Retry Scheduler**: one deadline-ordered queue per manager, at most one
//!   pending entry per process
//! - **Exit Watching**: owned children are reaped as soon as they exit
//! - **Pipe Ownership**: named pipes tied to a process are closed once it is
//!   reaped and their data is drained; disconnects trigger an early exit check
//! - **Platform Controllers**: signals on Unix, Win32 calls and helpers on Windows
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use mediarelay_process::{MediaRelayConfig, ProcessManager, ProcessOptions};
//! use mediarelay_pipe::PipeDirection;
//! use tokio::process::Command;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MediaRelayConfig::load(None)?;
//! let manager = ProcessManager::new(config);
//!
//! let child = Command::new("ffmpeg").args(["-i", "in.mkv", "-f", "mpegts", "-"]).spawn()?;
//! let id = manager.register(
//!     child,
//!     ProcessOptions::new("ffmpeg").terminate_timeout(Duration::from_millis(500)),
//! )?;
//! let pipe = manager.open_pipe(Some(id), "ffmpeg-out", PipeDirection::Inbound, false)?;
//!
//! // ... stream from `pipe` until the client disconnects ...
//!
//! manager.request_stop(id);
//! manager.shutdown_all().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod controller;
pub mod diagnostics;
pub mod error;
pub mod escalation;
pub mod events;
pub mod info;
pub mod logging;
pub mod manager;
pub mod platform;
pub mod scheduler;
pub mod state;

pub use config::{ControllerConfig, MediaRelayConfig, ProcessManagerConfig};
pub use controller::{ControlAction, ControlTarget, ProcessController};
pub use error::{ConfigError, ProcessError, Result};
pub use escalation::{EscalationPolicy, PrimitiveStrategy, StopStrategy};
pub use events::ProcessEvent;
pub use info::{ProcessId, ProcessOptions, ProcessSnapshot};
pub use manager::ProcessManager;
pub use platform::default_controller;
pub use scheduler::TerminationScheduler;
pub use state::ProcessState;
