//! Process manager configuration
//!
//! Settings come from serde defaults, an optional TOML file and
//! `MEDIARELAY__*` environment variables, in that order of precedence.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::debug;

use mediarelay_pipe::PipeConfig;

use crate::error::ConfigError;

/// Environment variable prefix (`MEDIARELAY__PROCESS__TERMINATE_TIMEOUT_MS=500`)
pub const ENV_PREFIX: &str = "MEDIARELAY";

/// Lower bound for any terminate timeout
pub const MIN_TERMINATE_TIMEOUT: Duration = Duration::from_millis(100);

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaRelayConfig {
    pub process: ProcessManagerConfig,
    pub pipes: PipeConfig,
}

impl MediaRelayConfig {
    /// Load defaults, then `path` (if it exists), then the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path.to_path_buf()).required(false));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__"),
        );

        let config: MediaRelayConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        debug!(path = ?path, "Loaded configuration");
        Ok(config)
    }

    /// Load from an explicit file, failing if it is missing
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        Self::load(Some(path))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.process.validate()?;
        self.pipes.validate().map_err(ConfigError::Validation)
    }
}

/// Settings for the process manager and its scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessManagerConfig {
    /// Time each stop strategy gets before the next one fires
    pub terminate_timeout_ms: u64,
    /// Cap applied to every terminate timeout during `shutdown_all`
    pub shutdown_terminate_timeout_ms: u64,
    /// How long `shutdown_all` waits for processes to be reaped
    pub shutdown_wait_ms: u64,
    /// Number of reaped processes kept queryable
    pub reaped_history: usize,
    /// Buffer size of the event broadcast channel
    pub event_capacity: usize,
    /// How long a reaped owner's half-open inbound pipe may wait for its peer's data
    pub pipe_connect_grace_ms: u64,
    pub controller: ControllerConfig,
}

impl Default for ProcessManagerConfig {
    fn default() -> Self {
        Self {
            terminate_timeout_ms: 2000,
            shutdown_terminate_timeout_ms: 500,
            shutdown_wait_ms: 5000,
            reaped_history: 64,
            event_capacity: 256,
            pipe_connect_grace_ms: 1000,
            controller: ControllerConfig::default(),
        }
    }
}

impl ProcessManagerConfig {
    pub fn terminate_timeout(&self) -> Duration {
        clamp_terminate_timeout(Duration::from_millis(self.terminate_timeout_ms))
    }

    pub fn shutdown_terminate_timeout(&self) -> Duration {
        clamp_terminate_timeout(Duration::from_millis(self.shutdown_terminate_timeout_ms))
    }

    pub fn shutdown_wait(&self) -> Duration {
        Duration::from_millis(self.shutdown_wait_ms)
    }

    pub fn pipe_connect_grace(&self) -> Duration {
        Duration::from_millis(self.pipe_connect_grace_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_capacity == 0 {
            return Err(ConfigError::Validation(
                "event_capacity must be greater than 0".to_string(),
            ));
        }
        if self.shutdown_terminate_timeout_ms > self.shutdown_wait_ms {
            return Err(ConfigError::Validation(
                "shutdown_terminate_timeout_ms must not exceed shutdown_wait_ms".to_string(),
            ));
        }
        self.controller.validate()
    }
}

/// Which OS primitives the controller may use and where its helpers live
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Bound on helper executables and other blocking probes
    pub probe_timeout_ms: u64,
    /// Send SIGTERM / WM_CLOSE first
    pub graceful_close: bool,
    /// Send SIGINT / CTRL_C_EVENT
    pub control_signal: bool,
    /// Use the kill utility (`kill` / `taskkill`)
    pub kill_utility: bool,
    /// Explicit path to the kill utility; looked up on `PATH` when unset
    pub kill_utility_path: Option<PathBuf>,
    /// Helper that attaches to a console and raises CTRL_C_EVENT (Windows)
    pub ctrl_sender_path: Option<PathBuf>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 2000,
            graceful_close: true,
            control_signal: true,
            kill_utility: true,
            kill_utility_path: None,
            ctrl_sender_path: None,
        }
    }
}

/// Helper executables found by [`ControllerConfig::resolve`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedHelpers {
    pub kill_utility: Option<PathBuf>,
    pub ctrl_sender: Option<PathBuf>,
}

impl ControllerConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.probe_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "probe_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Locate the helper executables this platform needs
    ///
    /// A disabled or missing helper resolves to `None` and the matching stop
    /// strategy reports itself unsupported.
    pub fn resolve(&self) -> ResolvedHelpers {
        let kill_utility = if self.kill_utility {
            match &self.kill_utility_path {
                Some(path) => which::which(path).ok(),
                None => which::which(KILL_UTILITY).ok(),
            }
        } else {
            None
        };

        let ctrl_sender = if self.control_signal {
            self.ctrl_sender_path
                .as_ref()
                .and_then(|path| which::which(path).ok())
        } else {
            None
        };

        debug!(
            kill_utility = ?kill_utility,
            ctrl_sender = ?ctrl_sender,
            "Resolved process control helpers"
        );
        ResolvedHelpers {
            kill_utility,
            ctrl_sender,
        }
    }
}

#[cfg(unix)]
const KILL_UTILITY: &str = "kill";
#[cfg(windows)]
const KILL_UTILITY: &str = "taskkill";

/// Clamp a terminate timeout to the supported minimum
pub fn clamp_terminate_timeout(timeout: Duration) -> Duration {
    timeout.max(MIN_TERMINATE_TIMEOUT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = MediaRelayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.process.terminate_timeout(), Duration::from_secs(2));
        assert_eq!(
            config.process.shutdown_terminate_timeout(),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn test_terminate_timeout_is_clamped() {
        let config = ProcessManagerConfig {
            terminate_timeout_ms: 10,
            ..Default::default()
        };
        assert_eq!(config.terminate_timeout(), MIN_TERMINATE_TIMEOUT);
    }

    #[test]
    fn test_zero_probe_timeout_rejected() {
        let mut config = ProcessManagerConfig::default();
        config.controller.probe_timeout_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[process]\nterminate_timeout_ms = 750\n\n[process.controller]\nkill_utility = false\n\n[pipes]\nchunk_size = 8192"
        )
        .unwrap();

        let config = MediaRelayConfig::from_file(file.path()).unwrap();
        assert_eq!(config.process.terminate_timeout_ms, 750);
        assert!(!config.process.controller.kill_utility);
        assert_eq!(config.pipes.chunk_size, 8192);
        assert_eq!(config.process.reaped_history, 64);
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let result = MediaRelayConfig::from_file(Path::new("/nonexistent/mediarelay.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_disabled_kill_utility_resolves_to_none() {
        let config = ControllerConfig {
            kill_utility: false,
            ..Default::default()
        };
        assert!(config.resolve().kill_utility.is_none());
    }
}
