//! Pipe configuration

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::endpoint::{PipeDirection, PipeOptions};

/// Settings shared by every pipe the server opens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipeConfig {
    /// Directory for FIFOs; the system temp dir when unset (ignored on Windows)
    pub directory: Option<PathBuf>,
    /// Bytes read per chunk by [`drain`](crate::drain)
    pub chunk_size: usize,
    /// Chunks buffered between a bridge task and its consumer
    pub channel_capacity: usize,
    /// Retry interval while waiting for the child to open a FIFO for reading
    pub connect_poll_interval_ms: u64,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            directory: None,
            chunk_size: 64 * 1024,
            channel_capacity: 16,
            connect_poll_interval_ms: 20,
        }
    }
}

impl PipeConfig {
    pub fn connect_poll_interval(&self) -> Duration {
        Duration::from_millis(self.connect_poll_interval_ms.max(1))
    }

    /// Endpoint options carrying these settings
    pub fn options(&self, name: impl Into<String>, direction: PipeDirection) -> PipeOptions {
        let options =
            PipeOptions::new(name, direction).poll_interval(self.connect_poll_interval());
        match &self.directory {
            Some(dir) => options.directory(dir),
            None => options,
        }
    }

    /// Reject values that would stall the bridge tasks
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_size == 0 {
            return Err("pipe chunk_size must be greater than zero".to_string());
        }
        if self.channel_capacity == 0 {
            return Err("pipe channel_capacity must be greater than zero".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipeConfig::default();
        assert_eq!(config.chunk_size, 65536);
        assert_eq!(config.connect_poll_interval(), Duration::from_millis(20));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = PipeConfig {
            channel_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_deserialize_fills_defaults() {
        let config: PipeConfig = serde_json::from_str(r#"{"chunk_size": 4096}"#).unwrap();
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.channel_capacity, 16);
        assert!(config.directory.is_none());
    }
}
