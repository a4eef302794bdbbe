//! Engine configuration.
//!
//! Supports TOML config files, environment variable overrides, and defaults.

use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CollabError, Result};

/// Configuration for the authoritative change engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory for the change log, counters and store snapshot
    pub data_dir: PathBuf,
    /// Counter stream used for change log sequences
    pub counter_name: String,
    /// Whether commits are written to disk
    pub persist: bool,
    /// Maximum retry attempts for transient I/O errors
    pub persistence_max_retries: u32,
    /// Delay between retry attempts in milliseconds
    pub persistence_retry_delay_ms: u64,
    /// Per-channel buffer of the in-memory message bus
    pub channel_capacity: usize,
    /// Write a store snapshot every N commits (0 disables periodic snapshots)
    pub snapshot_interval_changes: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            counter_name: "changeCounter".to_string(),
            persist: false,
            persistence_max_retries: 3,
            persistence_retry_delay_ms: 100,
            channel_capacity: 1024,
            snapshot_interval_changes: 100,
        }
    }
}

impl EngineConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| CollabError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str)
            .map_err(|e| CollabError::Config(format!("Invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Applies environment variable overrides.
    /// Variables are prefixed with `COLLAB_`, e.g. `COLLAB_DATA_DIR=/path`.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = env::var("COLLAB_DATA_DIR") {
            self.data_dir = PathBuf::from(val);
        }
        if let Ok(val) = env::var("COLLAB_COUNTER_NAME") {
            self.counter_name = val;
        }
        if let Ok(val) = env::var("COLLAB_PERSIST") {
            self.persist = val
                .parse()
                .map_err(|_| CollabError::Config(format!("Invalid persist flag: {}", val)))?;
        }
        if let Ok(val) = env::var("COLLAB_PERSISTENCE_MAX_RETRIES") {
            self.persistence_max_retries = val.parse().map_err(|_| {
                CollabError::Config(format!("Invalid persistence_max_retries: {}", val))
            })?;
        }
        if let Ok(val) = env::var("COLLAB_CHANNEL_CAPACITY") {
            self.channel_capacity = val.parse().map_err(|_| {
                CollabError::Config(format!("Invalid channel_capacity: {}", val))
            })?;
        }
        if let Ok(val) = env::var("COLLAB_SNAPSHOT_INTERVAL") {
            self.snapshot_interval_changes = val.parse().map_err(|_| {
                CollabError::Config(format!("Invalid snapshot_interval_changes: {}", val))
            })?;
        }
        self.validate()
    }

    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.counter_name.trim().is_empty() {
            return Err(CollabError::Config("counter_name must not be empty".into()));
        }
        if self.channel_capacity == 0 {
            return Err(CollabError::Config(
                "channel_capacity must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
