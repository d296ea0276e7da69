//! Engine configuration.
//!
//! Every timing knob in the engine lives here with a serde default, so a
//! config file only needs to name the fields it overrides. Loaded from TOML
//! at the platform config path, or defaults when no file exists.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Timing and sizing parameters for detection, reading and shutdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Read timeout for an open link, also the reader's poll bound.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Sleep between empty polls in the reader loop.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Open timeout per detection attempt.
    #[serde(default = "default_open_timeout_ms")]
    pub open_timeout_ms: u64,

    /// Delay after opening a port before probing, for devices that reset
    /// on open.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// How many times to poll for a probe response per attempt.
    #[serde(default = "default_probe_poll_attempts")]
    pub probe_poll_attempts: u32,

    /// Sleep between probe response polls.
    #[serde(default = "default_probe_poll_interval_ms")]
    pub probe_poll_interval_ms: u64,

    /// Minimum decoded response length for a probe to count as a match.
    #[serde(default = "default_min_response_len")]
    pub min_response_len: usize,

    /// Consecutive read failures before a reader gives up.
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,

    /// How long disconnect waits for a reader thread before forcing the
    /// link closed.
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    /// Worker pool size for scanning many ports.
    #[serde(default = "default_scan_pool_size")]
    pub scan_pool_size: usize,
}

fn default_read_timeout_ms() -> u64 {
    50
}
fn default_poll_interval_ms() -> u64 {
    20
}
fn default_open_timeout_ms() -> u64 {
    250
}
fn default_settle_delay_ms() -> u64 {
    150
}
fn default_probe_poll_attempts() -> u32 {
    4
}
fn default_probe_poll_interval_ms() -> u64 {
    50
}
fn default_min_response_len() -> usize {
    2
}
fn default_max_consecutive_errors() -> u32 {
    5
}
fn default_stop_timeout_ms() -> u64 {
    1000
}
fn default_scan_pool_size() -> usize {
    4
}

impl Default for EngineConfig {
    fn default() -> Self {
        // Round-trips through serde so the defaults live in one place.
        toml::from_str("").unwrap_or_else(|_| unreachable!("empty config must deserialize"))
    }
}

impl EngineConfig {
    /// Load from a specific TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load from the platform config directory if a file exists there,
    /// otherwise fall back to defaults. Parse errors are not swallowed.
    pub fn load_or_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Platform config file location (e.g. `~/.config/serial-harvester/config.toml`).
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "serial-harvester")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
    pub fn probe_poll_interval(&self) -> Duration {
        Duration::from_millis(self.probe_poll_interval_ms)
    }
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Fast timings for tests: no settle delay, tight polls.
    #[doc(hidden)]
    pub fn fast_for_tests() -> Self {
        Self {
            read_timeout_ms: 5,
            poll_interval_ms: 1,
            open_timeout_ms: 20,
            settle_delay_ms: 0,
            probe_poll_attempts: 2,
            probe_poll_interval_ms: 1,
            min_response_len: 2,
            max_consecutive_errors: 3,
            stop_timeout_ms: 500,
            scan_pool_size: 2,
        }
    }
}
