use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_SERVER: &str = "http://localhost:8089/api";

/// Engine settings. Every field has a default, so a config file only needs
/// the values it changes.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Base URL of the transfer backend's REST API.
    pub server: String,
    pub poll_interval_ms: u64,
    /// Upper bound on one snapshot fetch. A fetch that runs over is treated
    /// as "no new information" for that cycle.
    pub fetch_timeout_ms: u64,
    /// Cycles an optimistic command may go unconfirmed before it is dropped.
    pub stale_after_cycles: u32,
    pub throughput_window_ms: u64,
    pub throughput_max_samples: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            poll_interval_ms: 500,
            fetch_timeout_ms: 2_000,
            stale_after_cycles: 3,
            throughput_window_ms: 3_000,
            throughput_max_samples: 16,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be positive".into()));
        }
        if self.fetch_timeout_ms == 0 {
            return Err(ConfigError::Invalid("fetch_timeout_ms must be positive".into()));
        }
        if self.stale_after_cycles == 0 {
            return Err(ConfigError::Invalid("stale_after_cycles must be at least 1".into()));
        }
        if self.throughput_max_samples < 2 {
            return Err(ConfigError::Invalid("throughput_max_samples must be at least 2".into()));
        }
        if self.throughput_window_ms < self.poll_interval_ms {
            return Err(ConfigError::Invalid(format!(
                "throughput_window_ms ({}) must cover at least one poll interval ({})",
                self.throughput_window_ms, self.poll_interval_ms
            )));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn throughput_window(&self) -> Duration {
        Duration::from_millis(self.throughput_window_ms)
    }
}
