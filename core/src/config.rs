//! Engine configuration: timeouts, queue sizes, liveness windows.
//!
//! Stored as YAML with every field optional. Durations are kept as
//! milliseconds on disk (`*_ms`) and exposed as `Duration` accessors.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Protocol banner sent in `HELLO`.
pub const PROTOCOL_VERSION: &str = "Jig/20 1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub test_timeout_ms: u64,
    pub scenario_timeout_ms: u64,
    pub scenario_start_timeout_ms: u64,
    pub scenario_success_timeout_ms: u64,
    pub scenario_failure_timeout_ms: u64,
    pub test_success_timeout_ms: u64,
    pub test_failure_timeout_ms: u64,
    /// Grace period for a killed process group to be reaped.
    pub termination_grace_ms: u64,
    pub bus_capacity: usize,
    pub sink_queue: usize,
    pub max_sink_failures: u32,
    pub pong_window_ms: u64,
    pub ping_interval_ms: u64,
    pub daemon_check_interval_ms: u64,
    /// Longest line or binary frame taken from a test's output.
    pub max_frame_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            test_timeout_ms: 3_600_000,
            scenario_timeout_ms: 7_200_000,
            scenario_start_timeout_ms: 10_000,
            scenario_success_timeout_ms: 10_000,
            scenario_failure_timeout_ms: 10_000,
            test_success_timeout_ms: 10_000,
            test_failure_timeout_ms: 10_000,
            termination_grace_ms: 5_000,
            bus_capacity: 4096,
            sink_queue: 1024,
            max_sink_failures: 3,
            pong_window_ms: 5_000,
            ping_interval_ms: 30_000,
            daemon_check_interval_ms: 5_000,
            max_frame_bytes: 1024 * 1024,
        }
    }
}

impl EngineConfig {
    pub fn test_timeout(&self) -> Duration {
        Duration::from_millis(self.test_timeout_ms)
    }

    pub fn scenario_timeout(&self) -> Duration {
        Duration::from_millis(self.scenario_timeout_ms)
    }

    pub fn scenario_start_timeout(&self) -> Duration {
        Duration::from_millis(self.scenario_start_timeout_ms)
    }

    pub fn scenario_success_timeout(&self) -> Duration {
        Duration::from_millis(self.scenario_success_timeout_ms)
    }

    pub fn scenario_failure_timeout(&self) -> Duration {
        Duration::from_millis(self.scenario_failure_timeout_ms)
    }

    pub fn test_success_timeout(&self) -> Duration {
        Duration::from_millis(self.test_success_timeout_ms)
    }

    pub fn test_failure_timeout(&self) -> Duration {
        Duration::from_millis(self.test_failure_timeout_ms)
    }

    pub fn termination_grace(&self) -> Duration {
        Duration::from_millis(self.termination_grace_ms)
    }

    pub fn pong_window(&self) -> Duration {
        Duration::from_millis(self.pong_window_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn daemon_check_interval(&self) -> Duration {
        Duration::from_millis(self.daemon_check_interval_ms)
    }

    /// Reject values that would stall the engine.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("test_timeout_ms", self.test_timeout_ms),
            ("scenario_timeout_ms", self.scenario_timeout_ms),
            ("pong_window_ms", self.pong_window_ms),
            ("ping_interval_ms", self.ping_interval_ms),
            ("daemon_check_interval_ms", self.daemon_check_interval_ms),
            ("bus_capacity", self.bus_capacity as u64),
            ("sink_queue", self.sink_queue as u64),
            ("max_sink_failures", self.max_sink_failures as u64),
            ("max_frame_bytes", self.max_frame_bytes as u64),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field: field.into(),
                    reason: "must be greater than zero".into(),
                });
            }
        }
        Ok(())
    }
}

/// Load and validate an `EngineConfig` from a YAML file.
pub fn load(path: &Path) -> Result<EngineConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        error: e.to_string(),
    })?;
    parse(&content)
}

/// Load `path` if it exists, otherwise fall back to defaults.
pub fn load_or_default(path: &Path) -> Result<EngineConfig, ConfigError> {
    if path.exists() {
        load(path)
    } else {
        Ok(EngineConfig::default())
    }
}

pub fn parse(content: &str) -> Result<EngineConfig, ConfigError> {
    if content.trim().is_empty() {
        return Ok(EngineConfig::default());
    }
    let config: EngineConfig = serde_yaml::from_str(content)?;
    config.validate()?;
    Ok(config)
}
