//! Configuration for the vigil runtime.
//!
//! Every field has a default, so an empty JSON object is a valid config.
//! `VigilConfig::load` reads the file named by `VIGIL_CONFIG` when set.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::monitor::alerts::{LadderError, SeverityLadder};
use crate::monitor::recorder::{DEFAULT_OPERATION_CAPACITY, DEFAULT_SAMPLE_CAPACITY};

pub const CONFIG_ENV_VAR: &str = "VIGIL_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid severity ladder: {0}")]
    Ladder(#[from] LadderError),

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("threshold for operation '{operation}' must be at least 1ms")]
    ZeroThreshold { operation: String },
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct VigilConfig {
    pub monitor: MonitorConfig,
    pub scheduler: SchedulerConfig,
}

impl VigilConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// File named by `VIGIL_CONFIG`, or defaults when the variable is unset.
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.monitor.validate()?;
        self.scheduler.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    pub sample_period_ms: u64,
    pub sample_capacity: usize,
    pub operation_log_capacity: usize,

    /// Applies to operations without an entry in `operation_thresholds_ms`.
    /// `None` disables duration alerts for them.
    pub default_threshold_ms: Option<u64>,
    pub operation_thresholds_ms: HashMap<String, u64>,

    pub memory_threshold_bytes: Option<u64>,
    pub min_frame_rate: Option<f64>,

    pub severity_ladder: SeverityLadder,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_period_ms: 5_000,
            sample_capacity: DEFAULT_SAMPLE_CAPACITY,
            operation_log_capacity: DEFAULT_OPERATION_CAPACITY,
            default_threshold_ms: Some(1_000),
            operation_thresholds_ms: HashMap::new(),
            memory_threshold_bytes: None,
            min_frame_rate: None,
            severity_ladder: SeverityLadder::default(),
        }
    }
}

impl MonitorConfig {
    pub fn sample_period(&self) -> Duration {
        Duration::from_millis(self.sample_period_ms)
    }

    /// Alert threshold for an operation name, if any.
    pub fn threshold_for(&self, operation: &str) -> Option<Duration> {
        self.operation_thresholds_ms
            .get(operation)
            .copied()
            .or(self.default_threshold_ms)
            .map(Duration::from_millis)
    }

    /// Thresholds are kept in whole milliseconds; a sub-millisecond `threshold`
    /// rounds up so it never collapses to zero.
    pub fn with_threshold(mut self, operation: impl Into<String>, threshold: Duration) -> Self {
        let millis = threshold.as_micros().div_ceil(1_000);
        self.operation_thresholds_ms
            .insert(operation.into(), u64::try_from(millis).unwrap_or(u64::MAX));
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_period_ms == 0 {
            return Err(ConfigError::Zero { field: "monitor.sample_period_ms" });
        }
        if self.sample_capacity == 0 {
            return Err(ConfigError::Zero { field: "monitor.sample_capacity" });
        }
        if self.operation_log_capacity == 0 {
            return Err(ConfigError::Zero { field: "monitor.operation_log_capacity" });
        }
        if self.default_threshold_ms == Some(0) {
            return Err(ConfigError::Zero { field: "monitor.default_threshold_ms" });
        }
        if let Some((operation, _)) = self.operation_thresholds_ms.iter().find(|(_, ms)| **ms == 0) {
            return Err(ConfigError::ZeroThreshold { operation: operation.clone() });
        }
        self.severity_ladder.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    pub auto_save_period_ms: u64,
    pub auto_save_max_retries: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            auto_save_period_ms: 30_000,
            auto_save_max_retries: 3,
        }
    }
}

impl SchedulerConfig {
    pub fn auto_save_period(&self) -> Duration {
        Duration::from_millis(self.auto_save_period_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auto_save_period_ms == 0 {
            return Err(ConfigError::Zero { field: "scheduler.auto_save_period_ms" });
        }
        Ok(())
    }
}
