use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// One health sample. `None` fields mean the probe is unavailable on this platform
/// or failed for this sample only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSample {
    pub timestamp_ms: u64,
    pub memory_used_bytes: Option<u64>,
    pub frame_rate: Option<f64>,
    pub active_operations: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationRecord {
    pub name: String,
    pub started_at_ms: u64,
    pub duration: Duration,
    pub outcome: Outcome,
}

/// Ordered: `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertRecord {
    pub severity: Severity,
    /// Operation name, or `memory_used_bytes` / `frame_rate` for sample alerts.
    pub metric: String,
    pub threshold: f64,
    pub observed: f64,
    pub timestamp_ms: u64,
}

/// Returned by `start_sampling`. Repeated calls while sampling return an equal session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingSession {
    pub id: Uuid,
    pub period: Duration,
}
