//! Runtime health monitoring.
//!
//! The monitor is a leaf component: it owns its sample ring, operation log and
//! alert list, and other components only ever call its public methods.

pub mod alerts;
pub mod monitor;
pub mod probe;
pub mod recorder;
pub mod types;

pub use alerts::{SeverityLadder, SeverityStep};
pub use monitor::{MetricsMonitor, MonitorError};
pub use probe::{ProbeError, RuntimeProbe, SysinfoProbe, UnsupportedProbe};
pub use types::*;
