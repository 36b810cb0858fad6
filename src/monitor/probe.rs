use std::sync::Mutex;

use sysinfo::{Pid, ProcessesToUpdate, System};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error("probe not supported on this platform")]
    Unsupported,
    #[error("probe failed: {0}")]
    Failed(String),
}

/// Platform introspection used by the sampler. Failures degrade a single
/// sample field; they never stop sampling.
pub trait RuntimeProbe: Send + Sync + 'static {
    fn memory_used_bytes(&self) -> Result<u64, ProbeError>;
}

/// Resident memory of the current process, read through `sysinfo`.
pub struct SysinfoProbe {
    pid: Option<Pid>,
    system: Mutex<System>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            pid: sysinfo::get_current_pid().ok(),
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeProbe for SysinfoProbe {
    fn memory_used_bytes(&self) -> Result<u64, ProbeError> {
        let pid = self.pid.ok_or(ProbeError::Unsupported)?;
        let mut system = self
            .system
            .lock()
            .map_err(|_| ProbeError::Failed("sysinfo state poisoned".to_string()))?;

        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        system
            .process(pid)
            .map(|process| process.memory())
            .ok_or_else(|| ProbeError::Failed(format!("process {pid} not visible")))
    }
}

/// For platforms (and tests) without memory introspection.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedProbe;

impl RuntimeProbe for UnsupportedProbe {
    fn memory_used_bytes(&self) -> Result<u64, ProbeError> {
        Err(ProbeError::Unsupported)
    }
}
