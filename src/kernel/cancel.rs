use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;

/// Tracks the tokio tasks backing live timers so they can be aborted by key.
///
/// A task must `release` its own entry once it stops being cancellable
/// (e.g. its sleep elapsed), otherwise `abort` would kill the job mid-run.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    handles: Mutex<HashMap<u64, JoinHandle<()>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Poisoning only means another holder panicked; the map is still usable.
    pub(crate) fn lock(&self) -> MutexGuard<'_, HashMap<u64, JoinHandle<()>>> {
        self.handles.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Drop the entry without aborting. Returns whether it was still tracked.
    pub fn release(&self, key: u64) -> bool {
        self.lock().remove(&key).is_some()
    }

    /// Abort the task under `key`. Unknown or already released keys are a no-op.
    pub fn abort(&self, key: u64) -> bool {
        match self.lock().remove(&key) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Abort everything still tracked.
    pub fn abort_all(&self) -> usize {
        let drained: Vec<_> = self.lock().drain().collect();
        let count = drained.len();
        for (_, handle) in drained {
            handle.abort();
        }
        count
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_abort_unknown_key_is_noop() {
        let registry = CancellationRegistry::new();
        assert!(!registry.abort(42));
        assert!(!registry.release(42));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_abort_all_drains() {
        let registry = CancellationRegistry::new();
        for key in 0..3 {
            let handle = tokio::spawn(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            });
            registry.lock().insert(key, handle);
        }
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.abort_all(), 3);
        assert!(registry.is_empty());
        assert_eq!(registry.abort_all(), 0);
    }
}
