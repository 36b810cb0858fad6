//! Timer primitive behind the task scheduler.
//!
//! The scheduler never touches tokio timers directly. It asks a [`Timer`] to run a
//! job after a delay and keeps the returned handle so the job can be cancelled.
//! Production code uses [`TokioTimer`]; tests drive [`ManualTimer`] by hand.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::trace;

use super::cancel::CancellationRegistry;

/// Work run when a timer fires.
pub type TimerJob = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub u64);

pub trait Timer: Send + Sync + 'static {
    /// Run `job` once after `delay`.
    fn schedule(&self, delay: Duration, job: TimerJob) -> TimerHandle;

    /// Cancel a pending timer. Returns false if it already fired, was already
    /// cancelled, or never existed.
    fn cancel(&self, handle: TimerHandle) -> bool;

    /// Number of timers armed and not yet fired.
    fn live_timers(&self) -> usize;
}

/// Timer backed by one spawned tokio task per armed timer.
///
/// Must be used from within a tokio runtime.
#[derive(Debug, Default)]
pub struct TokioTimer {
    next_key: AtomicU64,
    registry: Arc<CancellationRegistry>,
}

impl TokioTimer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Timer for TokioTimer {
    fn schedule(&self, delay: Duration, job: TimerJob) -> TimerHandle {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        let registry = Arc::clone(&self.registry);

        // Hold the map while spawning so the task cannot release its key
        // before it has been inserted.
        let mut handles = self.registry.lock();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Fired. From here on the job is not cancellable through the handle.
            registry.release(key);
            job.await;
        });
        handles.insert(key, task);
        trace!(key, ?delay, "timer armed");

        TimerHandle(key)
    }

    fn cancel(&self, handle: TimerHandle) -> bool {
        self.registry.abort(handle.0)
    }

    fn live_timers(&self) -> usize {
        self.registry.len()
    }
}

impl Drop for TokioTimer {
    fn drop(&mut self) {
        self.registry.abort_all();
    }
}

/// Virtual clock. Nothing fires until [`ManualTimer::advance`] is awaited.
#[derive(Default)]
pub struct ManualTimer {
    state: Mutex<ManualState>,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    next_key: u64,
    // Keyed by (due, key) so equal due times fire in arming order.
    pending: BTreeMap<(Duration, u64), TimerJob>,
    due_by_key: HashMap<u64, Duration>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Virtual time elapsed since creation.
    pub fn now(&self) -> Duration {
        self.lock().now
    }

    /// Virtual time at which the earliest armed timer fires.
    pub fn next_due(&self) -> Option<Duration> {
        self.lock().pending.keys().next().map(|(due, _)| *due)
    }

    /// Move the clock forward by `by`, running every job that falls due on the way
    /// in due order. Jobs armed while advancing fire too if they fall inside the window.
    pub async fn advance(&self, by: Duration) {
        let target = self.now() + by;

        loop {
            let job = {
                let mut state = self.lock();
                let next = state.pending.keys().next().copied();
                match next {
                    Some((due, key)) if due <= target => {
                        state.now = due;
                        state.due_by_key.remove(&key);
                        state.pending.remove(&(due, key))
                    }
                    _ => None,
                }
            };

            match job {
                Some(job) => job.await,
                None => break,
            }
        }

        self.lock().now = target;
    }
}

impl Timer for ManualTimer {
    fn schedule(&self, delay: Duration, job: TimerJob) -> TimerHandle {
        let mut state = self.lock();
        let key = state.next_key;
        state.next_key += 1;

        let due = state.now + delay;
        state.pending.insert((due, key), job);
        state.due_by_key.insert(key, due);

        TimerHandle(key)
    }

    fn cancel(&self, handle: TimerHandle) -> bool {
        let mut state = self.lock();
        match state.due_by_key.remove(&handle.0) {
            Some(due) => state.pending.remove(&(due, handle.0)).is_some(),
            None => false,
        }
    }

    fn live_timers(&self) -> usize {
        self.lock().pending.len()
    }
}
