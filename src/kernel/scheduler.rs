use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::timer::{Timer, TimerHandle, TokioTimer};
use crate::monitor::MetricsMonitor;

pub type TaskResult = anyhow::Result<()>;
pub type ErrorHandler = Arc<dyn Fn(anyhow::Error) + Send + Sync>;

type TaskFuture = Pin<Box<dyn Future<Output = TaskResult> + Send>>;
type TaskCallback = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("task scheduler has been shut down")]
    ShutDown,

    #[error("task '{name}' needs a period greater than zero")]
    InvalidPeriod { name: String },

    #[error("task '{name}' has an invalid backoff: {reason}")]
    InvalidBackoff { name: String, reason: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Recurring,
    Delayed,
    Retryable,
}

/// Returned on registration; pass it back to `stop_task`.
///
/// Carries the registration id, so a handle from before a name was re-registered
/// cannot stop the newer task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskHandle {
    pub name: String,
    pub id: Uuid,
}

/// Diagnostic view of a registered task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskDescriptor {
    pub name: String,
    pub id: Uuid,
    pub kind: TaskKind,
    pub period: Duration,
    pub max_retries: Option<u32>,
    /// Consecutive failures so far.
    pub failures: u32,
    pub runs: u64,
    pub in_flight: bool,
    pub active: bool,
}

/// Options for recurring tasks.
#[derive(Clone, Default)]
pub struct TaskOptions {
    /// Stop the task once consecutive failures exceed this.
    pub max_retries: Option<u32>,
    /// Called once with the error that stopped the task.
    pub on_error: Option<ErrorHandler>,
}

impl TaskOptions {
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn on_error(mut self, handler: impl Fn(anyhow::Error) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(handler));
        self
    }
}

/// Retry schedule for one-shot retryable tasks: attempt `n` (1-based) waits
/// `initial_delay * multiplier^(n-1)`, capped at `max_delay`.
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub on_error: Option<ErrorHandler>,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            on_error: None,
        }
    }

    pub fn backoff(mut self, initial_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self.multiplier = multiplier;
        self.max_delay = max_delay;
        self
    }

    pub fn on_error(mut self, handler: impl Fn(anyhow::Error) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(handler));
        self
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    fn validate(&self, name: &str) -> Result<(), SchedulerError> {
        let reason = if self.initial_delay.is_zero() {
            Some("initial delay must be greater than zero")
        } else if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            Some("multiplier must be finite and at least 1.0")
        } else if self.max_delay < self.initial_delay {
            Some("max delay is shorter than the initial delay")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(SchedulerError::InvalidBackoff { name: name.to_string(), reason }),
            None => Ok(()),
        }
    }
}

/// Owns every recurring, delayed and retryable background task.
///
/// Names are unique: registering a name that is already active stops the old
/// task first, so one logical name never has two timers. A task's next run is
/// armed only after its current run finishes, so a task never overlaps itself.
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    timer: Arc<dyn Timer>,
    monitor: Option<MetricsMonitor>,
    state: Mutex<Registry>,
}

#[derive(Default)]
struct Registry {
    tasks: HashMap<String, TaskEntry>,
    // Runs that were stopped or replaced mid-flight, by name. A name listed here
    // keeps its replacement unarmed until the old run settles.
    draining: HashMap<String, Uuid>,
    shut_down: bool,
}

struct TaskEntry {
    id: Uuid,
    kind: TaskKind,
    period: Duration,
    callback: TaskCallback,
    max_retries: Option<u32>,
    on_error: Option<ErrorHandler>,
    backoff: Option<RetryPolicy>,
    failures: u32,
    runs: u64,
    timer: Option<TimerHandle>,
    // First delay of a replacement waiting for the previous run to drain.
    deferred: Option<Duration>,
    in_flight: bool,
}

enum Settlement {
    Rearm(Duration),
    Finished,
    Exhausted(anyhow::Error),
}

impl TaskScheduler {
    pub fn new(timer: Arc<dyn Timer>) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                timer,
                monitor: None,
                state: Mutex::new(Registry::default()),
            }),
        }
    }

    /// Every invocation is reported to `monitor` as operation `task:<name>`.
    pub fn with_monitor(timer: Arc<dyn Timer>, monitor: MetricsMonitor) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                timer,
                monitor: Some(monitor),
                state: Mutex::new(Registry::default()),
            }),
        }
    }

    /// Scheduler on real tokio timers. Must be used inside a tokio runtime.
    pub fn tokio() -> Self {
        Self::new(Arc::new(TokioTimer::new()))
    }

    /// Run `callback` every `period`, first run one period from now.
    pub fn create_recurring_task<F, Fut>(
        &self,
        name: impl Into<String>,
        period: Duration,
        callback: F,
        options: TaskOptions,
    ) -> Result<TaskHandle, SchedulerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        let name = name.into();
        if period.is_zero() {
            return Err(SchedulerError::InvalidPeriod { name });
        }

        let entry = TaskEntry::new(TaskKind::Recurring, period, boxed(callback));
        let entry = TaskEntry {
            max_retries: options.max_retries,
            on_error: options.on_error,
            ..entry
        };
        self.register(name, entry, period)
    }

    /// Run `callback` once after `delay`. The task leaves the registry when it fires.
    pub fn create_delayed_task<F, Fut>(
        &self,
        name: impl Into<String>,
        delay: Duration,
        callback: F,
    ) -> Result<TaskHandle, SchedulerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        let entry = TaskEntry::new(TaskKind::Delayed, delay, boxed(callback));
        self.register(name.into(), entry, delay)
    }

    /// Run `callback` now and retry it with exponential backoff until it succeeds
    /// or `policy.max_retries` retries have failed.
    pub fn create_retryable_task<F, Fut>(
        &self,
        name: impl Into<String>,
        callback: F,
        policy: RetryPolicy,
    ) -> Result<TaskHandle, SchedulerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        let name = name.into();
        policy.validate(&name)?;

        let entry = TaskEntry::new(TaskKind::Retryable, policy.initial_delay, boxed(callback));
        let entry = TaskEntry {
            max_retries: Some(policy.max_retries),
            on_error: policy.on_error.clone(),
            backoff: Some(policy),
            ..entry
        };
        self.register(name, entry, Duration::ZERO)
    }

    /// Cancel a task. Unknown, stale and already stopped handles are ignored.
    /// Safe to call from inside the task's own callback.
    pub fn stop_task(&self, handle: &TaskHandle) -> bool {
        let mut registry = self.inner.lock();
        if !registry.tasks.get(&handle.name).is_some_and(|entry| entry.id == handle.id) {
            return false;
        }

        if let Some(entry) = registry.tasks.remove(&handle.name) {
            if let Some(timer) = entry.timer {
                self.inner.timer.cancel(timer);
            }
            if entry.in_flight {
                registry.draining.insert(handle.name.clone(), entry.id);
            }
        }
        debug!(task = %handle.name, "task stopped");
        true
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.inner.lock().tasks.contains_key(name)
    }

    /// Every live task, sorted by name.
    pub fn active_tasks(&self) -> Vec<TaskDescriptor> {
        let registry = self.inner.lock();
        let mut tasks: Vec<_> = registry
            .tasks
            .iter()
            .map(|(name, entry)| entry.describe(name))
            .collect();
        tasks.sort_by(|a, b| a.name.cmp(&b.name));
        tasks
    }

    /// Live recurring tasks only.
    pub fn active_intervals(&self) -> Vec<TaskDescriptor> {
        self.active_tasks()
            .into_iter()
            .filter(|task| task.kind == TaskKind::Recurring)
            .collect()
    }

    /// Stop everything. Further registrations fail with `ShutDown`.
    pub fn cleanup(&self) {
        let mut registry = self.inner.lock();
        let first = !registry.shut_down;
        registry.shut_down = true;

        let stopped = registry.tasks.len();
        registry.draining.clear();
        for (_, entry) in registry.tasks.drain() {
            if let Some(timer) = entry.timer {
                // Already fired or cancelled timers report false; nothing to do.
                self.inner.timer.cancel(timer);
            }
        }

        if first {
            info!(stopped, "task scheduler shut down");
        }
    }

    fn register(&self, name: String, mut entry: TaskEntry, first_delay: Duration) -> Result<TaskHandle, SchedulerError> {
        let mut registry = self.inner.lock();
        if registry.shut_down {
            return Err(SchedulerError::ShutDown);
        }

        if let Some(previous) = registry.tasks.remove(&name) {
            debug!(task = %name, "replacing active task with the same name");
            if let Some(timer) = previous.timer {
                self.inner.timer.cancel(timer);
            }
            if previous.in_flight {
                registry.draining.insert(name.clone(), previous.id);
            }
        }

        let id = entry.id;
        if registry.draining.contains_key(&name) {
            debug!(task = %name, "previous run still in flight, arming deferred");
            entry.deferred = Some(first_delay);
        } else {
            entry.timer = Some(self.inner.arm(&name, id, first_delay));
        }
        debug!(task = %name, kind = ?entry.kind, period = ?entry.period, "task registered");
        registry.tasks.insert(name.clone(), entry);

        Ok(TaskHandle { name, id })
    }
}

impl SchedulerInner {
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn arm(self: &Arc<Self>, name: &str, id: Uuid, delay: Duration) -> TimerHandle {
        let scheduler = Arc::downgrade(self);
        let name = name.to_string();
        self.timer.schedule(
            delay,
            Box::pin(async move {
                if let Some(scheduler) = scheduler.upgrade() {
                    scheduler.fire(name, id).await;
                }
            }),
        )
    }

    async fn fire(self: Arc<Self>, name: String, id: Uuid) {
        let callback = {
            let mut registry = self.lock();
            match registry.tasks.get_mut(&name) {
                Some(entry) if entry.id == id => {
                    entry.timer = None;
                    entry.in_flight = true;
                    Arc::clone(&entry.callback)
                }
                // Stopped or replaced after this timer was armed.
                _ => return,
            }
        };

        let result = match &self.monitor {
            Some(monitor) => {
                let label = format!("task:{name}");
                monitor.measure_operation(&label, || callback()).await
            }
            None => callback().await,
        };

        self.settle(&name, id, result);
    }

    /// Arm a replacement that was registered while its predecessor was running.
    fn arm_deferred(self: &Arc<Self>, registry: &mut Registry, name: &str) {
        if let Some(entry) = registry.tasks.get_mut(name) {
            if let Some(delay) = entry.deferred.take() {
                entry.timer = Some(self.arm(name, entry.id, delay));
                debug!(task = name, ?delay, "deferred task armed");
            }
        }
    }

    fn settle(self: &Arc<Self>, name: &str, id: Uuid, result: TaskResult) {
        let mut registry = self.lock();
        let Some(entry) = registry.tasks.get_mut(name).filter(|entry| entry.id == id) else {
            // Stopped or replaced during its own run.
            if let Err(e) = result {
                debug!(task = name, "stopped task failed on its last run: {:#}", e);
            }
            if registry.draining.get(name) == Some(&id) {
                registry.draining.remove(name);
                self.arm_deferred(&mut registry, name);
            }
            return;
        };

        entry.in_flight = false;
        entry.runs += 1;

        let settlement = match (entry.kind, result) {
            (TaskKind::Delayed, Ok(())) => Settlement::Finished,
            (TaskKind::Delayed, Err(e)) => {
                warn!(task = name, "delayed task failed: {:#}", e);
                Settlement::Finished
            }
            (TaskKind::Recurring, Ok(())) => {
                entry.failures = 0;
                Settlement::Rearm(entry.period)
            }
            (TaskKind::Recurring, Err(e)) => {
                entry.failures += 1;
                match entry.max_retries {
                    Some(max) if entry.failures > max => Settlement::Exhausted(e),
                    _ => {
                        warn!(task = name, failures = entry.failures, "recurring task failed: {:#}", e);
                        Settlement::Rearm(entry.period)
                    }
                }
            }
            (TaskKind::Retryable, Ok(())) => Settlement::Finished,
            (TaskKind::Retryable, Err(e)) => {
                entry.failures += 1;
                match &entry.backoff {
                    Some(policy) if entry.failures <= policy.max_retries => {
                        let delay = policy.delay_for(entry.failures);
                        warn!(task = name, attempt = entry.failures, ?delay, "retrying after failure: {:#}", e);
                        Settlement::Rearm(delay)
                    }
                    _ => Settlement::Exhausted(e),
                }
            }
        };

        match settlement {
            Settlement::Rearm(delay) => {
                let timer = self.arm(name, id, delay);
                if let Some(entry) = registry.tasks.get_mut(name) {
                    entry.timer = Some(timer);
                }
            }
            Settlement::Finished => {
                registry.tasks.remove(name);
                debug!(task = name, "task finished");
            }
            Settlement::Exhausted(e) => {
                let on_error = registry.tasks.remove(name).and_then(|entry| entry.on_error);
                drop(registry);

                error!(task = name, "task stopped after exhausting retries: {:#}", e);
                if let Some(on_error) = on_error {
                    on_error(e);
                }
            }
        }
    }
}

impl TaskEntry {
    fn new(kind: TaskKind, period: Duration, callback: TaskCallback) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            period,
            callback,
            max_retries: None,
            on_error: None,
            backoff: None,
            failures: 0,
            runs: 0,
            timer: None,
            deferred: None,
            in_flight: false,
        }
    }

    fn describe(&self, name: &str) -> TaskDescriptor {
        TaskDescriptor {
            name: name.to_string(),
            id: self.id,
            kind: self.kind,
            period: self.period,
            max_retries: self.max_retries,
            failures: self.failures,
            runs: self.runs,
            in_flight: self.in_flight,
            active: true,
        }
    }
}

fn boxed<F, Fut>(callback: F) -> TaskCallback
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TaskResult> + Send + 'static,
{
    Arc::new(move || Box::pin(callback()) as TaskFuture)
}
