use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::probe::{RuntimeProbe, SysinfoProbe};
use super::recorder::HealthRecorder;
use super::types::{AlertRecord, MetricSample, OperationRecord, Outcome, SamplingSession};
use crate::config::{ConfigError, MonitorConfig};
use crate::kernel::time::{as_millis_f64, now_ms};

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("metrics monitor has been shut down")]
    ShutDown,

    #[error("sampling period must be greater than zero")]
    InvalidPeriod,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Samples runtime health, times operations and raises threshold alerts.
///
/// Cheap to clone; all clones share one history. History is only readable
/// through the query methods.
#[derive(Clone)]
pub struct MetricsMonitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    config: MonitorConfig,
    probe: Box<dyn RuntimeProbe>,
    active_operations: AtomicUsize,
    state: Mutex<MonitorState>,
}

struct MonitorState {
    recorder: HealthRecorder,
    sampler: Option<Sampler>,
    frames_since_sample: u64,
    last_sample_at: Instant,
    shut_down: bool,
}

struct Sampler {
    session: SamplingSession,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl MetricsMonitor {
    /// Monitor probing process memory through `sysinfo`.
    pub fn new(config: MonitorConfig) -> Result<Self, MonitorError> {
        Self::with_probe(config, SysinfoProbe::new())
    }

    pub fn with_probe(config: MonitorConfig, probe: impl RuntimeProbe) -> Result<Self, MonitorError> {
        config.validate()?;
        let recorder = HealthRecorder::new(config.sample_capacity, config.operation_log_capacity);

        Ok(Self {
            inner: Arc::new(MonitorInner {
                config,
                probe: Box::new(probe),
                active_operations: AtomicUsize::new(0),
                state: Mutex::new(MonitorState {
                    recorder,
                    sampler: None,
                    frames_since_sample: 0,
                    last_sample_at: Instant::now(),
                    shut_down: false,
                }),
            }),
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.inner.config
    }

    /// Start periodic sampling. While a sampler is running this returns its
    /// session instead of starting a second one.
    pub fn start_sampling(&self, period: Duration) -> Result<SamplingSession, MonitorError> {
        if period.is_zero() {
            return Err(MonitorError::InvalidPeriod);
        }

        let mut state = self.inner.lock();
        if state.shut_down {
            return Err(MonitorError::ShutDown);
        }
        if let Some(sampler) = &state.sampler {
            if !sampler.task.is_finished() {
                debug!(session = %sampler.session.id, "sampling already running");
                return Ok(sampler.session);
            }
        }

        let session = SamplingSession { id: Uuid::new_v4(), period };
        let token = CancellationToken::new();
        let task = tokio::spawn(run_sampler(Arc::downgrade(&self.inner), period, token.clone()));
        state.sampler = Some(Sampler { session, token, task });

        info!(session = %session.id, ?period, "metrics sampling started");
        Ok(session)
    }

    pub fn is_sampling(&self) -> bool {
        self.inner
            .lock()
            .sampler
            .as_ref()
            .is_some_and(|sampler| !sampler.task.is_finished())
    }

    /// Take one sample now. A probe failure leaves its field `None`.
    pub fn sample_now(&self) -> MetricSample {
        let memory_used_bytes = match self.inner.probe.memory_used_bytes() {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                debug!("memory probe unavailable: {}", e);
                None
            }
        };

        let mut state = self.inner.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_sample_at).as_secs_f64();
        let frames = std::mem::take(&mut state.frames_since_sample);
        state.last_sample_at = now;

        let frame_rate = (frames > 0 && elapsed > 0.0).then(|| frames as f64 / elapsed);

        let sample = MetricSample {
            timestamp_ms: now_ms(),
            memory_used_bytes,
            frame_rate,
            active_operations: self.inner.active_operations.load(Ordering::SeqCst),
        };

        if !state.shut_down {
            for alert in self.inner.sample_alerts(&sample) {
                warn!(metric = %alert.metric, severity = ?alert.severity, observed = alert.observed, "health threshold crossed");
                state.recorder.record_alert(alert);
            }
            state.recorder.record_sample(sample.clone());
        }

        sample
    }

    /// Count one rendered frame (or any unit of periodic progress) toward `frame_rate`.
    pub fn record_frame(&self) {
        self.inner.lock().frames_since_sample += 1;
    }

    /// Run `operation`, record how long it took and whether it failed, then hand
    /// back its result untouched.
    pub async fn measure_operation<F, Fut, T, E>(&self, name: &str, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let started_at_ms = now_ms();
        let started = Instant::now();

        let result = {
            let _active = ActiveOperation::enter(&self.inner.active_operations);
            operation().await
        };

        let outcome = if result.is_ok() { Outcome::Success } else { Outcome::Failure };
        self.record_operation(name, started_at_ms, started.elapsed(), outcome);
        result
    }

    /// Bookkeeping half of `measure_operation`, for callers that time work themselves.
    pub fn record_operation(&self, name: &str, started_at_ms: u64, duration: Duration, outcome: Outcome) {
        let mut state = self.inner.lock();
        if state.shut_down {
            return;
        }

        if let Some(threshold) = self.inner.config.threshold_for(name) {
            let ratio = duration.as_secs_f64() / threshold.as_secs_f64();
            if let Some(severity) = self.inner.config.severity_ladder.classify(ratio) {
                warn!(operation = name, ?duration, ?threshold, ?severity, "slow operation");
                state.recorder.record_alert(AlertRecord {
                    severity,
                    metric: name.to_string(),
                    threshold: as_millis_f64(threshold),
                    observed: as_millis_f64(duration),
                    timestamp_ms: now_ms(),
                });
            }
        }

        debug!(operation = name, ?duration, ?outcome, "operation recorded");
        state.recorder.record_operation(OperationRecord {
            name: name.to_string(),
            started_at_ms,
            duration,
            outcome,
        });
    }

    pub fn latest_metrics(&self) -> Option<MetricSample> {
        self.inner.lock().recorder.latest_sample()
    }

    /// Retained samples, oldest first.
    pub fn sample_history(&self) -> Vec<MetricSample> {
        self.inner.lock().recorder.samples()
    }

    /// Newest first. `None` returns everything retained.
    pub fn recent_operations(&self, limit: Option<usize>) -> Vec<OperationRecord> {
        self.inner.lock().recorder.recent_operations(limit)
    }

    /// Alerts since the last reset, in the order they were raised.
    pub fn alerts(&self) -> Vec<AlertRecord> {
        self.inner.lock().recorder.alerts().to_vec()
    }

    pub fn reset_alerts(&self) {
        self.inner.lock().recorder.clear_alerts();
    }

    pub fn active_operations(&self) -> usize {
        self.inner.active_operations.load(Ordering::SeqCst)
    }

    /// Stop sampling and clear alerts. Safe to call any number of times.
    pub fn cleanup(&self) {
        let mut state = self.inner.lock();
        if state.shut_down {
            return;
        }
        state.shut_down = true;
        if let Some(sampler) = state.sampler.take() {
            sampler.token.cancel();
        }
        state.recorder.clear_alerts();
        info!("metrics monitor shut down");
    }
}

impl MonitorInner {
    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn sample_alerts(&self, sample: &MetricSample) -> Vec<AlertRecord> {
        let ladder = &self.config.severity_ladder;
        let mut alerts = Vec::new();

        if let (Some(limit), Some(used)) = (self.config.memory_threshold_bytes, sample.memory_used_bytes) {
            if limit > 0 {
                if let Some(severity) = ladder.classify(used as f64 / limit as f64) {
                    alerts.push(AlertRecord {
                        severity,
                        metric: "memory_used_bytes".to_string(),
                        threshold: limit as f64,
                        observed: used as f64,
                        timestamp_ms: sample.timestamp_ms,
                    });
                }
            }
        }

        // Frame rate alerts when it drops *below* the floor, so the ratio is inverted.
        if let (Some(floor), Some(fps)) = (self.config.min_frame_rate, sample.frame_rate) {
            if fps < floor {
                let ratio = if fps <= 0.0 { f64::INFINITY } else { floor / fps };
                if let Some(severity) = ladder.classify(ratio) {
                    alerts.push(AlertRecord {
                        severity,
                        metric: "frame_rate".to_string(),
                        threshold: floor,
                        observed: fps,
                        timestamp_ms: sample.timestamp_ms,
                    });
                }
            }
        }

        alerts
    }
}

impl Drop for MonitorInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(sampler) = state.sampler.take() {
            sampler.token.cancel();
        }
    }
}

/// Keeps `active_operations` accurate even if the measured future is dropped mid-flight.
struct ActiveOperation<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> ActiveOperation<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for ActiveOperation<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn run_sampler(inner: Weak<MonitorInner>, period: Duration, token: CancellationToken) {
    let mut cadence = interval(period);
    cadence.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = cadence.tick() => {
                let Some(inner) = inner.upgrade() else { break };
                MetricsMonitor { inner }.sample_now();
            }
        }
    }

    debug!("sampler stopped");
}
