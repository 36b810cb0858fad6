use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use vigil::config::MonitorConfig;
use vigil::monitor::{
    MetricsMonitor, MonitorError, Outcome, ProbeError, RuntimeProbe, Severity, UnsupportedProbe,
};

/// Reports whatever the test last stored; zero means "probe failed".
#[derive(Clone, Default)]
struct ScriptedProbe {
    bytes: Arc<AtomicU64>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedProbe {
    fn set(&self, bytes: u64) {
        self.bytes.store(bytes, Ordering::SeqCst);
    }
}

impl RuntimeProbe for ScriptedProbe {
    fn memory_used_bytes(&self) -> Result<u64, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.bytes.load(Ordering::SeqCst) {
            0 => Err(ProbeError::Failed("scripted outage".to_string())),
            bytes => Ok(bytes),
        }
    }
}

#[derive(Debug, PartialEq)]
struct RenderError(&'static str);

fn quiet_monitor(config: MonitorConfig) -> MetricsMonitor {
    MetricsMonitor::with_probe(config, UnsupportedProbe).unwrap()
}

#[tokio::test]
async fn test_sample_history_keeps_newest_hundred() {
    let monitor = quiet_monitor(MonitorConfig::default());

    for _ in 0..150 {
        monitor.sample_now();
    }

    let history = monitor.sample_history();
    assert_eq!(history.len(), 100);
    assert_eq!(monitor.latest_metrics().as_ref(), history.last());
    assert!(history.windows(2).all(|w| w[0].timestamp_ms <= w[1].timestamp_ms));
}

#[tokio::test]
async fn test_unsupported_probe_leaves_memory_unset() {
    let monitor = quiet_monitor(MonitorConfig::default());

    let sample = monitor.sample_now();
    assert_eq!(sample.memory_used_bytes, None);
    assert_eq!(sample.frame_rate, None);
    assert_eq!(sample.active_operations, 0);
    assert!(monitor.alerts().is_empty());
}

#[tokio::test]
async fn test_probe_outage_affects_only_that_sample() {
    let probe = ScriptedProbe::default();
    let monitor = MetricsMonitor::with_probe(MonitorConfig::default(), probe.clone()).unwrap();

    probe.set(4096);
    assert_eq!(monitor.sample_now().memory_used_bytes, Some(4096));
    probe.set(0);
    assert_eq!(monitor.sample_now().memory_used_bytes, None);
    probe.set(8192);
    assert_eq!(monitor.sample_now().memory_used_bytes, Some(8192));

    assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
    assert_eq!(monitor.sample_history().len(), 3);
}

#[tokio::test]
async fn test_memory_alerts_follow_severity_ladder() {
    let probe = ScriptedProbe::default();
    let config = MonitorConfig {
        memory_threshold_bytes: Some(1_000),
        ..MonitorConfig::default()
    };
    let monitor = MetricsMonitor::with_probe(config, probe.clone()).unwrap();

    for bytes in [500, 1_000, 2_500, 9_000] {
        probe.set(bytes);
        monitor.sample_now();
    }

    let alerts = monitor.alerts();
    let raised: Vec<(Severity, f64)> = alerts.iter().map(|a| (a.severity, a.observed)).collect();
    assert_eq!(raised, vec![(Severity::Medium, 2_500.0), (Severity::Critical, 9_000.0)]);
    assert!(alerts.iter().all(|a| a.metric == "memory_used_bytes" && a.threshold == 1_000.0));

    monitor.reset_alerts();
    assert!(monitor.alerts().is_empty());
    assert_eq!(monitor.sample_history().len(), 4, "reset only touches alerts");
}

#[tokio::test]
async fn test_measure_operation_passes_results_through() {
    let monitor = quiet_monitor(MonitorConfig::default());

    let value = monitor
        .measure_operation("parse_portfolio", || async { Ok::<_, RenderError>(42) })
        .await;
    assert_eq!(value, Ok(42));

    let failed = monitor
        .measure_operation("render_chart", || async { Err::<u32, _>(RenderError("no canvas")) })
        .await;
    assert_eq!(failed, Err(RenderError("no canvas")));

    let ops = monitor.recent_operations(None);
    assert_eq!(ops.len(), 2);
    assert_eq!((ops[0].name.as_str(), ops[0].outcome), ("render_chart", Outcome::Failure));
    assert_eq!((ops[1].name.as_str(), ops[1].outcome), ("parse_portfolio", Outcome::Success));
}

#[tokio::test]
async fn test_recent_operations_newest_first_and_bounded() {
    let config = MonitorConfig {
        operation_log_capacity: 5,
        ..MonitorConfig::default()
    };
    let monitor = quiet_monitor(config);

    for i in 0..8 {
        monitor
            .measure_operation(&format!("op-{i}"), || async { Ok::<_, RenderError>(()) })
            .await
            .unwrap();
    }

    let names: Vec<String> = monitor.recent_operations(None).into_iter().map(|op| op.name).collect();
    assert_eq!(names, vec!["op-7", "op-6", "op-5", "op-4", "op-3"]);

    let limited: Vec<String> = monitor.recent_operations(Some(2)).into_iter().map(|op| op.name).collect();
    assert_eq!(limited, vec!["op-7", "op-6"]);
}

#[tokio::test]
async fn test_active_operations_counts_in_flight_work() {
    let monitor = quiet_monitor(MonitorConfig::default());
    let observer = monitor.clone();

    let seen = monitor
        .measure_operation("import", || async move { Ok::<_, RenderError>(observer.active_operations()) })
        .await
        .unwrap();

    assert_eq!(seen, 1);
    assert_eq!(monitor.active_operations(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_slow_operations_raise_graded_alerts() {
    let config = MonitorConfig::default().with_threshold("render", Duration::from_millis(100));
    let monitor = quiet_monitor(config);

    for millis in [50, 150, 250, 500, 900] {
        monitor
            .measure_operation("render", || async move {
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Ok::<_, RenderError>(())
            })
            .await
            .unwrap();
    }

    let severities: Vec<Severity> = monitor.alerts().iter().map(|a| a.severity).collect();
    assert_eq!(
        severities,
        vec![Severity::Low, Severity::Medium, Severity::High, Severity::Critical]
    );
    assert!(monitor.alerts().iter().all(|a| a.metric == "render" && a.threshold == 100.0));
    assert_eq!(monitor.recent_operations(None).len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_sub_millisecond_threshold_is_not_zero() {
    let config = MonitorConfig::default().with_threshold("fast", Duration::from_micros(500));
    let monitor = quiet_monitor(config);

    for millis in [1, 3] {
        monitor
            .measure_operation("fast", || async move {
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Ok::<_, RenderError>(())
            })
            .await
            .unwrap();
    }

    let alerts = monitor.alerts();
    assert_eq!(alerts.len(), 1, "a 1ms run sits exactly on the rounded threshold");
    assert_eq!(alerts[0].severity, Severity::Medium);
    assert_eq!(alerts[0].threshold, 1.0);
}

#[tokio::test(start_paused = true)]
async fn test_frame_rate_derived_from_recorded_frames() {
    let config = MonitorConfig {
        min_frame_rate: Some(60.0),
        ..MonitorConfig::default()
    };
    let monitor = quiet_monitor(config);

    for _ in 0..30 {
        monitor.record_frame();
    }
    tokio::time::advance(Duration::from_secs(1)).await;

    let sample = monitor.sample_now();
    assert_eq!(sample.frame_rate, Some(30.0));

    let alerts = monitor.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].metric, "frame_rate");
    assert_eq!(alerts[0].severity, Severity::Low);

    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(monitor.sample_now().frame_rate, None, "no frames since last sample");
}

#[tokio::test(start_paused = true)]
async fn test_start_sampling_is_idempotent() {
    let monitor = quiet_monitor(MonitorConfig::default());

    let first = monitor.start_sampling(Duration::from_millis(100)).unwrap();
    let second = monitor.start_sampling(Duration::from_millis(250)).unwrap();
    assert_eq!(first, second);
    assert!(monitor.is_sampling());

    tokio::time::sleep(Duration::from_millis(350)).await;
    let taken = monitor.sample_history().len();
    assert!((3..=4).contains(&taken), "expected one sampler at 100ms, got {taken} samples");

    monitor.cleanup();
}

#[tokio::test]
async fn test_zero_sampling_period_rejected() {
    let monitor = quiet_monitor(MonitorConfig::default());
    assert!(matches!(
        monitor.start_sampling(Duration::ZERO),
        Err(MonitorError::InvalidPeriod)
    ));
    assert!(!monitor.is_sampling());
}

#[tokio::test]
async fn test_cleanup_is_idempotent_and_stops_recording() {
    let probe = ScriptedProbe::default();
    probe.set(10_000);
    let config = MonitorConfig {
        memory_threshold_bytes: Some(1_000),
        ..MonitorConfig::default()
    };
    let monitor = MetricsMonitor::with_probe(config, probe).unwrap();

    monitor.start_sampling(Duration::from_secs(60)).unwrap();
    monitor.sample_now();
    assert!(!monitor.alerts().is_empty());

    monitor.cleanup();
    monitor.cleanup();

    assert!(!monitor.is_sampling());
    assert!(monitor.alerts().is_empty());
    assert!(matches!(
        monitor.start_sampling(Duration::from_secs(1)),
        Err(MonitorError::ShutDown)
    ));

    let before = monitor.sample_history().len();
    monitor.sample_now();
    let echoed = monitor
        .measure_operation("late", || async { Ok::<_, RenderError>("still runs") })
        .await;
    assert_eq!(echoed, Ok("still runs"));
    assert_eq!(monitor.sample_history().len(), before);
    assert!(monitor.recent_operations(None).iter().all(|op| op.name != "late"));
    assert!(monitor.alerts().is_empty());
}

#[test]
fn test_invalid_config_rejected() {
    let config = MonitorConfig {
        sample_capacity: 0,
        ..MonitorConfig::default()
    };
    assert!(matches!(
        MetricsMonitor::with_probe(config, UnsupportedProbe),
        Err(MonitorError::Config(_))
    ));
}
