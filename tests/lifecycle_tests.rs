use std::sync::Arc;
use std::time::Duration;

use vigil::config::MonitorConfig;
use vigil::kernel::{ManualTimer, SchedulerError, TaskOptions, TaskScheduler, Timer};
use vigil::loader::{LazyLoader, ModuleState};
use vigil::monitor::{MetricsMonitor, Outcome, UnsupportedProbe};
use vigil::{Runtime, VigilConfig};

fn manual_runtime() -> (Arc<ManualTimer>, Runtime) {
    let timer = Arc::new(ManualTimer::new());
    let monitor = MetricsMonitor::with_probe(MonitorConfig::default(), UnsupportedProbe).unwrap();
    let scheduler = TaskScheduler::with_monitor(timer.clone(), monitor.clone());
    (timer, Runtime::from_parts(monitor, scheduler, LazyLoader::new()))
}

#[tokio::test]
async fn test_shutdown_runs_exactly_once() {
    let (timer, runtime) = manual_runtime();

    runtime
        .scheduler()
        .create_recurring_task("auto-save", Duration::from_secs(30), || async { anyhow::Ok(()) }, TaskOptions::default())
        .unwrap();
    runtime.monitor().start_sampling(Duration::from_secs(5)).unwrap();
    runtime.loader().register_lazy_module("charting", || async { anyhow::Ok("sparkline") });
    runtime.loader().load_module::<&'static str>("charting").await.unwrap();

    assert!(!runtime.is_shut_down());
    assert!(runtime.shutdown());
    assert!(!runtime.shutdown());
    assert!(runtime.is_shut_down());

    assert!(runtime.scheduler().active_tasks().is_empty());
    assert_eq!(timer.live_timers(), 0);
    assert!(!runtime.monitor().is_sampling());
    assert_eq!(runtime.loader().module_state("charting"), Some(ModuleState::Unregistered));

    let err = runtime
        .scheduler()
        .create_delayed_task("late", Duration::from_secs(1), || async { anyhow::Ok(()) })
        .unwrap_err();
    assert!(matches!(err, SchedulerError::ShutDown));
}

#[tokio::test]
async fn test_dropping_runtime_shuts_components_down() {
    let (timer, runtime) = manual_runtime();
    let scheduler = runtime.scheduler().clone();
    let monitor = runtime.monitor().clone();

    scheduler
        .create_recurring_task("heartbeat", Duration::from_secs(1), || async { anyhow::Ok(()) }, TaskOptions::default())
        .unwrap();
    monitor.start_sampling(Duration::from_secs(1)).unwrap();

    drop(runtime);

    assert!(scheduler.active_tasks().is_empty());
    assert_eq!(timer.live_timers(), 0);
    assert!(!monitor.is_sampling());
}

#[tokio::test]
async fn test_visualization_flow_is_measured() {
    let (_timer, runtime) = manual_runtime();
    runtime.loader().register_lazy_module("charting", || async { anyhow::Ok(vec![1.0f64, 3.0, 2.0]) });

    let loader = runtime.loader().clone();
    let points = runtime
        .monitor()
        .measure_operation("generate_visualization", || async move {
            loader.load_module::<Vec<f64>>("charting").await
        })
        .await
        .unwrap();
    assert_eq!(points.len(), 3);

    let ops = runtime.monitor().recent_operations(Some(1));
    assert_eq!(ops[0].name, "generate_visualization");
    assert_eq!(ops[0].outcome, Outcome::Success);

    let missing = runtime
        .monitor()
        .measure_operation("export_pdf", || async { runtime.loader().load_module::<Vec<u8>>("pdf").await })
        .await;
    assert!(missing.is_err());
    assert_eq!(runtime.monitor().recent_operations(Some(1))[0].outcome, Outcome::Failure);
}

#[tokio::test]
async fn test_runtime_from_default_config() {
    let runtime = Runtime::new(&VigilConfig::default()).unwrap();

    let sample = runtime.monitor().sample_now();
    assert_eq!(sample.active_operations, 0);
    assert_eq!(runtime.monitor().sample_history().len(), 1);
    assert!(runtime.shutdown());
}
