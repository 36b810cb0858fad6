use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::config::VigilConfig;
use crate::kernel::{TaskScheduler, TokioTimer};
use crate::loader::LazyLoader;
use crate::monitor::{MetricsMonitor, MonitorError};

/// One monitor, scheduler and loader for the life of the process.
///
/// `shutdown` tears all three down exactly once, whether it is reached through
/// a signal, an explicit call, or dropping the runtime.
pub struct Runtime {
    monitor: MetricsMonitor,
    scheduler: TaskScheduler,
    loader: LazyLoader,
    shut_down: AtomicBool,
}

impl Runtime {
    /// Real tokio timers, `sysinfo` memory probe, and a scheduler that reports
    /// every task run to the monitor. Must be called inside a tokio runtime.
    pub fn new(config: &VigilConfig) -> Result<Self, MonitorError> {
        let monitor = MetricsMonitor::new(config.monitor.clone())?;
        let scheduler = TaskScheduler::with_monitor(Arc::new(TokioTimer::new()), monitor.clone());
        Ok(Self::from_parts(monitor, scheduler, LazyLoader::new()))
    }

    pub fn from_parts(monitor: MetricsMonitor, scheduler: TaskScheduler, loader: LazyLoader) -> Self {
        Self {
            monitor,
            scheduler,
            loader,
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn monitor(&self) -> &MetricsMonitor {
        &self.monitor
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    pub fn loader(&self) -> &LazyLoader {
        &self.loader
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Run every component's cleanup. Returns false if this already happened.
    pub fn shutdown(&self) -> bool {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return false;
        }

        // Scheduler first so no task starts a measured run against a stopped monitor.
        self.scheduler.cleanup();
        self.monitor.cleanup();
        self.loader.cleanup();

        info!("runtime shut down");
        true
    }

    /// Wait for Ctrl+C, then shut down.
    pub async fn run_until_shutdown(&self) -> std::io::Result<()> {
        tokio::signal::ctrl_c().await?;
        info!("shutdown signal received");
        self.shutdown();
        Ok(())
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}
