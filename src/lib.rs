pub mod config;
pub mod kernel;
pub mod lifecycle;
pub mod loader;
pub mod monitor;

// Re-export the component handles for convenient access
pub use config::VigilConfig;
pub use kernel::TaskScheduler;
pub use lifecycle::Runtime;
pub use loader::LazyLoader;
pub use monitor::MetricsMonitor;
