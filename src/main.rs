use std::path::PathBuf;
use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use vigil::kernel::TaskOptions;
use vigil::loader::LoadError;
use vigil::{Runtime, VigilConfig};

/// Stand-in for a heavyweight optional module.
struct Charting {
    draw: fn(&[f64]) -> String,
}

fn draw_sparkline(values: &[f64]) -> String {
    const BARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
    let max = values.iter().cloned().fold(f64::MIN, f64::max).max(f64::EPSILON);
    values
        .iter()
        .map(|v| BARS[((v / max) * 7.0).round().clamp(0.0, 7.0) as usize])
        .collect()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging/tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    info!("vigil booting...");

    let config = VigilConfig::load()?;
    let runtime = Runtime::new(&config)?;

    runtime.monitor().start_sampling(config.monitor.sample_period())?;

    // Auto-save the recent operation log; bounded retries so a full disk
    // cannot turn into an endless failure loop.
    let save_path: PathBuf = std::env::temp_dir().join("vigil-operations.json");
    let monitor = runtime.monitor().clone();
    runtime.scheduler().create_recurring_task(
        "auto-save",
        config.scheduler.auto_save_period(),
        move || {
            let monitor = monitor.clone();
            let path = save_path.clone();
            async move {
                let snapshot = serde_json::to_vec_pretty(&monitor.recent_operations(Some(10)))?;
                tokio::fs::write(&path, snapshot).await?;
                anyhow::Ok(())
            }
        },
        TaskOptions::default()
            .max_retries(config.scheduler.auto_save_max_retries)
            .on_error(|e| error!("auto-save disabled: {:#}", e)),
    )?;

    runtime.loader().register_lazy_module("charting", || async {
        // Simulated fetch of a large optional module.
        tokio::time::sleep(Duration::from_millis(50)).await;
        anyhow::Ok(Charting { draw: draw_sparkline })
    });

    let loader = runtime.loader().clone();
    let chart = runtime
        .monitor()
        .measure_operation("generate_visualization", || async {
            let charting = loader.load_module::<Charting>("charting").await?;
            Ok::<_, LoadError>((charting.draw)(&[1.0, 3.0, 2.0, 5.0, 8.0, 4.0]))
        })
        .await?;
    info!(%chart, "visualization ready");

    info!("vigil active. Press Ctrl+C to stop.");
    runtime.run_until_shutdown().await?;

    if let Some(sample) = runtime.monitor().latest_metrics() {
        info!(?sample, "last health sample");
    }
    Ok(())
}
