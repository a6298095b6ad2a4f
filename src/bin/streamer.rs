//! Streamer Application
//!
//! Captures what this machine plays and serves it to network listeners
//! over HTTP.
//!
//! Usage: `streamer [config.toml]`

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use what_you_hear::{
    audio::{capture::CpalCapture, device::list_devices},
    config::AppConfig,
    http::HttpServer,
    pipeline::{events::watch_events, Pipeline},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting What You Hear streamer");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = AppConfig::load_or_default(config_path.as_deref())
        .context("Failed to load configuration")?;

    // List available devices
    println!("\n=== Capturable Audio Devices ===");
    for device in list_devices() {
        let device_type = if device.is_output { "Output (loopback)" } else { "Input" };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {} ({}){}", device.name, device_type, default_marker);
        println!("    ID: {}", device.id);
    }
    println!();

    let capture = CpalCapture::new(config.capture.device_id.as_deref())
        .context("Failed to open capture device")?;

    let pipeline = Pipeline::start(config.pipeline.clone(), Box::new(capture))
        .context("Failed to start pipeline")?;

    let target = pipeline.handle().target_format();
    tracing::info!(
        "Serving {} Hz, {} channels ({} native)",
        target.sample_rate,
        target.channels,
        pipeline.native_format()
    );

    // Lifecycle feedback; resolves if the pipeline halts on its own
    let mut fatal = watch_events(pipeline.events())?;

    // Listener bodies only end once the pipeline closes their streams, so
    // the pipeline stops before the server drains its connections.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = HttpServer::new(config.server.clone(), pipeline.handle());
    let server_task = tokio::spawn(server.run(async move {
        let _ = shutdown_rx.await;
    }));

    tracing::info!("Press Ctrl+C to stop");
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("Shutting down");
        }
        Ok(message) = &mut fatal => {
            tracing::error!("Shutting down after pipeline failure: {}", message);
        }
    }

    let stats = pipeline.stats();
    tracing::info!(
        "Captured {:.1} MB, dropped {:.1} KB, sent {:.1} MB compressed / {:.1} MB raw",
        stats.counters.captured_bytes as f64 / 1_048_576.0,
        stats.counters.dropped_capture_bytes as f64 / 1024.0,
        stats.counters.compressed_bytes as f64 / 1_048_576.0,
        stats.counters.raw_bytes as f64 / 1_048_576.0
    );

    let stopped = tokio::task::spawn_blocking(move || pipeline.stop()).await?;
    let _ = shutdown_tx.send(());
    server_task.await?.context("HTTP server failed")?;
    stopped.context("Pipeline stopped with an error")?;
    Ok(())
}
