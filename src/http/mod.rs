//! HTTP delivery of listener streams
//!
//! | Path | Description |
//! |------|-------------|
//! | `/stream.opus` | Length-prefixed Opus packets (`GET`, `HEAD`) |
//! | `/stream.raw` | 16-bit big-endian PCM, `audio/L16` (`GET`, `HEAD`) |
//! | `/status` | Pipeline stats as JSON |
//! | `/devices` | Capturable audio devices |
//!
//! Every `GET` on a stream path is one listener session. It lives until the
//! client disconnects or the pipeline stops.

pub mod handlers;

use axum::{routing::get, Router};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::pipeline::PipelineHandle;

use handlers::AppState;

/// Build the router over a running pipeline
pub fn router(pipeline: PipelineHandle) -> Router {
    let state = Arc::new(AppState {
        pipeline,
        started_at: Instant::now(),
    });

    Router::new()
        .route(
            "/stream.opus",
            get(handlers::stream_compressed).head(handlers::head_compressed),
        )
        .route(
            "/stream.raw",
            get(handlers::stream_raw).head(handlers::head_raw),
        )
        .route("/status", get(handlers::get_status))
        .route("/devices", get(handlers::get_devices))
        .with_state(state)
}

/// Listener-facing web server
pub struct HttpServer {
    config: ServerConfig,
    pipeline: PipelineHandle,
}

impl HttpServer {
    pub fn new(config: ServerConfig, pipeline: PipelineHandle) -> Self {
        Self { config, pipeline }
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.config.bind_address, self.config.http_port)
            .parse()
            .map_err(|e| Error::Config(format!("invalid bind address: {}", e)))
    }

    /// Serve until `shutdown` resolves
    pub async fn run(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let addr = self.addr()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Listening on http://{}", listener.local_addr()?);

        axum::serve(listener, router(self.pipeline))
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}
