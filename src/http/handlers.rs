//! HTTP handlers

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

use crate::audio::device::{list_devices, DeviceInfo};
use crate::config::PcmFormat;
use crate::pipeline::stats::PipelineStats;
use crate::pipeline::PipelineHandle;
use crate::session::listener::{ListenerStream, SessionId, StreamFormat};

/// Content type of the length-prefixed Opus stream
pub const COMPRESSED_CONTENT_TYPE: &str = "audio/x-opus-framed";

/// Bytes pulled from a listener buffer per body chunk
const PUMP_CHUNK_BYTES: usize = 8192;

/// Body chunks queued between the blocking pump and the connection
const PUMP_QUEUE_DEPTH: usize = 8;

/// Shared handler state
pub struct AppState {
    pub pipeline: PipelineHandle,
    pub started_at: Instant,
}

/// API response wrapper
#[derive(serde::Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// System status
#[derive(serde::Serialize)]
pub struct SystemStatus {
    pub target: PcmFormat,
    pub uptime_seconds: u64,
    #[serde(flatten)]
    pub pipeline: PipelineStats,
}

/// Get system status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<ApiResponse<SystemStatus>> {
    let status = SystemStatus {
        target: state.pipeline.target_format(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        pipeline: state.pipeline.stats(),
    };

    Json(ApiResponse::ok(status))
}

/// Get capturable audio devices
pub async fn get_devices() -> Json<ApiResponse<Vec<DeviceInfo>>> {
    let devices = tokio::task::spawn_blocking(list_devices)
        .await
        .unwrap_or_default();
    Json(ApiResponse::ok(devices))
}

pub async fn stream_compressed(State(state): State<Arc<AppState>>) -> Response {
    stream_listener(&state, StreamFormat::Compressed)
}

pub async fn stream_raw(State(state): State<Arc<AppState>>) -> Response {
    stream_listener(&state, StreamFormat::Raw)
}

/// Headers only; no session is created
pub async fn head_compressed(State(state): State<Arc<AppState>>) -> Response {
    stream_headers(&state, StreamFormat::Compressed).into_response()
}

pub async fn head_raw(State(state): State<Arc<AppState>>) -> Response {
    stream_headers(&state, StreamFormat::Raw).into_response()
}

fn content_type(state: &AppState, format: StreamFormat) -> String {
    match format {
        StreamFormat::Compressed => COMPRESSED_CONTENT_TYPE.to_string(),
        StreamFormat::Raw => state.pipeline.target_format().raw_content_type(),
    }
}

fn stream_headers(state: &AppState, format: StreamFormat) -> [(header::HeaderName, String); 2] {
    [
        (header::CONTENT_TYPE, content_type(state, format)),
        (header::CACHE_CONTROL, "no-cache, no-store".to_string()),
    ]
}

/// Unregisters the session when the response body is dropped
struct SessionGuard {
    pipeline: PipelineHandle,
    id: SessionId,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        tracing::info!("Listener {} disconnected", self.id);
        self.pipeline.unregister_listener(&self.id);
    }
}

fn stream_listener(state: &AppState, format: StreamFormat) -> Response {
    let id = SessionId::generate();
    let stream = match state.pipeline.register_listener(id.clone(), format) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!("Refusing {} listener: {}", format, e);
            return (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response();
        }
    };
    tracing::info!("Listener {} connected ({})", id, format);

    let (tx, rx) = mpsc::channel::<Bytes>(PUMP_QUEUE_DEPTH);
    tokio::task::spawn_blocking(move || pump(stream, tx));

    let guard = SessionGuard {
        pipeline: state.pipeline.clone(),
        id,
    };
    let body = futures_util::stream::unfold((rx, guard), |(mut rx, guard)| async move {
        rx.recv()
            .await
            .map(|chunk| (Ok::<_, std::io::Error>(chunk), (rx, guard)))
    });

    (stream_headers(state, format), Body::from_stream(body)).into_response()
}

/// Copy a listener buffer into the body queue until either side ends
fn pump(stream: ListenerStream, tx: mpsc::Sender<Bytes>) {
    let mut buf = vec![0u8; PUMP_CHUNK_BYTES];
    loop {
        let n = stream.read_chunk(&mut buf);
        if n == 0 {
            break;
        }
        if tx.blocking_send(Bytes::copy_from_slice(&buf[..n])).is_err() {
            break;
        }
    }
    tracing::debug!("Pump for {} finished", stream.id());
}
