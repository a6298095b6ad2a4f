//! Pipeline counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::audio::capture::CaptureCounters;
use crate::session::gate::Activity;
use crate::session::listener::StreamFormat;

#[derive(Debug, Default)]
struct FormatCounters {
    /// Bytes written to the master stream
    encoded_bytes: AtomicU64,
    /// Chunks handed to listeners
    duplicated_chunks: AtomicU64,
    evictions: AtomicU64,
}

#[derive(Debug, Default)]
pub struct PipelineCounters {
    pub capture: Arc<CaptureCounters>,
    pcm_samples: AtomicU64,
    encode_failures: AtomicU64,
    /// Idle -> active transitions of the processing loop
    activations: AtomicU64,
    compressed: FormatCounters,
    raw: FormatCounters,
}

impl PipelineCounters {
    fn format(&self, format: StreamFormat) -> &FormatCounters {
        match format {
            StreamFormat::Compressed => &self.compressed,
            StreamFormat::Raw => &self.raw,
        }
    }

    pub fn add_pcm_samples(&self, n: usize) {
        self.pcm_samples.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn add_encoded(&self, format: StreamFormat, bytes: usize) {
        self.format(format)
            .encoded_bytes
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn add_activation(&self) {
        self.activations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_encode_failure(&self) {
        self.encode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_duplicated(&self, format: StreamFormat) {
        self.format(format)
            .duplicated_chunks
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_evictions(&self, format: StreamFormat, n: usize) {
        self.format(format)
            .evictions
            .fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CounterSnapshot {
            captured_bytes: load(&self.capture.bytes),
            captured_frames: load(&self.capture.frames),
            dropped_capture_bytes: load(&self.capture.dropped_bytes),
            pcm_samples: load(&self.pcm_samples),
            encode_failures: load(&self.encode_failures),
            activations: load(&self.activations),
            compressed_bytes: load(&self.compressed.encoded_bytes),
            raw_bytes: load(&self.raw.encoded_bytes),
            compressed_chunks: load(&self.compressed.duplicated_chunks),
            raw_chunks: load(&self.raw.duplicated_chunks),
            compressed_evictions: load(&self.compressed.evictions),
            raw_evictions: load(&self.raw.evictions),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub captured_bytes: u64,
    pub captured_frames: u64,
    pub dropped_capture_bytes: u64,
    pub pcm_samples: u64,
    pub encode_failures: u64,
    pub activations: u64,
    pub compressed_bytes: u64,
    pub raw_bytes: u64,
    pub compressed_chunks: u64,
    pub raw_chunks: u64,
    pub compressed_evictions: u64,
    pub raw_evictions: u64,
}

/// Point-in-time view of the pipeline
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub running: bool,
    pub activity: Activity,
    pub compressed_listeners: usize,
    pub raw_listeners: usize,
    pub local_capture: bool,
    pub capture_backlog_bytes: usize,
    #[serde(flatten)]
    pub counters: CounterSnapshot,
}
