//! Configuration for the streamer
//!
//! Loaded from TOML. Every section has defaults so a partial (or missing)
//! file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};

/// Target PCM format produced by normalization and resampling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
}

impl PcmFormat {
    /// Bytes per interleaved 16-bit frame
    pub fn frame_bytes(&self) -> usize {
        (self.bits_per_sample as usize / 8) * self.channels as usize
    }

    /// MIME type of the raw stream in this format
    pub fn raw_content_type(&self) -> String {
        format!(
            "audio/L16;rate={};channels={}",
            self.sample_rate, self.channels
        )
    }
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            bits_per_sample: 16,
            channels: DEFAULT_CHANNELS,
        }
    }
}

/// Compressed (Opus) encoder settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressedConfig {
    /// Bitrate in bits per second
    pub bitrate: u32,
    /// Frame duration in milliseconds
    pub frame_ms: f32,
    /// Variable bitrate; constant bitrate when false
    pub vbr: bool,
}

impl CompressedConfig {
    /// Samples per channel in one frame at `sample_rate`
    pub fn frame_size(&self, sample_rate: u32) -> usize {
        (sample_rate as f32 * self.frame_ms / 1000.0) as usize
    }
}

impl Default for CompressedConfig {
    fn default() -> Self {
        Self {
            bitrate: DEFAULT_BITRATE,
            frame_ms: DEFAULT_FRAME_SIZE_MS,
            vbr: true,
        }
    }
}

/// Buffer capacities in bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Capture adapter -> normalizer
    pub capture_bytes: usize,
    /// Encoder -> duplicator, per format
    pub master_bytes: usize,
    /// Duplicator -> delivery layer, per listener
    pub listener_bytes: usize,
    /// Largest chunk a raw duplicator reads at once
    pub chunk_bytes: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capture_bytes: DEFAULT_CAPTURE_BUFFER_BYTES,
            master_bytes: DEFAULT_MASTER_BUFFER_BYTES,
            listener_bytes: DEFAULT_LISTENER_BUFFER_BYTES,
            chunk_bytes: DEFAULT_CHUNK_BYTES,
        }
    }
}

/// How a duplicator hands a chunk to its listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DispatchPolicy {
    /// Write to each listener in turn, blocking on full buffers. One slow
    /// listener delays delivery to every other listener of its format.
    Sequential,
    /// Offer the chunk to every listener without blocking, then wait up to
    /// `grace_ms` (concurrently) for listeners without room. Listeners still
    /// full after the grace period are evicted.
    EvictLagging { grace_ms: u64 },
}

impl DispatchPolicy {
    pub fn grace(&self) -> Option<Duration> {
        match self {
            DispatchPolicy::Sequential => None,
            DispatchPolicy::EvictLagging { grace_ms } => Some(Duration::from_millis(*grace_ms)),
        }
    }
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        DispatchPolicy::EvictLagging {
            grace_ms: DEFAULT_EVICTION_GRACE_MS,
        }
    }
}

/// Capture device selection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// `output:<name>` / `input:<name>`; default output device when unset
    pub device_id: Option<String>,
}

/// HTTP delivery settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            http_port: DEFAULT_HTTP_PORT,
        }
    }
}

/// Pipeline settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub target: PcmFormat,
    pub compressed: CompressedConfig,
    pub buffers: BufferConfig,
    pub dispatch: DispatchPolicy,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        let target = &self.target;
        if target.bits_per_sample != 16 {
            return Err(Error::Config(format!(
                "bits_per_sample must be 16, got {}",
                target.bits_per_sample
            )));
        }
        if !(1..=2).contains(&target.channels) {
            return Err(Error::Config(format!(
                "channels must be 1 or 2, got {}",
                target.channels
            )));
        }
        if target.sample_rate == 0 {
            return Err(Error::Config("sample_rate must be non-zero".into()));
        }
        if !OPUS_FRAME_DURATIONS_MS.contains(&self.compressed.frame_ms) {
            return Err(Error::Config(format!(
                "frame_ms must be one of {:?}, got {}",
                OPUS_FRAME_DURATIONS_MS, self.compressed.frame_ms
            )));
        }
        if self.compressed.bitrate < 6000 || self.compressed.bitrate > 510_000 {
            return Err(Error::Config(format!(
                "bitrate must be 6000-510000 bps, got {}",
                self.compressed.bitrate
            )));
        }

        let buffers = &self.buffers;
        if buffers.capture_bytes == 0 || buffers.master_bytes == 0 || buffers.chunk_bytes == 0 {
            return Err(Error::Config("buffer sizes must be non-zero".into()));
        }
        if buffers.chunk_bytes < target.frame_bytes() {
            return Err(Error::Config("chunk_bytes smaller than one PCM frame".into()));
        }
        // A whole chunk, or a whole framed packet, must fit in a listener buffer
        let largest_chunk = buffers.chunk_bytes.max(MAX_FRAMED_PACKET_BYTES);
        if buffers.listener_bytes < largest_chunk {
            return Err(Error::Config(format!(
                "listener_bytes must be at least {}",
                largest_chunk
            )));
        }
        Ok(())
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
    pub capture: CaptureConfig,
    pub server: ServerConfig,
}

impl AppConfig {
    /// Parse configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.pipeline.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Load from `path`, or the default location; defaults if absent
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match default_config_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };

        if path.exists() {
            tracing::info!("Loading configuration from {}", path.display());
            Self::load(&path)
        } else {
            tracing::debug!("No configuration at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }
}

/// Platform configuration file location
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "what-you-hear")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}
