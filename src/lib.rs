//! # What You Hear
//!
//! Captures the machine's playback ("what you hear") and fans it out to any
//! number of network listeners, as Opus packets or as raw 16-bit PCM.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                               STREAMER PC                                │
//! │  ┌───────────────────┐                                                   │
//! │  │  Loopback device  │  cpal callback (never blocks, drops on overflow)  │
//! │  └─────────┬─────────┘                                                   │
//! │            ▼                                                             │
//! │  ┌───────────────────┐                                                   │
//! │  │  Capture buffer   │  native format bytes                              │
//! │  └─────────┬─────────┘                                                   │
//! │            ▼                                                             │
//! │  ┌─────────────────────────────────────────┐   parks on the activity     │
//! │  │ Processor (pipeline::process)           │◄─ gate while nobody listens │
//! │  │  normalize ─► resample ─┬─► Opus encode │                             │
//! │  │                         └─► i16 BE      │                             │
//! │  └──────────────┬──────────────────┬───────┘                             │
//! │                 ▼                  ▼                                     │
//! │  ┌──────────────────┐   ┌──────────────────┐                             │
//! │  │ Compressed master│   │    Raw master    │                             │
//! │  └────────┬─────────┘   └────────┬─────────┘                             │
//! │           ▼                      ▼                                       │
//! │  ┌──────────────────┐   ┌──────────────────┐                             │
//! │  │    Duplicator    │   │    Duplicator    │  one copy per listener      │
//! │  └──┬─────┬─────┬───┘   └──┬─────┬─────┬───┘                             │
//! │     ▼     ▼     ▼          ▼     ▼     ▼                                 │
//! │   listener buffers (session::registry)                                   │
//! │     │     │     │          │     │     │                                 │
//! │  ┌──┴─────┴─────┴──────────┴─────┴─────┴───┐                             │
//! │  │  HTTP delivery (http) /stream.opus|raw  │                             │
//! │  └─────────────────────────────────────────┘                             │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod http;
pub mod pipeline;
pub mod session;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default target sample rate
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Default channel count (stereo)
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Default Opus bitrate in bits per second
    pub const DEFAULT_BITRATE: u32 = 128_000;

    /// Default frame size in milliseconds
    pub const DEFAULT_FRAME_SIZE_MS: f32 = 20.0;

    /// Frame durations Opus accepts
    pub const OPUS_FRAME_DURATIONS_MS: [f32; 6] = [2.5, 5.0, 10.0, 20.0, 40.0, 60.0];

    /// Sample rates Opus accepts
    pub const OPUS_SAMPLE_RATES: [u32; 5] = [8000, 12000, 16000, 24000, 48000];

    /// Rate the compressed branch bridges to when the target is not an Opus rate
    pub const OPUS_FALLBACK_SAMPLE_RATE: u32 = 48000;

    /// Largest packet the encoder may produce
    pub const MAX_OPUS_PACKET_BYTES: usize = 4000;

    /// Largest packet including its length prefix
    pub const MAX_FRAMED_PACKET_BYTES: usize = MAX_OPUS_PACKET_BYTES + 2;

    /// Capture buffer, about 2s of 48kHz stereo f32
    pub const DEFAULT_CAPTURE_BUFFER_BYTES: usize = 384_000;

    /// Per-format master stream
    pub const DEFAULT_MASTER_BUFFER_BYTES: usize = 256 * 1024;

    /// Per-listener buffer, about 2.7s of 48kHz stereo PCM
    pub const DEFAULT_LISTENER_BUFFER_BYTES: usize = 512 * 1024;

    /// Largest raw chunk handed to listeners at once
    pub const DEFAULT_CHUNK_BYTES: usize = 4096;

    /// How long a full listener may hold up dispatch before eviction
    pub const DEFAULT_EVICTION_GRACE_MS: u64 = 2000;

    /// Default HTTP port for listener connections
    pub const DEFAULT_HTTP_PORT: u16 = 5901;

    /// Encoder failures in a row before compressed listeners are dropped
    pub const MAX_CONSECUTIVE_ENCODE_FAILURES: u32 = 50;

    /// Pending lifecycle events before new ones are dropped
    pub const EVENT_QUEUE_CAPACITY: usize = 256;
}
