//! Error types for the capture and distribution pipeline

use thiserror::Error;

/// Main error type for the pipeline
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// The capture adapter failed while the pipeline was running.
    /// Always fatal to the whole pipeline.
    #[error("Capture failed: {0}")]
    Capture(AudioError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Stage {0} terminated unexpectedly")]
    StageTerminated(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Resampler error: {0}")]
    Resampler(String),

    #[error("cpal error: {0}")]
    CpalError(String),
}

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Encoder initialization failed: {0}")]
    EncoderInit(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Invalid frame size: {0}")]
    InvalidFrameSize(usize),

    #[error("Packet too large for framing: {0} bytes")]
    PacketTooLarge(usize),
}

/// Listener session errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Pipeline is stopped")]
    Closed,

    #[error("Session id {0} is reserved")]
    ReservedId(String),
}

/// Result type alias for the pipeline
pub type Result<T> = std::result::Result<T, Error>;
