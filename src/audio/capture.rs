//! Audio capture boundary
//!
//! The capture adapter pushes raw interleaved frames at the host's native
//! format into a [`CaptureSink`]. The sink bridges the push-style callback
//! into the pull-style processing loop through a bounded byte channel and
//! never blocks the audio callback.

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::bounded;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::channel::SharedByteChannel;
use crate::audio::device::{get_default_output_device, get_device_by_id, AudioDevice};
use crate::error::AudioError;

/// Sample encoding delivered by the capture adapter (little-endian)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SampleKind {
    Float32,
    Int16,
    UInt16,
    Int32,
}

impl SampleKind {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleKind::Int16 | SampleKind::UInt16 => 2,
            SampleKind::Float32 | SampleKind::Int32 => 4,
        }
    }

    pub fn bits_per_sample(self) -> u16 {
        self.bytes_per_sample() as u16 * 8
    }

    fn from_cpal(format: cpal::SampleFormat) -> Result<Self, AudioError> {
        match format {
            cpal::SampleFormat::F32 => Ok(SampleKind::Float32),
            cpal::SampleFormat::I16 => Ok(SampleKind::Int16),
            cpal::SampleFormat::U16 => Ok(SampleKind::UInt16),
            cpal::SampleFormat::I32 => Ok(SampleKind::Int32),
            other => Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
        }
    }
}

/// Native format descriptor of the capture adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NativeFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_kind: SampleKind,
}

impl NativeFormat {
    /// Bytes per interleaved frame (one sample for every channel)
    pub fn frame_bytes(&self) -> usize {
        self.sample_kind.bytes_per_sample() * self.channels as usize
    }
}

impl fmt::Display for NativeFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}Hz {}ch {:?}",
            self.sample_rate, self.channels, self.sample_kind
        )
    }
}

/// Capture counters shared between the sink and the pipeline
#[derive(Debug, Default)]
pub struct CaptureCounters {
    pub frames: AtomicU64,
    pub bytes: AtomicU64,
    pub dropped_bytes: AtomicU64,
}

type FailureHook = Arc<dyn Fn(AudioError) + Send + Sync>;

/// Receiving end handed to a [`CaptureSource`] on start
#[derive(Clone)]
pub struct CaptureSink {
    buffer: SharedByteChannel,
    frame_bytes: usize,
    counters: Arc<CaptureCounters>,
    on_failure: FailureHook,
}

impl CaptureSink {
    pub fn new(
        buffer: SharedByteChannel,
        native: NativeFormat,
        counters: Arc<CaptureCounters>,
        on_failure: impl Fn(AudioError) + Send + Sync + 'static,
    ) -> Self {
        Self {
            buffer,
            frame_bytes: native.frame_bytes(),
            counters,
            on_failure: Arc::new(on_failure),
        }
    }

    /// Deliver `frames` interleaved frames of native-format bytes.
    ///
    /// Never blocks: whole frames that do not fit in the capture buffer
    /// are dropped and counted. A frame is never stored in part, so the
    /// processing loop stays frame-aligned after an overflow.
    pub fn push(&self, data: &[u8], frames: usize) {
        self.counters.frames.fetch_add(frames as u64, Ordering::Relaxed);
        self.counters.bytes.fetch_add(data.len() as u64, Ordering::Relaxed);

        let accepted = self.buffer.try_write_frames(data, self.frame_bytes);
        if accepted < data.len() {
            self.counters
                .dropped_bytes
                .fetch_add((data.len() - accepted) as u64, Ordering::Relaxed);
        }
    }

    /// Report an unrecoverable capture failure (device removed, stream died)
    pub fn fail(&self, error: AudioError) {
        (self.on_failure)(error);
    }
}

/// A source of captured host audio
pub trait CaptureSource: Send {
    /// Format of the bytes this source will push
    fn native_format(&self) -> NativeFormat;

    /// Begin delivering frames into `sink`
    fn start(&mut self, sink: CaptureSink) -> Result<(), AudioError>;

    /// Stop delivering frames. Idempotent.
    fn stop(&mut self);
}

/// Loopback capture of an output device through cpal
///
/// Building an input stream on an output device yields the mixed audio
/// that device is playing on hosts that support loopback (WASAPI).
pub struct CpalCapture {
    device_id: Option<String>,
    config: cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    native: NativeFormat,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl CpalCapture {
    /// Open the output device `device_id`, or the default output device
    pub fn new(device_id: Option<&str>) -> Result<Self, AudioError> {
        let device = open_device(device_id)?;
        let default_config = if device.is_output {
            device.default_output_config()?
        } else {
            device.default_input_config()?
        };

        let sample_format = default_config.sample_format();
        let config = default_config.config();
        let native = NativeFormat {
            sample_rate: config.sample_rate.0,
            channels: config.channels,
            sample_kind: SampleKind::from_cpal(sample_format)?,
        };

        tracing::info!("Capturing from {} ({})", device.name, native);

        Ok(Self {
            device_id: device_id.map(str::to_string),
            config,
            sample_format,
            native,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

fn open_device(device_id: Option<&str>) -> Result<AudioDevice, AudioError> {
    match device_id {
        Some(id) => get_device_by_id(id),
        None => get_default_output_device(),
    }
}

impl CaptureSource for CpalCapture {
    fn native_format(&self) -> NativeFormat {
        self.native
    }

    fn start(&mut self, sink: CaptureSink) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let device = open_device(self.device_id.as_deref())?;
        let config = self.config.clone();
        let sample_format = self.sample_format;
        let frame_bytes = self.native.frame_bytes();
        let running = self.running.clone();
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || {
                let cpal_device = device.into_inner();
                let data_sink = sink.clone();
                let error_sink = sink.clone();

                let stream = cpal_device.build_input_stream_raw(
                    &config,
                    sample_format,
                    move |data: &cpal::Data, _: &cpal::InputCallbackInfo| {
                        let bytes = data.bytes();
                        data_sink.push(bytes, bytes.len() / frame_bytes);
                    },
                    move |err| {
                        error_sink.fail(AudioError::StreamError(err.to_string()));
                    },
                    None,
                );

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(AudioError::CpalError(e.to_string())));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::CpalError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Keep the stream alive while running
                while running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.thread_handle = Some(handle);

        let started = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(AudioError::StreamError("capture thread exited".into())));
        if started.is_err() {
            self.stop();
        }
        started
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::channel::create_shared_channel;
    use crate::audio::normalize::Normalizer;
    use std::sync::Mutex;

    fn format(channels: u16, sample_kind: SampleKind) -> NativeFormat {
        NativeFormat {
            sample_rate: 48000,
            channels,
            sample_kind,
        }
    }

    fn stereo_frames(left: i16, right: i16, frames: usize) -> Vec<u8> {
        let mut frame = left.to_le_bytes().to_vec();
        frame.extend_from_slice(&right.to_le_bytes());
        frame.repeat(frames)
    }

    #[test]
    fn test_sink_drops_overflow_without_blocking() {
        let buffer = create_shared_channel(8);
        let counters = Arc::new(CaptureCounters::default());
        let native = format(1, SampleKind::Int16);
        let sink = CaptureSink::new(buffer.clone(), native, counters.clone(), |_| {});

        sink.push(&[1u8; 6], 3);
        sink.push(&[2u8; 6], 3);

        assert_eq!(buffer.len(), 8);
        assert_eq!(counters.frames.load(Ordering::Relaxed), 6);
        assert_eq!(counters.bytes.load(Ordering::Relaxed), 12);
        assert_eq!(counters.dropped_bytes.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn test_sink_forwards_failures() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = seen.clone();
            CaptureSink::new(
                create_shared_channel(8),
                format(2, SampleKind::Int16),
                Arc::new(CaptureCounters::default()),
                move |e| seen.lock().unwrap().push(e.to_string()),
            )
        };

        sink.fail(AudioError::StreamError("device removed".into()));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_overflow_keeps_channels_aligned() {
        // Capacity is not a whole number of 4-byte stereo frames
        let buffer = create_shared_channel(4098);
        let counters = Arc::new(CaptureCounters::default());
        let native = format(2, SampleKind::Int16);
        let sink = CaptureSink::new(buffer.clone(), native, counters.clone(), |_| {});

        sink.push(&stereo_frames(0x1111, 0x2222, 1025), 1025);
        assert_eq!(buffer.len(), 4096);
        assert_eq!(counters.dropped_bytes.load(Ordering::Relaxed), 4);

        let mut normalizer = Normalizer::new(native, 2);
        let mut pcm = Vec::new();
        let mut chunk = vec![0u8; 4098];
        let n = buffer.read(&mut chunk);
        normalizer.normalize(&chunk[..n], &mut pcm);

        sink.push(&stereo_frames(0x3333, 0x4444, 8), 8);
        let n = buffer.read(&mut chunk);
        pcm.clear();
        normalizer.normalize(&chunk[..n], &mut pcm);

        assert_eq!(pcm.len(), 16);
        for frame in pcm.chunks_exact(2) {
            assert_eq!(frame, [0x3333, 0x4444]);
        }
    }

    #[test]
    fn test_native_frame_bytes() {
        let format = NativeFormat {
            sample_rate: 48000,
            channels: 2,
            sample_kind: SampleKind::Float32,
        };
        assert_eq!(format.frame_bytes(), 8);
        assert_eq!(SampleKind::UInt16.bits_per_sample(), 16);
    }

    #[test]
    fn test_cpal_capture_creation() {
        // Only meaningful on hosts with an output device
        if let Ok(capture) = CpalCapture::new(None) {
            assert!(!capture.is_running());
            assert!(capture.native_format().channels > 0);
        }
    }
}
