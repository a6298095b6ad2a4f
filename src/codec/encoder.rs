//! Opus encoder wrapper
//!
//! Encodes canonical 16-bit PCM into Opus packets and frames each packet
//! for the compressed byte stream: a big-endian `u16` length followed by
//! the packet bytes.

use bytes::{BufMut, Bytes, BytesMut};
use opus::{Application, Channels, Encoder};

use crate::config::CompressedConfig;
use crate::constants::{MAX_OPUS_PACKET_BYTES, OPUS_SAMPLE_RATES};
use crate::error::CodecError;

/// Length prefix in front of every compressed packet
pub const PACKET_HEADER_LEN: usize = 2;

/// Opus encoder wrapper
pub struct OpusEncoder {
    encoder: Encoder,
    config: CompressedConfig,
    sample_rate: u32,
    channels: u16,
    frame_size: usize,
    /// Encoding buffer (reused to avoid allocations)
    encode_buffer: Vec<u8>,
    frames_encoded: u64,
    bytes_produced: u64,
}

impl OpusEncoder {
    pub fn new(
        sample_rate: u32,
        channels: u16,
        config: CompressedConfig,
    ) -> Result<Self, CodecError> {
        if !OPUS_SAMPLE_RATES.contains(&sample_rate) {
            return Err(CodecError::EncoderInit(format!(
                "Unsupported sample rate: {}",
                sample_rate
            )));
        }

        let opus_channels = match channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            _ => {
                return Err(CodecError::EncoderInit(format!(
                    "Unsupported channel count: {}",
                    channels
                )))
            }
        };

        let mut encoder = Encoder::new(sample_rate, opus_channels, Application::Audio)
            .map_err(|e| CodecError::EncoderInit(e.to_string()))?;

        encoder
            .set_bitrate(opus::Bitrate::Bits(config.bitrate as i32))
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set bitrate: {}", e)))?;
        encoder
            .set_vbr(config.vbr)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set VBR: {}", e)))?;

        let frame_size = config.frame_size(sample_rate);

        Ok(Self {
            encoder,
            config,
            sample_rate,
            channels,
            frame_size,
            encode_buffer: vec![0u8; MAX_OPUS_PACKET_BYTES],
            frames_encoded: 0,
            bytes_produced: 0,
        })
    }

    /// Encode one frame of interleaved samples into a framed packet
    ///
    /// Input length must equal [`samples_per_frame`](Self::samples_per_frame).
    pub fn encode(&mut self, samples: &[i16]) -> Result<Bytes, CodecError> {
        if samples.len() != self.samples_per_frame() {
            return Err(CodecError::InvalidFrameSize(samples.len()));
        }

        let size = self
            .encoder
            .encode(samples, &mut self.encode_buffer)
            .map_err(|e| CodecError::EncodingFailed(e.to_string()))?;

        let framed = frame_packet(&self.encode_buffer[..size])?;
        self.frames_encoded += 1;
        self.bytes_produced += framed.len() as u64;
        Ok(framed)
    }

    pub fn config(&self) -> &CompressedConfig {
        &self.config
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Samples per channel in one frame
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Interleaved samples in one frame
    pub fn samples_per_frame(&self) -> usize {
        self.frame_size * self.channels as usize
    }

    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            frames_encoded: self.frames_encoded,
            bytes_produced: self.bytes_produced,
            average_frame_size: if self.frames_encoded > 0 {
                self.bytes_produced as f32 / self.frames_encoded as f32
            } else {
                0.0
            },
        }
    }
}

/// Turns fixed-size PCM frames into framed compressed packets
pub trait PacketEncoder: Send {
    /// Rate the encoder expects its input at
    fn sample_rate(&self) -> u32;

    /// Interleaved samples consumed per packet
    fn samples_per_frame(&self) -> usize;

    fn encode(&mut self, samples: &[i16]) -> Result<Bytes, CodecError>;
}

impl PacketEncoder for OpusEncoder {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn samples_per_frame(&self) -> usize {
        OpusEncoder::samples_per_frame(self)
    }

    fn encode(&mut self, samples: &[i16]) -> Result<Bytes, CodecError> {
        OpusEncoder::encode(self, samples)
    }
}

/// Encoder statistics
#[derive(Debug, Clone)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub bytes_produced: u64,
    pub average_frame_size: f32,
}

/// Prefix `packet` with its big-endian u16 length
pub fn frame_packet(packet: &[u8]) -> Result<Bytes, CodecError> {
    let len = u16::try_from(packet.len()).map_err(|_| CodecError::PacketTooLarge(packet.len()))?;
    let mut framed = BytesMut::with_capacity(PACKET_HEADER_LEN + packet.len());
    framed.put_u16(len);
    framed.put_slice(packet);
    Ok(framed.freeze())
}

/// Payload length announced by a packet header
pub fn packet_len(header: [u8; PACKET_HEADER_LEN]) -> usize {
    u16::from_be_bytes(header) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoder_creation() {
        let encoder = OpusEncoder::new(48000, 2, CompressedConfig::default()).unwrap();
        assert_eq!(encoder.sample_rate(), 48000);
        assert_eq!(encoder.channels(), 2);
        // 20ms at 48kHz
        assert_eq!(encoder.frame_size(), 960);
        assert_eq!(encoder.samples_per_frame(), 1920);
    }

    #[test]
    fn test_rejects_unsupported_rate() {
        assert!(OpusEncoder::new(44100, 2, CompressedConfig::default()).is_err());
        assert!(OpusEncoder::new(48000, 3, CompressedConfig::default()).is_err());
    }

    #[test]
    fn test_encoding_produces_framed_packet() {
        let mut encoder = OpusEncoder::new(48000, 2, CompressedConfig::default()).unwrap();
        let samples = vec![0i16; encoder.samples_per_frame()];

        let framed = encoder.encode(&samples).unwrap();
        let announced = packet_len([framed[0], framed[1]]);
        assert_eq!(announced + PACKET_HEADER_LEN, framed.len());
        assert!(framed.len() < samples.len() * 2);
        assert_eq!(encoder.stats().frames_encoded, 1);
    }

    #[test]
    fn test_wrong_frame_size() {
        let mut encoder = OpusEncoder::new(48000, 1, CompressedConfig::default()).unwrap();
        assert!(matches!(
            encoder.encode(&[0i16; 10]),
            Err(CodecError::InvalidFrameSize(10))
        ));
    }

    #[test]
    fn test_frame_packet_header() {
        let framed = frame_packet(&[0xaa; 300]).unwrap();
        assert_eq!(&framed[..2], &[0x01, 0x2c]);
        assert_eq!(framed.len(), 302);
        assert!(frame_packet(&vec![0u8; 70_000]).is_err());
    }
}
