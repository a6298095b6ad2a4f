//! Format normalization: native capture bytes to canonical 16-bit PCM
//!
//! Bursts from the capture adapter may end in the middle of a frame; the
//! trailing partial frame is kept and completed by the next burst.

use crate::audio::capture::{NativeFormat, SampleKind};

/// Converts native interleaved samples into interleaved `i16` at the
/// target channel count. The sample rate is left untouched.
pub struct Normalizer {
    native: NativeFormat,
    target_channels: u16,
    /// Bytes of an incomplete trailing frame
    pending: Vec<u8>,
    /// One native frame decoded to i16, reused across frames
    frame: Vec<i16>,
}

impl Normalizer {
    pub fn new(native: NativeFormat, target_channels: u16) -> Self {
        Self {
            native,
            target_channels,
            pending: Vec::with_capacity(native.frame_bytes()),
            frame: vec![0; native.channels as usize],
        }
    }

    pub fn native(&self) -> NativeFormat {
        self.native
    }

    /// Drop any partial frame carried over from a previous burst
    pub fn reset(&mut self) {
        self.pending.clear();
    }

    /// Append the canonical samples for `data` to `out`
    pub fn normalize(&mut self, data: &[u8], out: &mut Vec<i16>) {
        let frame_bytes = self.native.frame_bytes();
        let mut data = data;

        if !self.pending.is_empty() {
            let need = frame_bytes - self.pending.len();
            let take = need.min(data.len());
            self.pending.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.pending.len() < frame_bytes {
                return;
            }
            let frame = std::mem::take(&mut self.pending);
            self.convert_frames(&frame, out);
            self.pending = frame;
            self.pending.clear();
        }

        let whole = data.len() - data.len() % frame_bytes;
        self.convert_frames(&data[..whole], out);
        self.pending.extend_from_slice(&data[whole..]);
    }

    fn convert_frames(&mut self, data: &[u8], out: &mut Vec<i16>) {
        let kind = self.native.sample_kind;
        let width = kind.bytes_per_sample();
        let frame_bytes = self.native.frame_bytes();
        out.reserve(data.len() / frame_bytes * self.target_channels as usize);

        for frame in data.chunks_exact(frame_bytes) {
            for (slot, sample) in self.frame.iter_mut().zip(frame.chunks_exact(width)) {
                *slot = decode_sample(kind, sample);
            }
            map_channels(&self.frame, self.target_channels, out);
        }
    }
}

/// Decode one little-endian native sample to i16
fn decode_sample(kind: SampleKind, bytes: &[u8]) -> i16 {
    match kind {
        SampleKind::Int16 => i16::from_le_bytes([bytes[0], bytes[1]]),
        SampleKind::UInt16 => {
            let v = u16::from_le_bytes([bytes[0], bytes[1]]);
            (v as i32 - 32768) as i16
        }
        SampleKind::Int32 => {
            let v = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            (v >> 16) as i16
        }
        SampleKind::Float32 => {
            let v = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            f32_to_i16(v)
        }
    }
}

pub(crate) fn f32_to_i16(v: f32) -> i16 {
    (v.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

/// Map one native frame onto `target` channels (mono or stereo)
fn map_channels(frame: &[i16], target: u16, out: &mut Vec<i16>) {
    match (frame.len(), target) {
        (n, t) if n == t as usize => out.extend_from_slice(frame),
        (1, 2) => out.extend_from_slice(&[frame[0], frame[0]]),
        (_, 1) => {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            out.push((sum / frame.len() as i32) as i16);
        }
        // Surround: keep front left/right
        _ => out.extend_from_slice(&frame[..2]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(kind: SampleKind, channels: u16) -> NativeFormat {
        NativeFormat {
            sample_rate: 48000,
            channels,
            sample_kind: kind,
        }
    }

    fn i16_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_int16_passthrough() {
        let mut normalizer = Normalizer::new(format(SampleKind::Int16, 2), 2);
        let mut out = Vec::new();
        normalizer.normalize(&i16_bytes(&[1, -2, 300, -400]), &mut out);
        assert_eq!(out, vec![1, -2, 300, -400]);
    }

    #[test]
    fn test_float_conversion_clamps() {
        let mut normalizer = Normalizer::new(format(SampleKind::Float32, 1), 1);
        let data: Vec<u8> = [0.0f32, 1.0, -1.0, 2.0, 0.5]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();

        let mut out = Vec::new();
        normalizer.normalize(&data, &mut out);
        assert_eq!(out, vec![0, 32767, -32767, 32767, 16384]);
    }

    #[test]
    fn test_unsigned_and_int32() {
        let mut normalizer = Normalizer::new(format(SampleKind::UInt16, 1), 1);
        let mut out = Vec::new();
        let data: Vec<u8> = [0u16, 32768, 65535].iter().flat_map(|s| s.to_le_bytes()).collect();
        normalizer.normalize(&data, &mut out);
        assert_eq!(out, vec![-32768, 0, 32767]);

        let mut normalizer = Normalizer::new(format(SampleKind::Int32, 1), 1);
        let mut out = Vec::new();
        let data: Vec<u8> = [i32::MAX, i32::MIN, 1 << 16]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        normalizer.normalize(&data, &mut out);
        assert_eq!(out, vec![32767, -32768, 1]);
    }

    #[test]
    fn test_partial_frames_carry_over() {
        let mut normalizer = Normalizer::new(format(SampleKind::Int16, 2), 2);
        let data = i16_bytes(&[10, 20, 30, 40]);
        let mut out = Vec::new();

        normalizer.normalize(&data[..3], &mut out);
        assert!(out.is_empty());
        normalizer.normalize(&data[3..5], &mut out);
        assert_eq!(out, vec![10, 20]);
        normalizer.normalize(&data[5..], &mut out);
        assert_eq!(out, vec![10, 20, 30, 40]);
    }

    #[test]
    fn test_channel_mapping() {
        let mut out = Vec::new();
        map_channels(&[100, 300], 1, &mut out);
        map_channels(&[7], 2, &mut out);
        map_channels(&[1, 2, 3, 4, 5, 6], 2, &mut out);
        assert_eq!(out, vec![200, 7, 7, 1, 2]);
    }

    #[test]
    fn test_reset_drops_partial_frame() {
        let mut normalizer = Normalizer::new(format(SampleKind::Int16, 1), 1);
        let mut out = Vec::new();
        normalizer.normalize(&[0xff], &mut out);
        normalizer.reset();
        normalizer.normalize(&i16_bytes(&[5]), &mut out);
        assert_eq!(out, vec![5]);
    }
}
