//! Sample rate conversion for canonical PCM
//!
//! Uses rubato for sinc interpolation. Input arrives in bursts of any
//! size; frames are accumulated until the resampler's fixed input chunk is
//! available.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::audio::normalize::f32_to_i16;
use crate::error::AudioError;

/// Frames fed to rubato per call
const CHUNK_FRAMES: usize = 1024;

/// Converts interleaved i16 PCM from one rate to another
pub struct PcmResampler {
    inner: SincFixedIn<f32>,
    channels: usize,
    input_rate: u32,
    output_rate: u32,
    /// Planar input waiting for a full chunk
    pending: Vec<Vec<f32>>,
}

impl PcmResampler {
    /// Returns `None` when no conversion is needed
    pub fn for_rates(
        input_rate: u32,
        output_rate: u32,
        channels: u16,
    ) -> Result<Option<Self>, AudioError> {
        if input_rate == output_rate {
            return Ok(None);
        }
        Self::new(input_rate, output_rate, channels).map(Some)
    }

    pub fn new(input_rate: u32, output_rate: u32, channels: u16) -> Result<Self, AudioError> {
        let channels = channels as usize;
        let ratio = output_rate as f64 / input_rate as f64;

        let params = SincInterpolationParameters {
            sinc_len: 128,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 128,
            window: WindowFunction::BlackmanHarris2,
        };

        let inner = SincFixedIn::<f32>::new(ratio, 1.0, params, CHUNK_FRAMES, channels)
            .map_err(|e| AudioError::Resampler(e.to_string()))?;

        tracing::debug!(
            "Resampler initialized: {} Hz -> {} Hz, {} channels",
            input_rate,
            output_rate,
            channels
        );

        Ok(Self {
            inner,
            channels,
            input_rate,
            output_rate,
            pending: vec![Vec::with_capacity(CHUNK_FRAMES * 2); channels],
        })
    }

    pub fn input_rate(&self) -> u32 {
        self.input_rate
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    /// Discard buffered input and filter history
    pub fn reset(&mut self) {
        self.inner.reset();
        for channel in &mut self.pending {
            channel.clear();
        }
    }

    /// Resample interleaved `input`, appending whatever output is ready
    pub fn process(&mut self, input: &[i16], out: &mut Vec<i16>) -> Result<(), AudioError> {
        for frame in input.chunks_exact(self.channels) {
            for (channel, &sample) in self.pending.iter_mut().zip(frame) {
                channel.push(sample as f32 / 32768.0);
            }
        }

        loop {
            let needed = self.inner.input_frames_next();
            if self.pending[0].len() < needed {
                return Ok(());
            }

            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|channel| channel.drain(..needed).collect())
                .collect();

            let output = self
                .inner
                .process(&chunk, None)
                .map_err(|e| AudioError::Resampler(e.to_string()))?;

            let frames = output[0].len();
            out.reserve(frames * self.channels);
            for i in 0..frames {
                for channel in &output {
                    out.push(f32_to_i16(channel[i]));
                }
            }
        }
    }
}
