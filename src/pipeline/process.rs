//! Normalizer / encoder processing loop
//!
//! Pulls native bytes from the capture buffer, normalizes and resamples
//! them once, and feeds the same PCM to whichever format branches are
//! active. Parks on the activity gate while nobody listens, leaving the
//! capture buffer untouched.

use std::sync::Arc;

use crate::audio::capture::NativeFormat;
use crate::audio::normalize::Normalizer;
use crate::audio::resample::PcmResampler;
use crate::codec::encoder::{OpusEncoder, PacketEncoder};
use crate::codec::raw::to_network_order;
use crate::config::{CompressedConfig, PcmFormat};
use crate::constants::{
    MAX_CONSECUTIVE_ENCODE_FAILURES, OPUS_FALLBACK_SAMPLE_RATE, OPUS_SAMPLE_RATES,
};
use crate::error::Result;
use crate::pipeline::Shared;
use crate::session::gate::Activity;
use crate::session::listener::StreamFormat;

/// Compressed branch: optional bridge to an Opus rate, then framed packets
pub(crate) struct CompressedBranch {
    resampler: Option<PcmResampler>,
    encoder: Box<dyn PacketEncoder>,
    /// Samples waiting for a whole encoder frame
    pending: Vec<i16>,
    scratch: Vec<i16>,
    consecutive_failures: u32,
}

impl CompressedBranch {
    pub(crate) fn new(target: PcmFormat, config: &CompressedConfig) -> Result<Self> {
        let rate = if OPUS_SAMPLE_RATES.contains(&target.sample_rate) {
            target.sample_rate
        } else {
            OPUS_FALLBACK_SAMPLE_RATE
        };
        let resampler = PcmResampler::for_rates(target.sample_rate, rate, target.channels)?;
        let encoder = OpusEncoder::new(rate, target.channels, config.clone())?;

        tracing::debug!(
            "Compressed encoder: {} Hz, {} channels, {} bps, {} samples/frame",
            rate,
            target.channels,
            config.bitrate,
            encoder.frame_size()
        );

        Ok(Self::with_encoder(resampler, Box::new(encoder)))
    }

    pub(crate) fn with_encoder(
        resampler: Option<PcmResampler>,
        encoder: Box<dyn PacketEncoder>,
    ) -> Self {
        Self {
            resampler,
            encoder,
            pending: Vec::new(),
            scratch: Vec::new(),
            consecutive_failures: 0,
        }
    }

    /// Forget partial frames from a previous listening period
    pub(crate) fn reset(&mut self) {
        self.pending.clear();
        self.consecutive_failures = 0;
        if let Some(resampler) = &mut self.resampler {
            resampler.reset();
        }
    }

    pub(crate) fn feed(&mut self, pcm: &[i16], shared: &Shared) -> Result<()> {
        let input: &[i16] = match &mut self.resampler {
            Some(resampler) => {
                self.scratch.clear();
                resampler.process(pcm, &mut self.scratch)?;
                &self.scratch
            }
            None => pcm,
        };
        self.pending.extend_from_slice(input);

        let frame = self.encoder.samples_per_frame();
        let master = &shared.compressed_master;
        let mut offset = 0;
        while self.pending.len() - offset >= frame {
            match self.encoder.encode(&self.pending[offset..offset + frame]) {
                Ok(packet) => {
                    self.consecutive_failures = 0;
                    let written = master.write(&packet);
                    shared
                        .counters
                        .add_encoded(StreamFormat::Compressed, written);
                    if written < packet.len() {
                        // Master closed: the pipeline is halting
                        break;
                    }
                }
                Err(e) => {
                    shared.counters.add_encode_failure();
                    self.consecutive_failures += 1;
                    tracing::warn!("Encoding failed, frame dropped: {}", e);

                    if self.consecutive_failures >= MAX_CONSECUTIVE_ENCODE_FAILURES {
                        tracing::error!(
                            "{} consecutive encoder failures, dropping compressed listeners",
                            self.consecutive_failures
                        );
                        shared.registry.evict_all(StreamFormat::Compressed);
                        self.consecutive_failures = 0;
                    }
                }
            }
            offset += frame;
        }
        self.pending.drain(..offset.min(self.pending.len()));
        Ok(())
    }
}

pub(crate) struct Processor {
    shared: Arc<Shared>,
    normalizer: Normalizer,
    resampler: Option<PcmResampler>,
    compressed: CompressedBranch,
    read_buf: Vec<u8>,
    pcm: Vec<i16>,
    resampled: Vec<i16>,
    raw_out: Vec<u8>,
}

impl Processor {
    pub(crate) fn new(shared: Arc<Shared>, native: NativeFormat) -> Result<Self> {
        let target = shared.config.target;
        let normalizer = Normalizer::new(native, target.channels);
        let resampler =
            PcmResampler::for_rates(native.sample_rate, target.sample_rate, target.channels)?;
        let compressed = CompressedBranch::new(target, &shared.config.compressed)?;

        // Sample kind and channel count are handled by the normalizer; only
        // the rate decides whether the resampler runs
        if resampler.is_none() {
            tracing::info!("Capture rate matches target, resampling skipped");
        }

        // About 10ms of native audio per pull
        let read_bytes = (native.sample_rate as usize / 100).max(1) * native.frame_bytes();

        Ok(Self {
            shared,
            normalizer,
            resampler,
            compressed,
            read_buf: vec![0u8; read_bytes],
            pcm: Vec::new(),
            resampled: Vec::new(),
            raw_out: Vec::new(),
        })
    }

    pub(crate) fn run(mut self) -> Result<()> {
        let shared = self.shared.clone();
        let mut active = Activity::default();

        while !shared.is_stopping() {
            let mut now = shared.gate.current();
            if !now.any() {
                if active.any() {
                    tracing::debug!("No listeners left, processing idle");
                }
                active = Activity::default();
                now = match shared.gate.wait_active() {
                    Some(activity) => activity,
                    None => break,
                };
            }

            if !active.any() {
                self.discard_backlog();
            }
            if now.compressed && !active.compressed {
                self.compressed.reset();
            }
            active = now;

            let n = shared.capture_buffer.read(&mut self.read_buf);
            if n == 0 {
                // Capture buffer closed: stop requested or capture failed
                break;
            }
            self.process_burst(n, active)?;
        }
        Ok(())
    }

    /// Idle -> active: what was captured while nobody listened is stale
    fn discard_backlog(&mut self) {
        let stale = self.shared.capture_buffer.len();
        self.shared.capture_buffer.clear();
        self.normalizer.reset();
        if let Some(resampler) = &mut self.resampler {
            resampler.reset();
        }
        self.shared.counters.add_activation();
        tracing::debug!("Listener active, discarded {} stale capture bytes", stale);
    }

    fn process_burst(&mut self, n: usize, activity: Activity) -> Result<()> {
        self.pcm.clear();
        self.normalizer.normalize(&self.read_buf[..n], &mut self.pcm);

        let pcm: &[i16] = match &mut self.resampler {
            Some(resampler) => {
                self.resampled.clear();
                resampler.process(&self.pcm, &mut self.resampled)?;
                &self.resampled
            }
            None => &self.pcm,
        };
        if pcm.is_empty() {
            return Ok(());
        }
        self.shared.counters.add_pcm_samples(pcm.len());

        if activity.compressed {
            self.compressed.feed(pcm, &self.shared)?;
        }
        if activity.raw {
            self.raw_out.clear();
            to_network_order(pcm, &mut self.raw_out);
            let written = self.shared.raw_master.write(&self.raw_out);
            self.shared.counters.add_encoded(StreamFormat::Raw, written);
        }
        Ok(())
    }
}
