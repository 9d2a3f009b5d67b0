// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Dynamic rate control between a variable-rate producer and a fixed-rate
//! host device.
//!
//! Every [`RateController::mix`] call looks at how full the shared
//! [`RingBuffer`] is and nudges the resampling ratio around its nominal
//! value `host_rate / core_rate`:
//!
//! ```text
//! d     = (free - capacity/2) / (capacity/2)      clamped to [-1, 1]
//! ratio = nominal * (1 + delta * d)
//! ```
//!
//! An emptying buffer (`d > 0`) raises the ratio so more frames are
//! produced; a filling one lowers it. The ratio is recomputed from the
//! buffer every call, so there is no accumulated error to drift.
//!
//! Every frame the resampler produces is written, including frames it held
//! back from earlier calls. When the converted output does not fit, the
//! producer thread waits for the consumer. That wait has no timeout.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::config::SyncConfig;
use crate::realtime::{RateStats, RingBuffer, RingBufferError};
use crate::resampler::{
    ResampleError, Resampler, ResamplerFactory, ResamplerQuality, ResamplerSpec, RubatoFactory,
};

/// Interleaved stereo.
pub const CHANNELS: usize = 2;

/// Signed 16-bit samples.
pub const BYTES_PER_SAMPLE: usize = 2;

pub const BYTES_PER_FRAME: usize = CHANNELS * BYTES_PER_SAMPLE;

pub const DEFAULT_RATE_CONTROL_DELTA: f64 = 0.005;

/// Producer chunk size the scratch buffer is sized for up front.
const DEFAULT_MAX_CHUNK_FRAMES: usize = 4096;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Invalid sample rate: {0}")]
    InvalidRate(f64),
    #[error("Rate control delta must be in (0, 1), got {0}")]
    InvalidDelta(f64),
    #[error(transparent)]
    Resampler(#[from] ResampleError),
    #[error("No resampler configured; set a core rate first")]
    NotConfigured,
    #[error("{0} samples is not a whole number of stereo frames")]
    OddSampleCount(usize),
    #[error("Ring buffer error: {0}")]
    Ring(#[from] RingBufferError),
}

/// What one [`RateController::mix`] call did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixReport {
    pub input_frames: usize,
    /// Frames written into the ring.
    pub output_frames: usize,
    /// Ratio the feedback loop chose for this call.
    pub ratio: f64,
    /// The producer had to wait for the consumer.
    pub stalled: bool,
    /// The resampler failed and silence was written instead.
    pub silenced: bool,
}

fn valid_rate(rate: f64) -> bool {
    rate.is_finite() && rate > 0.0
}

/// Output frames requested for `frames` input frames at `ratio`.
///
/// The interleaved sample count is rounded up to even, which completes at
/// most one stereo frame.
fn target_frames(frames: usize, ratio: f64) -> usize {
    let samples = ((frames * CHANNELS) as f64 * ratio) as usize;
    (samples + (samples & 1)) / CHANNELS
}

/// Write interleaved samples into `ring`, in pieces no larger than it.
fn write_samples(ring: &RingBuffer, samples: &[i16], poll: Duration) -> Result<bool, RingBufferError> {
    let bytes: &[u8] = bytemuck::cast_slice(samples);
    let capacity = ring.capacity();
    let piece = if capacity >= BYTES_PER_FRAME {
        capacity - capacity % BYTES_PER_FRAME
    } else {
        capacity
    };

    let mut stalled = false;
    for part in bytes.chunks(piece) {
        stalled |= ring.write_blocking(part, poll)?;
    }
    Ok(stalled)
}

/// Feeds a shared ring buffer at the host rate from producer chunks at the
/// core rate.
///
/// Only one thread may call [`mix`](Self::mix); the consumer reads the ring
/// directly.
pub struct RateController<F: ResamplerFactory = RubatoFactory> {
    factory: F,
    ring: Arc<RingBuffer>,
    host_sample_rate: f64,
    /// Zero until the first successful `set_rate`.
    core_rate: f64,
    original_ratio: f64,
    current_ratio: f64,
    rate_control_delta: f64,
    quality: ResamplerQuality,
    poll: Duration,
    /// Replaced wholesale on every rate change.
    resampler: Option<F::Resampler>,
    /// Resampler output, sized for the largest ratio excursion.
    scratch: Vec<i16>,
    max_chunk_frames: usize,
    stats: Arc<RateStats>,
}

impl<F: ResamplerFactory> RateController<F> {
    /// Create a controller draining into `ring` at `host_sample_rate`.
    ///
    /// `mix` is unavailable until [`set_rate`](Self::set_rate) succeeds.
    pub fn new(factory: F, host_sample_rate: f64, ring: Arc<RingBuffer>) -> Result<Self, ControllerError> {
        if !valid_rate(host_sample_rate) {
            return Err(ControllerError::InvalidRate(host_sample_rate));
        }

        debug!(
            host_sample_rate,
            ring_capacity = ring.capacity(),
            "Created rate controller"
        );

        Ok(Self {
            factory,
            ring,
            host_sample_rate,
            core_rate: 0.0,
            original_ratio: 0.0,
            current_ratio: 0.0,
            rate_control_delta: DEFAULT_RATE_CONTROL_DELTA,
            quality: ResamplerQuality::default(),
            poll: Duration::from_millis(1),
            resampler: None,
            scratch: Vec::new(),
            max_chunk_frames: DEFAULT_MAX_CHUNK_FRAMES,
            stats: Arc::new(RateStats::new()),
        })
    }

    /// Create a controller with every tunable taken from `config`.
    pub fn from_config(factory: F, config: &SyncConfig, ring: Arc<RingBuffer>) -> Result<Self, ControllerError> {
        Ok(Self::new(factory, config.host_sample_rate, ring)?
            .with_rate_control_delta(config.rate_control_delta)?
            .with_quality(config.quality)
            .with_poll_interval(config.backpressure_poll()))
    }

    /// Largest relative ratio excursion, applied when the ring is empty or full.
    pub fn with_rate_control_delta(mut self, delta: f64) -> Result<Self, ControllerError> {
        if !(delta.is_finite() && delta > 0.0 && delta < 1.0) {
            return Err(ControllerError::InvalidDelta(delta));
        }
        self.rate_control_delta = delta;
        Ok(self)
    }

    /// Quality requested from the factory on the next rate change.
    pub fn with_quality(mut self, quality: ResamplerQuality) -> Self {
        self.quality = quality;
        self
    }

    /// Re-check interval while the producer is stalled.
    pub fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    /// Largest producer chunk expected; the scratch buffer is pre-sized for it.
    pub fn with_max_chunk_frames(mut self, frames: usize) -> Self {
        self.max_chunk_frames = frames;
        self
    }

    /// Switch to a new producer rate.
    ///
    /// The old resampler is dropped whatever the outcome. On failure the
    /// controller is left without one and `mix` returns
    /// [`ControllerError::NotConfigured`] until a later call succeeds.
    pub fn set_rate(&mut self, core_rate: f64) -> Result<(), ControllerError> {
        if !valid_rate(core_rate) {
            self.resampler = None;
            error!("Refusing invalid core rate {}", core_rate);
            return Err(ControllerError::InvalidRate(core_rate));
        }

        self.core_rate = core_rate;
        self.original_ratio = self.host_sample_rate / core_rate;
        self.current_ratio = self.original_ratio;

        let spec = ResamplerSpec {
            channels: CHANNELS,
            input_rate: core_rate,
            output_rate: self.host_sample_rate,
            quality: self.quality,
        };

        match self.factory.create(&spec) {
            Ok(resampler) => {
                if self.resampler.replace(resampler).is_some() {
                    debug!("Replaced previous resampler");
                }
                self.ensure_scratch(self.max_chunk_frames);
                self.stats.current_ratio.set(self.current_ratio);
                info!(
                    "Resampler initialized to convert from {} Hz to {} Hz",
                    core_rate, self.host_sample_rate
                );
                Ok(())
            }
            Err(e) => {
                self.resampler = None;
                error!("Failed to create resampler: {}", e);
                Err(e.into())
            }
        }
    }

    /// Ratio the feedback loop would use with `free` bytes free in the ring.
    pub fn compute_ratio(&self, free: usize) -> f64 {
        let half = self.ring.capacity() as f64 / 2.0;
        let deviation = ((free as f64 - half) / half).clamp(-1.0, 1.0);
        self.original_ratio * (1.0 + self.rate_control_delta * deviation)
    }

    /// Most output frames a chunk of `frames` input frames can ask for.
    fn max_output_frames(&self, frames: usize) -> usize {
        target_frames(frames, self.original_ratio * (1.0 + self.rate_control_delta)) + 2
    }

    /// Grow the scratch buffer if a chunk of `frames` frames would not fit.
    fn ensure_scratch(&mut self, frames: usize) {
        let needed = self.max_output_frames(frames) * CHANNELS;
        if self.scratch.len() < needed {
            debug!(
                old_samples = self.scratch.len(),
                new_samples = needed,
                "Growing mix scratch buffer"
            );
            self.scratch.resize(needed, 0);
        }
    }

    /// Resample one chunk of interleaved stereo samples into the ring.
    ///
    /// A resampler failure is logged and written as silence; it is not
    /// returned. Blocks while the ring lacks space for the output.
    pub fn mix(&mut self, samples: &[i16]) -> Result<MixReport, ControllerError> {
        if self.resampler.is_none() {
            return Err(ControllerError::NotConfigured);
        }
        if samples.len() % CHANNELS != 0 {
            return Err(ControllerError::OddSampleCount(samples.len()));
        }
        let frames = samples.len() / CHANNELS;

        self.current_ratio = self.compute_ratio(self.ring.free());
        let ratio = self.current_ratio;
        self.ensure_scratch(frames);
        let target = target_frames(frames, ratio).min(self.scratch.len() / CHANNELS);

        let ring = &self.ring;
        let poll = self.poll;
        let scratch = &mut self.scratch;
        let Some(resampler) = self.resampler.as_mut() else {
            return Err(ControllerError::NotConfigured);
        };

        if let Err(e) = resampler.set_ratio(ratio) {
            warn!("Resampler rejected ratio {:.6}: {}", ratio, e);
        }

        let output = &mut scratch[..target * CHANNELS];
        let (mut produced, silenced) = match resampler.process(samples, output) {
            Ok(processed) => (processed.output_frames.min(target), false),
            Err(e) => {
                output.fill(0);
                error!("Resampler processing failed: {}", e);
                (target, true)
            }
        };
        let mut stalled = write_samples(ring, &scratch[..produced * CHANNELS], poll)?;

        // Frames converted beyond the target are flushed now, never dropped
        while !silenced && resampler.pending_frames() > 0 {
            let flushed = match resampler.process(&[], &mut scratch[..]) {
                Ok(processed) => processed.output_frames,
                Err(e) => {
                    error!("Resampler flush failed: {}", e);
                    break;
                }
            };
            if flushed == 0 {
                break;
            }
            stalled |= write_samples(ring, &scratch[..flushed * CHANNELS], poll)?;
            produced += flushed;
        }

        trace!(frames, produced, ratio, stalled, "Mixed chunk");

        self.stats.current_ratio.set(ratio);
        self.stats.chunks_mixed.increment();
        self.stats.frames_written.add(produced as u64);
        if silenced {
            self.stats.silence_substituted.increment();
        }
        if stalled {
            self.stats.producer_stalls.increment();
        }

        Ok(MixReport {
            input_frames: frames,
            output_frames: produced,
            ratio,
            stalled,
            silenced,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.resampler.is_some()
    }

    pub fn host_sample_rate(&self) -> f64 {
        self.host_sample_rate
    }

    /// Producer rate from the last `set_rate`, or zero.
    pub fn core_rate(&self) -> f64 {
        self.core_rate
    }

    /// Nominal `host_rate / core_rate`.
    pub fn original_ratio(&self) -> f64 {
        self.original_ratio
    }

    /// Ratio chosen by the most recent `mix` (or `set_rate`).
    pub fn current_ratio(&self) -> f64 {
        self.current_ratio
    }

    pub fn rate_control_delta(&self) -> f64 {
        self.rate_control_delta
    }

    pub fn ring(&self) -> &Arc<RingBuffer> {
        &self.ring
    }

    /// Shared counters, readable from any thread.
    pub fn stats(&self) -> Arc<RateStats> {
        Arc::clone(&self.stats)
    }

    #[cfg(test)]
    fn resampler(&self) -> Option<&F::Resampler> {
        self.resampler.as_ref()
    }
}

impl<F: ResamplerFactory> Drop for RateController<F> {
    fn drop(&mut self) {
        if self.resampler.take().is_some() {
            debug!("Rate controller destroyed");
        }
    }
}
