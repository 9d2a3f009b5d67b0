// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Resampler backed by `rubato`.
//!
//! Rubato's fixed-input resamplers want exactly one block of planar `f32`
//! frames per call, while producers hand over interleaved `i16` chunks of any
//! length. Input is therefore accumulated until a full block is available,
//! and converted frames that do not fit the caller's output are held back
//! until a later call asks for them. Nothing converted is ever discarded.

use std::collections::VecDeque;

use rubato::{
    FastFixedIn, PolynomialDegree, Resampler as _, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};
use tracing::debug;

use super::{Processed, ResampleError, Resampler, ResamplerFactory, ResamplerQuality, ResamplerSpec};

/// Input frames per rubato processing block.
pub const DEFAULT_CHUNK_FRAMES: usize = 256;

/// How far [`Resampler::set_ratio`] may move away from the nominal ratio.
const MAX_RELATIVE_RATIO: f64 = 1.1;

const RATIO_EPSILON: f64 = 1e-9;

/// Converted blocks the pending queue is pre-sized for.
const PENDING_BLOCKS: usize = 4;

impl ResamplerQuality {
    fn sinc_params(self) -> Option<SincInterpolationParameters> {
        let (sinc_len, interpolation, oversampling_factor) = match self {
            Self::Fast => return None,
            Self::Normal => (64, SincInterpolationType::Linear, 128),
            Self::Good => (128, SincInterpolationType::Linear, 256),
            Self::High => (256, SincInterpolationType::Cubic, 256),
        };
        Some(SincInterpolationParameters {
            sinc_len,
            f_cutoff: 0.95,
            interpolation,
            oversampling_factor,
            window: WindowFunction::BlackmanHarris2,
        })
    }
}

/// The rubato `Resampler` trait has generic methods, so it cannot be boxed.
enum Engine {
    Poly(FastFixedIn<f32>),
    Sinc(SincFixedIn<f32>),
}

impl Engine {
    fn new(spec: &ResamplerSpec, chunk_frames: usize) -> Result<Self, rubato::ResamplerConstructionError> {
        let ratio = spec.ratio();
        match spec.quality.sinc_params() {
            Some(params) => SincFixedIn::new(ratio, MAX_RELATIVE_RATIO, params, chunk_frames, spec.channels)
                .map(Self::Sinc),
            None => FastFixedIn::new(
                ratio,
                MAX_RELATIVE_RATIO,
                PolynomialDegree::Cubic,
                chunk_frames,
                spec.channels,
            )
            .map(Self::Poly),
        }
    }

    fn process_into_buffer(
        &mut self,
        input: &[Vec<f32>],
        output: &mut [Vec<f32>],
    ) -> Result<(usize, usize), rubato::ResampleError> {
        match self {
            Self::Poly(r) => r.process_into_buffer(input, output, None),
            Self::Sinc(r) => r.process_into_buffer(input, output, None),
        }
    }

    fn input_frames_next(&self) -> usize {
        match self {
            Self::Poly(r) => r.input_frames_next(),
            Self::Sinc(r) => r.input_frames_next(),
        }
    }

    fn output_frames_max(&self) -> usize {
        match self {
            Self::Poly(r) => r.output_frames_max(),
            Self::Sinc(r) => r.output_frames_max(),
        }
    }

    fn set_resample_ratio(&mut self, ratio: f64, ramp: bool) -> Result<(), rubato::ResampleError> {
        match self {
            Self::Poly(r) => r.set_resample_ratio(ratio, ramp),
            Self::Sinc(r) => r.set_resample_ratio(ratio, ramp),
        }
    }
}

#[inline]
fn to_f32(sample: i16) -> f32 {
    f32::from(sample) / 32768.0
}

#[inline]
fn to_i16(sample: f32) -> i16 {
    (sample * 32768.0).round().clamp(-32768.0, 32767.0) as i16
}

/// Stereo (or any channel count) interleaved `i16` resampler.
pub struct RubatoResampler {
    engine: Engine,
    channels: usize,
    ratio: f64,
    /// Planar input waiting for a full block.
    input: Vec<Vec<f32>>,
    /// Planar output of one block.
    output: Vec<Vec<f32>>,
    /// Interleaved converted samples not yet handed to the caller.
    pending: VecDeque<i16>,
}

impl RubatoResampler {
    pub fn new(spec: &ResamplerSpec, chunk_frames: usize) -> Result<Self, ResampleError> {
        spec.validate()?;
        let chunk_frames = chunk_frames.max(1);
        let engine = Engine::new(spec, chunk_frames)
            .map_err(|e| ResampleError::Construction(e.to_string()))?;

        let out_max = engine.output_frames_max();

        debug!(
            input_rate = spec.input_rate,
            output_rate = spec.output_rate,
            quality = ?spec.quality,
            chunk_frames,
            "Created rubato resampler"
        );

        Ok(Self {
            engine,
            channels: spec.channels,
            ratio: spec.ratio(),
            input: vec![Vec::with_capacity(chunk_frames * 2); spec.channels],
            output: vec![vec![0.0; out_max]; spec.channels],
            pending: VecDeque::with_capacity(out_max * PENDING_BLOCKS * spec.channels),
        })
    }

    /// Ratio currently applied by the engine.
    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    fn run_blocks(&mut self) -> Result<(), ResampleError> {
        while self.input[0].len() >= self.engine.input_frames_next() {
            let (consumed, produced) = match self
                .engine
                .process_into_buffer(&self.input, &mut self.output)
            {
                Ok(counts) => counts,
                Err(e) => {
                    for plane in &mut self.input {
                        plane.clear();
                    }
                    return Err(ResampleError::Process(e.to_string()));
                }
            };

            for plane in &mut self.input {
                plane.drain(..consumed);
            }
            for frame in 0..produced {
                for plane in &self.output {
                    self.pending.push_back(to_i16(plane[frame]));
                }
            }
        }
        Ok(())
    }
}

impl Resampler for RubatoResampler {
    fn set_ratio(&mut self, ratio: f64) -> Result<(), ResampleError> {
        if (ratio - self.ratio).abs() < RATIO_EPSILON {
            return Ok(());
        }
        self.engine
            .set_resample_ratio(ratio, true)
            .map_err(|e| ResampleError::Process(e.to_string()))?;
        self.ratio = ratio;
        Ok(())
    }

    fn process(&mut self, input: &[i16], output: &mut [i16]) -> Result<Processed, ResampleError> {
        let channels = self.channels;
        if input.len() % channels != 0 {
            return Err(ResampleError::Process(format!(
                "{} samples is not a whole number of {}-channel frames",
                input.len(),
                channels
            )));
        }

        for frame in input.chunks_exact(channels) {
            for (plane, &sample) in self.input.iter_mut().zip(frame) {
                plane.push(to_f32(sample));
            }
        }
        self.run_blocks()?;

        let frames = (output.len() / channels).min(self.pending.len() / channels);
        let samples = frames * channels;
        for (slot, sample) in output[..samples].iter_mut().zip(self.pending.drain(..samples)) {
            *slot = sample;
        }

        Ok(Processed {
            input_frames: input.len() / channels,
            output_frames: frames,
        })
    }

    fn pending_frames(&self) -> usize {
        self.pending.len() / self.channels
    }
}

/// Builds [`RubatoResampler`]s with a fixed processing block size.
#[derive(Debug, Clone, Copy)]
pub struct RubatoFactory {
    chunk_frames: usize,
}

impl RubatoFactory {
    pub fn new(chunk_frames: usize) -> Self {
        Self {
            chunk_frames: chunk_frames.max(1),
        }
    }

    pub fn chunk_frames(&self) -> usize {
        self.chunk_frames
    }
}

impl Default for RubatoFactory {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_FRAMES)
    }
}

impl ResamplerFactory for RubatoFactory {
    type Resampler = RubatoResampler;

    fn create(&self, spec: &ResamplerSpec) -> Result<RubatoResampler, ResampleError> {
        RubatoResampler::new(spec, self.chunk_frames)
    }
}
