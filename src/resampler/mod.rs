// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Sample-rate conversion capability used by the rate controller.
//!
//! The controller only needs three things from a resampler: create one for a
//! pair of rates, push interleaved samples through it, and drop it. The
//! [`ResamplerFactory`] / [`Resampler`] pair is that seam; [`RubatoFactory`]
//! is the production backend.

mod rubato_backend;

#[cfg(test)]
pub(crate) mod testing;

pub use rubato_backend::{RubatoFactory, RubatoResampler};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResampleError {
    #[error("Invalid conversion {input_rate} Hz -> {output_rate} Hz")]
    InvalidRate { input_rate: f64, output_rate: f64 },
    #[error("Resampler construction failed: {0}")]
    Construction(String),
    #[error("Resampler processing failed: {0}")]
    Process(String),
}

/// Quality preset for the resampler.
///
/// Higher presets cost more CPU per frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResamplerQuality {
    /// Cubic polynomial interpolation, no anti-aliasing filter.
    Fast,
    /// 64-tap sinc, linear interpolation.
    #[default]
    Normal,
    /// 128-tap sinc, linear interpolation.
    Good,
    /// 256-tap sinc, cubic interpolation.
    High,
}

/// What a resampler is asked to convert.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResamplerSpec {
    /// Interleaved channel count.
    pub channels: usize,
    /// Producer rate in Hz.
    pub input_rate: f64,
    /// Host rate in Hz.
    pub output_rate: f64,
    pub quality: ResamplerQuality,
}

impl ResamplerSpec {
    /// Nominal output/input ratio.
    pub fn ratio(&self) -> f64 {
        self.output_rate / self.input_rate
    }

    pub(crate) fn validate(&self) -> Result<(), ResampleError> {
        let valid = |rate: f64| rate.is_finite() && rate > 0.0;
        if self.channels == 0 || !valid(self.input_rate) || !valid(self.output_rate) {
            return Err(ResampleError::InvalidRate {
                input_rate: self.input_rate,
                output_rate: self.output_rate,
            });
        }
        Ok(())
    }
}

/// Frames moved by one [`Resampler::process`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Processed {
    pub input_frames: usize,
    pub output_frames: usize,
}

/// A live conversion context for one fixed pair of rates.
pub trait Resampler: Send {
    /// Retune the output/input ratio used from the next call on.
    ///
    /// The controller calls this once per mix with its feedback-adjusted
    /// ratio. Backends that cannot retune keep the default no-op and still
    /// have their output bounded by the size of the buffer they are given.
    fn set_ratio(&mut self, _ratio: f64) -> Result<(), ResampleError> {
        Ok(())
    }

    /// Convert interleaved `input` into interleaved `output`.
    ///
    /// Writes at most `output.len() / channels` frames, all at the start of
    /// `output`.
    fn process(&mut self, input: &[i16], output: &mut [i16]) -> Result<Processed, ResampleError>;

    /// Converted frames held back because an earlier `output` was too small.
    ///
    /// They are returned by later `process` calls, including calls with no
    /// input.
    fn pending_frames(&self) -> usize {
        0
    }
}

/// Creates resamplers. A new one is requested on every rate change.
pub trait ResamplerFactory {
    type Resampler: Resampler;

    fn create(&self, spec: &ResamplerSpec) -> Result<Self::Resampler, ResampleError>;
}
