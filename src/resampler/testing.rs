// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Deterministic resampler doubles for controller tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{Processed, ResampleError, Resampler, ResamplerFactory, ResamplerSpec};

/// Nearest-neighbour stretcher that honours `set_ratio` exactly.
pub struct StretchResampler {
    pub channels: usize,
    pub ratio: f64,
    pub ratio_updates: usize,
}

impl Resampler for StretchResampler {
    fn set_ratio(&mut self, ratio: f64) -> Result<(), ResampleError> {
        self.ratio = ratio;
        self.ratio_updates += 1;
        Ok(())
    }

    fn process(&mut self, input: &[i16], output: &mut [i16]) -> Result<Processed, ResampleError> {
        let channels = self.channels;
        let in_frames = input.len() / channels;
        let wanted = (in_frames as f64 * self.ratio).round() as usize;
        let out_frames = wanted.min(output.len() / channels);

        for frame in 0..out_frames {
            let src = (frame * in_frames / out_frames).min(in_frames.saturating_sub(1));
            for ch in 0..channels {
                output[frame * channels + ch] = input[src * channels + ch];
            }
        }

        Ok(Processed {
            input_frames: in_frames,
            output_frames: out_frames,
        })
    }
}

/// Creates [`StretchResampler`]s, optionally refusing the first few requests.
#[derive(Default)]
pub struct StretchFactory {
    pub created: Arc<AtomicUsize>,
    pub refuse: Arc<AtomicUsize>,
}

impl StretchFactory {
    /// Fail the next `count` create calls.
    pub fn refusing(count: usize) -> Self {
        Self {
            created: Arc::default(),
            refuse: Arc::new(AtomicUsize::new(count)),
        }
    }
}

impl ResamplerFactory for StretchFactory {
    type Resampler = StretchResampler;

    fn create(&self, spec: &ResamplerSpec) -> Result<StretchResampler, ResampleError> {
        spec.validate()?;
        if self
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ResampleError::Construction("refused by test factory".into()));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(StretchResampler {
            channels: spec.channels,
            ratio: spec.ratio(),
            ratio_updates: 0,
        })
    }
}

/// Scribbles over its output and then reports failure.
pub struct FailingResampler;

impl Resampler for FailingResampler {
    fn process(&mut self, _input: &[i16], output: &mut [i16]) -> Result<Processed, ResampleError> {
        output.fill(0x5555);
        Err(ResampleError::Process("injected failure".into()))
    }
}

pub struct FailingFactory;

impl ResamplerFactory for FailingFactory {
    type Resampler = FailingResampler;

    fn create(&self, _spec: &ResamplerSpec) -> Result<FailingResampler, ResampleError> {
        Ok(FailingResampler)
    }
}
