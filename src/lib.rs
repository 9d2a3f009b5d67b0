// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! RateSync - drift-free audio handoff between a variable-rate producer and
//! a fixed-rate host device.
//!
//! ```text
//! producer thread                                   consumer thread
//!   samples ─► RateController::mix ─► RingBuffer ─► read / read_with_silence
//!                  ▲           │
//!                  └─ free() ──┘  (ratio feedback, backpressure)
//! ```

pub mod config;
pub mod controller;
pub mod realtime;
pub mod resampler;

pub use config::{ConfigError, SyncConfig};
pub use controller::{ControllerError, MixReport, RateController, BYTES_PER_FRAME, CHANNELS};
pub use realtime::{RateStats, RingBuffer, RingBufferError, StatsSnapshot};
pub use resampler::{
    Processed, ResampleError, Resampler, ResamplerFactory, ResamplerQuality, ResamplerSpec,
    RubatoFactory, RubatoResampler,
};
