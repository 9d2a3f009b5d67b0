// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Tunables for the ring buffer and rate controller.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::controller::{BYTES_PER_FRAME, DEFAULT_RATE_CONTROL_DELTA};
use crate::resampler::ResamplerQuality;

/// Largest delta the rubato backend can follow (its relative ratio range is ±10%).
pub const MAX_RATE_CONTROL_DELTA: f64 = 0.05;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Audio synchronization settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Rate the host device drains at, in Hz.
    pub host_sample_rate: f64,
    /// Ring buffer size expressed as latency at the host rate.
    pub buffer_ms: u32,
    /// Gain of the occupancy feedback (maximum relative ratio nudge).
    pub rate_control_delta: f64,
    pub quality: ResamplerQuality,
    /// How often a stalled producer re-checks for space.
    pub backpressure_poll_ms: u64,
    /// Frames per resampler processing block.
    pub chunk_frames: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            host_sample_rate: 48_000.0,
            buffer_ms: 64,
            rate_control_delta: DEFAULT_RATE_CONTROL_DELTA,
            quality: ResamplerQuality::default(),
            backpressure_poll_ms: 1,
            chunk_frames: 256,
        }
    }
}

impl SyncConfig {
    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Read and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        config.validate()?;
        debug!("Loaded sync config from {:?}", path);
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.host_sample_rate.is_finite() && self.host_sample_rate > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "host_sample_rate must be positive, got {}",
                self.host_sample_rate
            )));
        }
        if !(self.rate_control_delta > 0.0 && self.rate_control_delta <= MAX_RATE_CONTROL_DELTA) {
            return Err(ConfigError::Invalid(format!(
                "rate_control_delta must be in (0, {}], got {}",
                MAX_RATE_CONTROL_DELTA, self.rate_control_delta
            )));
        }
        if self.buffer_ms == 0 {
            return Err(ConfigError::Invalid("buffer_ms must be non-zero".into()));
        }
        if self.chunk_frames == 0 {
            return Err(ConfigError::Invalid("chunk_frames must be non-zero".into()));
        }
        Ok(())
    }

    /// Ring capacity in bytes: a whole number of stereo `i16` frames, at least one.
    pub fn ring_capacity_bytes(&self) -> usize {
        let frames = (self.host_sample_rate * f64::from(self.buffer_ms) / 1000.0).round() as usize;
        frames.max(1) * BYTES_PER_FRAME
    }

    pub fn backpressure_poll(&self) -> Duration {
        Duration::from_millis(self.backpressure_poll_ms.max(1))
    }
}
