// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Configuration for the simulation driver.

use ratesync::{ConfigError as SyncConfigError, SyncConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to determine config directory")]
    NoConfigDir,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error(transparent)]
    Sync(#[from] SyncConfigError),
    #[error("Invalid simulation settings: {0}")]
    Invalid(String),
}

/// A mid-run producer rate change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateSwitch {
    pub after_ms: u64,
    pub core_rate: f64,
}

/// How the synthetic producer and consumer behave.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub duration_ms: u64,
    /// Nominal producer rate in Hz.
    pub core_rate: f64,
    /// How much faster (positive) or slower the producer really runs.
    pub drift_ppm: f64,
    /// Frames handed to `mix` per call.
    pub producer_chunk_frames: usize,
    /// Interval between consumer reads.
    pub consumer_period_ms: u64,
    pub report_interval_ms: u64,
    pub tone_hz: f64,
    pub rate_switch: Option<RateSwitch>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            duration_ms: 10_000,
            core_rate: 32_040.5,
            drift_ppm: 500.0,
            producer_chunk_frames: 534,
            consumer_period_ms: 10,
            report_interval_ms: 500,
            tone_hz: 440.0,
            rate_switch: None,
        }
    }
}

/// Everything read from `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl SimConfig {
    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sync.validate()?;

        let sim = &self.simulation;
        if !(sim.core_rate.is_finite() && sim.core_rate > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "core_rate must be positive, got {}",
                sim.core_rate
            )));
        }
        if sim.drift_ppm.abs() >= 1_000_000.0 {
            return Err(ConfigError::Invalid("drift_ppm must be within ±1e6".into()));
        }
        if sim.producer_chunk_frames == 0 || sim.consumer_period_ms == 0 {
            return Err(ConfigError::Invalid(
                "producer_chunk_frames and consumer_period_ms must be non-zero".into(),
            ));
        }
        if let Some(switch) = &sim.rate_switch {
            if !(switch.core_rate.is_finite() && switch.core_rate > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "rate_switch.core_rate must be positive, got {}",
                    switch.core_rate
                )));
            }
        }
        Ok(())
    }
}

/// Resolves and reads the simulation config file.
pub struct ConfigManager {
    config_dir: PathBuf,
}

impl ConfigManager {
    /// Use the platform config directory (e.g. `~/.config/ratesync`).
    pub fn new() -> Result<Self, ConfigError> {
        let config_dir = directories::ProjectDirs::from("", "", "ratesync")
            .map(|d| d.config_dir().to_path_buf())
            .ok_or(ConfigError::NoConfigDir)?;

        debug!("Config directory: {:?}", config_dir);
        Ok(Self { config_dir })
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    /// Load `config.toml`, falling back to defaults when it does not exist.
    pub fn load(&self) -> Result<SimConfig, ConfigError> {
        let path = self.config_path();
        if !path.exists() {
            debug!("No config found at {:?}, using defaults", path);
            return Ok(SimConfig::default());
        }
        Self::load_from(&path)
    }

    /// Load and validate an explicit config file.
    pub fn load_from(path: &Path) -> Result<SimConfig, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config = SimConfig::from_toml(&content)?;
        config.validate()?;
        info!("Loaded config from {:?}", path);
        Ok(config)
    }
}
