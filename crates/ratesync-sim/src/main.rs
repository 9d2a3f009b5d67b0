// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! RateSync Simulator - soak test for drift correction.
//!
//! Runs a synthetic producer whose clock is deliberately off against a
//! consumer paced like a host audio device, and logs how the ring buffer
//! fill level and conversion ratio settle.
//!
//! Usage: `ratesync-sim [--config <path>]`

mod config;
mod sim;

use std::path::PathBuf;
use tracing::{error, info};

fn config_path_arg() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" || arg == "-c" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ratesync=debug".parse()?)
                .add_directive("ratesync_sim=info".parse()?),
        )
        .init();

    info!("RateSync simulator starting...");

    let config = match config_path_arg() {
        Some(path) => config::ConfigManager::load_from(&path)?,
        None => {
            let manager = config::ConfigManager::new()?;
            let config = manager.load()?;
            config.validate()?;
            config
        }
    };

    let report = match sim::run(&config) {
        Ok(report) => report,
        Err(e) => {
            error!("Simulation failed: {}", e);
            return Err(e.into());
        }
    };

    info!(
        "Done: {} input frames, {} bytes played ({} bytes of underrun), {} bytes left buffered",
        report.input_frames, report.consumed_bytes, report.underrun_bytes, report.final_occupancy
    );
    info!(
        "Final ratio {:.6} after {} chunks, {} producer stalls, {} silent chunks",
        report.stats.current_ratio,
        report.stats.chunks_mixed,
        report.stats.producer_stalls,
        report.stats.silence_substituted
    );

    Ok(())
}
