// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Producer and consumer threads running against one ring buffer.
//!
//! ```text
//! [tone generator @ core rate ± drift] → RateController::mix → RingBuffer
//!                                                                   ↓
//!                                     [paced consumer @ host rate] ←┘
//! ```

use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ratesync::{
    ControllerError, RateController, RingBuffer, RingBufferError, RubatoFactory, StatsSnapshot,
    BYTES_PER_FRAME, CHANNELS,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{SimConfig, SimulationConfig};

#[derive(Debug, Error)]
pub enum SimError {
    #[error("Ring buffer setup failed: {0}")]
    Ring(#[from] RingBufferError),
    #[error("Rate controller failed: {0}")]
    Controller(#[from] ControllerError),
    #[error("Failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("{0} thread panicked")]
    Panicked(&'static str),
}

/// Totals at the end of a run.
#[derive(Debug, Clone, Copy)]
pub struct SimReport {
    pub input_frames: u64,
    pub consumed_bytes: u64,
    pub underrun_bytes: u64,
    pub final_occupancy: usize,
    pub stats: StatsSnapshot,
}

/// Stereo sine source with continuous phase across chunks and rate changes.
struct ToneGenerator {
    phase: f64,
    step: f64,
    tone_hz: f64,
}

impl ToneGenerator {
    fn new(tone_hz: f64, rate: f64) -> Self {
        Self {
            phase: 0.0,
            step: TAU * tone_hz / rate,
            tone_hz,
        }
    }

    fn set_rate(&mut self, rate: f64) {
        self.step = TAU * self.tone_hz / rate;
    }

    fn fill(&mut self, out: &mut [i16]) {
        for frame in out.chunks_exact_mut(CHANNELS) {
            let sample = (self.phase.sin() * 8_000.0) as i16;
            frame.fill(sample);
            self.phase = (self.phase + self.step) % TAU;
        }
    }
}

fn producer_loop(
    mut controller: RateController<RubatoFactory>,
    sim: SimulationConfig,
    stop: Arc<AtomicBool>,
) -> Result<u64, ControllerError> {
    let mut core_rate = sim.core_rate;
    let mut tone = ToneGenerator::new(sim.tone_hz, core_rate);
    let mut chunk = vec![0i16; sim.producer_chunk_frames * CHANNELS];
    let mut pending_switch = sim.rate_switch.clone();

    let start = Instant::now();
    let mut paced_since = start;
    let mut paced_frames: u64 = 0;
    let mut total_frames: u64 = 0;

    while !stop.load(Ordering::Relaxed) {
        if let Some(switch) = pending_switch.as_ref() {
            if start.elapsed() >= Duration::from_millis(switch.after_ms) {
                info!("Switching core rate {} Hz -> {} Hz", core_rate, switch.core_rate);
                core_rate = switch.core_rate;
                controller.set_rate(core_rate)?;
                tone.set_rate(core_rate);
                paced_since = Instant::now();
                paced_frames = 0;
                pending_switch = None;
            }
        }

        tone.fill(&mut chunk);
        controller.mix(&chunk)?;
        paced_frames += sim.producer_chunk_frames as u64;
        total_frames += sim.producer_chunk_frames as u64;

        // Emulate a producer clock that is off by `drift_ppm`
        let actual_rate = core_rate * (1.0 + sim.drift_ppm / 1_000_000.0);
        let due = paced_since + Duration::from_secs_f64(paced_frames as f64 / actual_rate);
        if let Some(wait) = due.checked_duration_since(Instant::now()) {
            thread::sleep(wait);
        }
    }

    debug!(total_frames, "Producer stopped");
    Ok(total_frames)
}

fn consumer_loop(
    ring: Arc<RingBuffer>,
    host_sample_rate: f64,
    period: Duration,
    stop: Arc<AtomicBool>,
    consumed: Arc<AtomicU64>,
    underrun: Arc<AtomicU64>,
) {
    let mut device_buffer = Vec::new();
    let start = Instant::now();
    let mut drained_frames: u64 = 0;

    while !stop.load(Ordering::Relaxed) {
        thread::sleep(period);

        // Drain exactly what a device clock would have played by now
        let due = (start.elapsed().as_secs_f64() * host_sample_rate) as u64;
        let frames = (due - drained_frames.min(due)) as usize;
        drained_frames += frames as u64;

        device_buffer.resize(frames * BYTES_PER_FRAME, 0u8);
        let got = ring.read_with_silence(&mut device_buffer);
        consumed.fetch_add(device_buffer.len() as u64, Ordering::Relaxed);
        if got < device_buffer.len() {
            let missing = (device_buffer.len() - got) as u64;
            underrun.fetch_add(missing, Ordering::Relaxed);
            if drained_frames > frames as u64 {
                warn!(missing_bytes = missing, "Consumer underrun");
            }
        }
    }

    debug!(drained_frames, "Consumer stopped");
}

fn join<T>(handle: JoinHandle<T>, name: &'static str) -> Result<T, SimError> {
    handle.join().map_err(|_| SimError::Panicked(name))
}

/// Run the producer/consumer pair for the configured duration.
pub fn run(config: &SimConfig) -> Result<SimReport, SimError> {
    let sync = &config.sync;
    let sim = config.simulation.clone();

    let ring = Arc::new(RingBuffer::new(sync.ring_capacity_bytes())?);
    let factory = RubatoFactory::new(sync.chunk_frames);
    let mut controller = RateController::from_config(factory, sync, Arc::clone(&ring))?
        .with_max_chunk_frames(sim.producer_chunk_frames);
    controller.set_rate(sim.core_rate)?;
    let stats = controller.stats();

    info!(
        "Simulating {} Hz (drift {} ppm) -> {} Hz through {} bytes for {} ms",
        sim.core_rate,
        sim.drift_ppm,
        sync.host_sample_rate,
        ring.capacity(),
        sim.duration_ms
    );

    let producer_stop = Arc::new(AtomicBool::new(false));
    let consumer_stop = Arc::new(AtomicBool::new(false));
    let consumed = Arc::new(AtomicU64::new(0));
    let underrun = Arc::new(AtomicU64::new(0));

    let consumer = {
        let ring = Arc::clone(&ring);
        let stop = Arc::clone(&consumer_stop);
        let consumed = Arc::clone(&consumed);
        let underrun = Arc::clone(&underrun);
        let host_sample_rate = sync.host_sample_rate;
        let period = Duration::from_millis(sim.consumer_period_ms);
        thread::Builder::new()
            .name("ratesync-consumer".into())
            .spawn(move || consumer_loop(ring, host_sample_rate, period, stop, consumed, underrun))?
    };

    let producer = {
        let stop = Arc::clone(&producer_stop);
        let sim = sim.clone();
        thread::Builder::new()
            .name("ratesync-producer".into())
            .spawn(move || producer_loop(controller, sim, stop))?
    };

    let start = Instant::now();
    let run_for = Duration::from_millis(sim.duration_ms);
    let report_every = Duration::from_millis(sim.report_interval_ms.max(1));
    while start.elapsed() < run_for && !producer.is_finished() {
        thread::sleep(report_every.min(run_for.saturating_sub(start.elapsed())));
        let snapshot = stats.snapshot();
        let fill = ring.occupied() as f64 / ring.capacity() as f64;
        info!(
            "fill {:5.1}%  ratio {:.6}  chunks {}  stalls {}  silence {}",
            fill * 100.0,
            snapshot.current_ratio,
            snapshot.chunks_mixed,
            snapshot.producer_stalls,
            snapshot.silence_substituted
        );
    }

    // The producer may be stalled on a full ring, so keep draining until it exits
    producer_stop.store(true, Ordering::Relaxed);
    let produced = join(producer, "producer");
    consumer_stop.store(true, Ordering::Relaxed);
    join(consumer, "consumer")?;

    let input_frames = match produced? {
        Ok(frames) => frames,
        Err(e) => {
            error!("Producer failed: {}", e);
            return Err(e.into());
        }
    };

    Ok(SimReport {
        input_frames,
        consumed_bytes: consumed.load(Ordering::Relaxed),
        underrun_bytes: underrun.load(Ordering::Relaxed),
        final_occupancy: ring.occupied(),
        stats: stats.snapshot(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateSwitch;

    fn short_run() -> SimConfig {
        let mut config = SimConfig::default();
        config.simulation.duration_ms = 400;
        config.simulation.report_interval_ms = 100;
        config
    }

    #[test]
    fn test_tone_generator_is_stereo_and_bounded() {
        let mut tone = ToneGenerator::new(440.0, 32_000.0);
        let mut out = vec![0i16; 256];
        tone.fill(&mut out);
        for frame in out.chunks_exact(2) {
            assert_eq!(frame[0], frame[1]);
            assert!(frame[0].abs() <= 8_000);
        }
        assert!(out.iter().any(|&s| s != 0));
    }

    #[test]
    fn test_short_run_moves_audio() {
        let report = run(&short_run()).unwrap();
        assert!(report.input_frames > 0);
        assert!(report.stats.chunks_mixed > 0);
        assert!(report.stats.frames_written > 0);
        assert!(report.consumed_bytes > 0);
        assert_eq!(report.stats.silence_substituted, 0);
    }

    #[test]
    fn test_run_with_rate_switch() {
        let mut config = short_run();
        config.simulation.rate_switch = Some(RateSwitch {
            after_ms: 150,
            core_rate: 44_100.0,
        });
        let report = run(&config).unwrap();
        assert!(report.stats.chunks_mixed > 0);
    }

    #[test]
    fn test_invalid_core_rate_fails_setup() {
        let mut config = short_run();
        config.simulation.core_rate = -1.0;
        assert!(matches!(
            run(&config),
            Err(SimError::Controller(ControllerError::InvalidRate(_)))
        ));
    }
}
