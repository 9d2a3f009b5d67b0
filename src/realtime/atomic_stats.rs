// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Atomic statistics published by the producer thread.
//!
//! The controller updates these after every mix call; any other thread (a UI
//! meter, the simulation reporter) can read them without touching the ring
//! buffer lock.
//!
//! # Usage
//!
//! ```ignore
//! let stats = controller.stats();
//!
//! // Reporter thread
//! let snapshot = stats.snapshot();
//! println!("ratio {:.6}", snapshot.current_ratio);
//! ```

use std::sync::atomic::{AtomicU64 as StdAtomicU64, Ordering};

/// Atomic f64 stored as raw bits.
///
/// Uses `Relaxed` ordering; each value is independent.
#[derive(Debug)]
pub struct AtomicF64 {
    bits: StdAtomicU64,
}

impl AtomicF64 {
    #[inline]
    pub const fn new(value: f64) -> Self {
        Self {
            bits: StdAtomicU64::new(value.to_bits()),
        }
    }

    #[inline]
    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }
}

impl Default for AtomicF64 {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// Monotonic event counter.
#[derive(Debug, Default)]
pub struct Counter {
    inner: StdAtomicU64,
}

impl Counter {
    #[inline]
    pub const fn new() -> Self {
        Self {
            inner: StdAtomicU64::new(0),
        }
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.inner.load(Ordering::Relaxed)
    }

    /// Add `n` and return the new total.
    #[inline]
    pub fn add(&self, n: u64) -> u64 {
        self.inner.fetch_add(n, Ordering::Relaxed).wrapping_add(n)
    }

    #[inline]
    pub fn increment(&self) -> u64 {
        self.add(1)
    }
}

/// Live view of what the rate controller is doing.
#[derive(Debug, Default)]
pub struct RateStats {
    /// Ratio used by the most recent mix call.
    pub current_ratio: AtomicF64,
    /// Mix calls completed.
    pub chunks_mixed: Counter,
    /// Stereo frames written into the ring.
    pub frames_written: Counter,
    /// Mix calls whose resampler failed and produced silence instead.
    pub silence_substituted: Counter,
    /// Mix calls that had to wait for the consumer.
    pub producer_stalls: Counter,
}

/// Plain copy of [`RateStats`] at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatsSnapshot {
    pub current_ratio: f64,
    pub chunks_mixed: u64,
    pub frames_written: u64,
    pub silence_substituted: u64,
    pub producer_stalls: u64,
}

impl RateStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read every field. Fields are loaded independently, so a snapshot
    /// taken mid-update may mix values from two consecutive mix calls.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            current_ratio: self.current_ratio.get(),
            chunks_mixed: self.chunks_mixed.get(),
            frames_written: self.frames_written.get(),
            silence_substituted: self.silence_substituted.get(),
            producer_stalls: self.producer_stalls.get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_atomic_f64() {
        let ratio = AtomicF64::new(1.0);
        assert!((ratio.get() - 1.0).abs() < 1e-12);

        ratio.set(0.918_75);
        assert!((ratio.get() - 0.918_75).abs() < 1e-12);
    }

    #[test]
    fn test_counter() {
        let counter = Counter::new();
        assert_eq!(counter.increment(), 1);
        assert_eq!(counter.add(4), 5);
        assert_eq!(counter.get(), 5);
    }

    #[test]
    fn test_counter_across_threads() {
        let stats = Arc::new(RateStats::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.chunks_mixed.increment();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(stats.snapshot().chunks_mixed, 4000);
    }
}
