// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Mutex-guarded byte FIFO shared by one producer and one consumer thread.
//!
//! # Example
//!
//! ```ignore
//! use ratesync::realtime::RingBuffer;
//!
//! let ring = RingBuffer::new(4096)?;
//!
//! // Producer thread
//! ring.write(&bytes)?;
//!
//! // Consumer thread (audio callback)
//! ring.read_with_silence(&mut device_buffer);
//! ```
//!
//! # Size policy
//!
//! `write` and `read` never transfer part of a request. A request larger than
//! the current free (or occupied) byte count is rejected with an error and the
//! buffer is left untouched, so `free() + occupied() == capacity()` always
//! holds.

use parking_lot::{Condvar, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RingBufferError {
    #[error("Ring buffer capacity must be non-zero")]
    ZeroCapacity,
    #[error("Failed to allocate {capacity} bytes of ring storage")]
    Allocation { capacity: usize },
    #[error("Write of {requested} bytes exceeds {free} free bytes")]
    Overflow { requested: usize, free: usize },
    #[error("Read of {requested} bytes exceeds {occupied} occupied bytes")]
    Underflow { requested: usize, occupied: usize },
    #[error("Request of {requested} bytes can never fit in {capacity} bytes")]
    ExceedsCapacity { requested: usize, capacity: usize },
}

/// Storage and cursors, only ever touched with the lock held.
struct Inner {
    buffer: Box<[u8]>,
    /// Next byte to read.
    read_pos: usize,
    /// Next byte to write.
    write_pos: usize,
    /// Bytes available for writing.
    free: usize,
}

impl Inner {
    fn capacity(&self) -> usize {
        self.buffer.len()
    }

    fn occupied(&self) -> usize {
        self.capacity() - self.free
    }

    /// Copy `data` in at the write cursor. Caller checked `data.len() <= free`.
    fn push(&mut self, data: &[u8]) {
        let capacity = self.capacity();
        let first = data.len().min(capacity - self.write_pos);
        let (head, tail) = data.split_at(first);

        self.buffer[self.write_pos..self.write_pos + first].copy_from_slice(head);
        self.buffer[..tail.len()].copy_from_slice(tail);

        self.write_pos = (self.write_pos + data.len()) % capacity;
        self.free -= data.len();
    }

    /// Copy out at the read cursor. Caller checked `data.len() <= occupied`.
    fn pop(&mut self, data: &mut [u8]) {
        let capacity = self.capacity();
        let first = data.len().min(capacity - self.read_pos);
        let (head, tail) = data.split_at_mut(first);

        head.copy_from_slice(&self.buffer[self.read_pos..self.read_pos + first]);
        let second = tail.len();
        tail.copy_from_slice(&self.buffer[..second]);

        self.read_pos = (self.read_pos + data.len()) % capacity;
        self.free += data.len();
    }
}

/// Fixed-capacity byte ring buffer.
///
/// Every operation takes the same single lock for the length of at most two
/// slice copies. A condition variable is signalled whenever space is freed so
/// a stalled producer (see [`RingBuffer::write_blocking`]) wakes promptly.
pub struct RingBuffer {
    inner: Mutex<Inner>,
    space_freed: Condvar,
    capacity: usize,
}

impl RingBuffer {
    /// Allocate a ring of exactly `capacity` bytes.
    ///
    /// The capacity does not need to be a power of two.
    pub fn new(capacity: usize) -> Result<Self, RingBufferError> {
        if capacity == 0 {
            return Err(RingBufferError::ZeroCapacity);
        }

        let mut storage = Vec::new();
        storage
            .try_reserve_exact(capacity)
            .map_err(|_| RingBufferError::Allocation { capacity })?;
        storage.resize(capacity, 0u8);

        debug!("Created ring buffer of {} bytes", capacity);

        Ok(Self {
            inner: Mutex::new(Inner {
                buffer: storage.into_boxed_slice(),
                read_pos: 0,
                write_pos: 0,
                free: capacity,
            }),
            space_freed: Condvar::new(),
            capacity,
        })
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Restore the empty state without reallocating.
    ///
    /// Must not race a `read` or `write` in flight; the stored bytes are
    /// discarded, not zeroed.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.read_pos = 0;
        inner.write_pos = 0;
        inner.free = inner.capacity();
        drop(inner);

        self.space_freed.notify_all();
        debug!("Ring buffer reset");
    }

    /// Append `data`, wrapping past the end of storage as needed.
    pub fn write(&self, data: &[u8]) -> Result<(), RingBufferError> {
        let mut inner = self.inner.lock();
        if data.len() > inner.free {
            return Err(RingBufferError::Overflow {
                requested: data.len(),
                free: inner.free,
            });
        }
        inner.push(data);
        Ok(())
    }

    /// Wait until `data` fits, then append it.
    ///
    /// The wait has no timeout and cannot be cancelled: the only way out is a
    /// consumer `read` (or a `reset`) freeing enough space. `poll` caps how
    /// long a single wait lasts before free space is re-checked.
    ///
    /// Returns whether the caller had to stall.
    pub fn write_blocking(&self, data: &[u8], poll: Duration) -> Result<bool, RingBufferError> {
        if data.len() > self.capacity {
            return Err(RingBufferError::ExceedsCapacity {
                requested: data.len(),
                capacity: self.capacity,
            });
        }

        let mut inner = self.inner.lock();
        let mut stalled = false;
        while inner.free < data.len() {
            if !stalled {
                trace!(
                    requested = data.len(),
                    free = inner.free,
                    "Ring buffer full, producer stalling"
                );
                stalled = true;
            }
            self.space_freed.wait_for(&mut inner, poll);
        }
        inner.push(data);
        Ok(stalled)
    }

    /// Remove exactly `data.len()` bytes, oldest first.
    pub fn read(&self, data: &mut [u8]) -> Result<(), RingBufferError> {
        let mut inner = self.inner.lock();
        let occupied = inner.occupied();
        if data.len() > occupied {
            return Err(RingBufferError::Underflow {
                requested: data.len(),
                occupied,
            });
        }
        inner.pop(data);
        drop(inner);

        self.space_freed.notify_one();
        Ok(())
    }

    /// Fill `data` with whatever is buffered and pad the rest with zeros.
    ///
    /// Returns the number of bytes that came from the ring. This is the shape
    /// an audio device callback wants: it must always hand back a full
    /// buffer, and an underrun plays as silence.
    pub fn read_with_silence(&self, data: &mut [u8]) -> usize {
        let mut inner = self.inner.lock();
        let count = data.len().min(inner.occupied());
        let (filled, padding) = data.split_at_mut(count);
        inner.pop(filled);
        drop(inner);

        padding.fill(0);
        if count > 0 {
            self.space_freed.notify_one();
        }
        count
    }

    /// Bytes currently stored and not yet read (momentary snapshot).
    pub fn occupied(&self) -> usize {
        self.inner.lock().occupied()
    }

    /// Bytes currently available for writing (momentary snapshot).
    pub fn free(&self) -> usize {
        self.inner.lock().free
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .field("free", &self.free())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    /// Deterministic xorshift so interleavings are reproducible.
    struct XorShift(u64);

    impl XorShift {
        fn next(&mut self) -> u64 {
            let mut x = self.0;
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            self.0 = x;
            x
        }

        fn below(&mut self, bound: usize) -> usize {
            (self.next() % bound as u64) as usize
        }
    }

    #[test]
    fn test_new_rejects_zero_capacity() {
        assert_eq!(
            RingBuffer::new(0).unwrap_err(),
            RingBufferError::ZeroCapacity
        );
    }

    #[test]
    fn test_starts_empty() {
        let ring = RingBuffer::new(10).unwrap();
        assert_eq!(ring.capacity(), 10);
        assert_eq!(ring.free(), 10);
        assert_eq!(ring.occupied(), 0);
    }

    #[test]
    fn test_basic_write_read() {
        let ring = RingBuffer::new(16).unwrap();

        ring.write(&[1, 2, 3, 4]).unwrap();
        assert_eq!(ring.occupied(), 4);
        assert_eq!(ring.free(), 12);

        let mut out = [0u8; 4];
        ring.read(&mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
        assert_eq!(ring.free(), 16);
    }

    #[test]
    fn test_wrap_around_round_trip() {
        let ring = RingBuffer::new(16).unwrap();

        // Move both cursors to 12
        ring.write(&[0xAA; 12]).unwrap();
        let mut skip = [0u8; 12];
        ring.read(&mut skip).unwrap();

        let input = [1, 2, 3, 4, 5, 6, 7, 8];
        ring.write(&input).unwrap();
        assert_eq!(ring.occupied(), 8);

        let mut out = [0u8; 8];
        ring.read(&mut out).unwrap();
        assert_eq!(out, input);
        assert_eq!(ring.free(), 16);
    }

    #[test]
    fn test_round_trip_across_multiple_calls() {
        let ring = RingBuffer::new(7).unwrap();
        let input: Vec<u8> = (0..40).collect();
        let mut output = Vec::new();

        for chunk in input.chunks(5) {
            ring.write(chunk).unwrap();
            let mut out = vec![0u8; 3];
            ring.read(&mut out).unwrap();
            output.extend_from_slice(&out);
            let mut rest = vec![0u8; ring.occupied()];
            ring.read(&mut rest).unwrap();
            output.extend_from_slice(&rest);
        }

        assert_eq!(output, input);
    }

    #[test]
    fn test_overflow_rejected_without_side_effects() {
        let ring = RingBuffer::new(8).unwrap();
        ring.write(&[1; 6]).unwrap();

        let err = ring.write(&[2; 3]).unwrap_err();
        assert_eq!(
            err,
            RingBufferError::Overflow {
                requested: 3,
                free: 2
            }
        );
        assert_eq!(ring.occupied(), 6);

        let mut out = [0u8; 6];
        ring.read(&mut out).unwrap();
        assert_eq!(out, [1; 6]);
    }

    #[test]
    fn test_underflow_rejected_without_side_effects() {
        let ring = RingBuffer::new(8).unwrap();
        ring.write(&[9, 9]).unwrap();

        let mut out = [0u8; 3];
        let err = ring.read(&mut out).unwrap_err();
        assert_eq!(
            err,
            RingBufferError::Underflow {
                requested: 3,
                occupied: 2
            }
        );
        assert_eq!(out, [0, 0, 0]);
        assert_eq!(ring.occupied(), 2);
    }

    #[test]
    fn test_read_with_silence_pads_underrun() {
        let ring = RingBuffer::new(8).unwrap();
        ring.write(&[5, 6, 7]).unwrap();

        let mut out = [0xFFu8; 6];
        let got = ring.read_with_silence(&mut out);
        assert_eq!(got, 3);
        assert_eq!(out, [5, 6, 7, 0, 0, 0]);
        assert_eq!(ring.free(), 8);
    }

    #[test]
    fn test_reset_restores_empty_state() {
        let ring = RingBuffer::new(8).unwrap();
        ring.write(&[1, 2, 3, 4, 5]).unwrap();
        let mut out = [0u8; 2];
        ring.read(&mut out).unwrap();

        ring.reset();
        assert_eq!(ring.free(), 8);
        assert_eq!(ring.occupied(), 0);

        ring.write(&[7; 8]).unwrap();
        let mut all = [0u8; 8];
        ring.read(&mut all).unwrap();
        assert_eq!(all, [7; 8]);
    }

    #[test]
    fn test_invariant_holds_for_random_valid_operations() {
        let ring = RingBuffer::new(33).unwrap();
        let mut rng = XorShift(0x9E37_79B9_7F4A_7C15);
        let mut scratch = [0u8; 33];

        for _ in 0..5_000 {
            if rng.next() & 1 == 0 {
                let n = rng.below(ring.free() + 1);
                ring.write(&scratch[..n]).unwrap();
            } else {
                let n = rng.below(ring.occupied() + 1);
                ring.read(&mut scratch[..n]).unwrap();
            }
            assert_eq!(ring.free() + ring.occupied(), ring.capacity());
        }
    }

    #[test]
    fn test_write_blocking_rejects_oversized() {
        let ring = RingBuffer::new(4).unwrap();
        let err = ring
            .write_blocking(&[0; 5], Duration::from_millis(1))
            .unwrap_err();
        assert_eq!(
            err,
            RingBufferError::ExceedsCapacity {
                requested: 5,
                capacity: 4
            }
        );
    }

    #[test]
    fn test_write_blocking_without_contention_does_not_stall() {
        let ring = RingBuffer::new(4).unwrap();
        let stalled = ring
            .write_blocking(&[1, 2], Duration::from_millis(1))
            .unwrap();
        assert!(!stalled);
        assert_eq!(ring.occupied(), 2);
    }

    #[test]
    fn test_write_blocking_waits_for_consumer() {
        let ring = Arc::new(RingBuffer::new(8).unwrap());
        ring.write(&[1; 8]).unwrap();

        let consumer_ring = Arc::clone(&ring);
        let consumer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            let mut out = [0u8; 4];
            consumer_ring.read(&mut out).unwrap();
            out
        });

        let start = Instant::now();
        let stalled = ring
            .write_blocking(&[2; 4], Duration::from_millis(1))
            .unwrap();
        assert!(stalled);
        assert!(start.elapsed() >= Duration::from_millis(40));
        assert_eq!(consumer.join().unwrap(), [1; 4]);

        let mut rest = [0u8; 8];
        ring.read(&mut rest).unwrap();
        assert_eq!(rest, [1, 1, 1, 1, 2, 2, 2, 2]);
    }

    #[test]
    fn test_concurrent_checksums_match() {
        const OPS: usize = 20_000;
        let ring = Arc::new(RingBuffer::new(97).unwrap());
        let finished = Arc::new(AtomicBool::new(false));

        let producer_ring = Arc::clone(&ring);
        let producer_finished = Arc::clone(&finished);
        let producer = thread::spawn(move || {
            let mut rng = XorShift(0xDEAD_BEEF);
            let mut sum: u64 = 0;
            let mut value: u8 = 0;
            let mut chunk = [0u8; 32];
            for _ in 0..OPS {
                let want = rng.below(chunk.len()) + 1;
                // Only this thread writes, so free space can only grow
                let n = want.min(producer_ring.free());
                for byte in &mut chunk[..n] {
                    *byte = value;
                    sum = sum.wrapping_mul(31).wrapping_add(u64::from(value));
                    value = value.wrapping_add(1);
                }
                producer_ring.write(&chunk[..n]).unwrap();
                if n == 0 {
                    thread::yield_now();
                }
            }
            producer_finished.store(true, Ordering::Release);
            sum
        });

        let consumer_ring = Arc::clone(&ring);
        let consumer = thread::spawn(move || {
            let mut rng = XorShift(0x1234_5678);
            let mut sum: u64 = 0;
            let mut chunk = [0u8; 32];
            loop {
                let done = finished.load(Ordering::Acquire);
                let want = rng.below(chunk.len()) + 1;
                let n = want.min(consumer_ring.occupied());
                consumer_ring.read(&mut chunk[..n]).unwrap();
                for &byte in &chunk[..n] {
                    sum = sum.wrapping_mul(31).wrapping_add(u64::from(byte));
                }
                if n == 0 {
                    if done {
                        break;
                    }
                    thread::yield_now();
                }
            }
            sum
        });

        let produced = producer.join().unwrap();
        let consumed = consumer.join().unwrap();

        assert_eq!(produced, consumed);
        assert_eq!(ring.free(), ring.capacity());
    }
}
