// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Data shared between the producer and consumer threads.
//!
//! # Real-Time Safety
//!
//! The consumer is usually an audio device callback:
//! - No memory allocation after construction
//! - One lock, held only for a bounded copy
//! - No blocking on the consumer side
//!
//! Only the producer ever waits, in [`RingBuffer::write_blocking`].

pub mod atomic_stats;
pub mod ringbuf;

pub use atomic_stats::{AtomicF64, Counter, RateStats, StatsSnapshot};
pub use ringbuf::{RingBuffer, RingBufferError};
