// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 daqflow developers

//! Component runtime building blocks.
//!
//! - [`BoundedQueue`]: the FIFO between receive/process/send threads.
//! - [`Metrics`]: lock-free counters behind status snapshots.
//! - [`EosTracker`]: fan-in accounting of End-Of-Stream sentinels.
//! - [`collab`]: the hardware / persistence / histogram collaborator
//!   traits and their shipped implementations.

pub mod collab;
pub mod metrics;
pub mod queue;

pub use collab::{
    EnergyHistogram, FilePersister, HardwareError, HardwareSource, HistogramSink,
    MockHardwareSource, RawFilePersister,
};
pub use metrics::Metrics;
pub use queue::{BoundedQueue, PushError};

use std::sync::atomic::{AtomicUsize, Ordering};

/// Counts EOS sentinels across a merger's inputs.
///
/// The merger forwards exactly one EOS downstream, once every input has
/// reported one.
#[derive(Debug)]
pub struct EosTracker {
    expected: usize,
    seen: AtomicUsize,
}

impl EosTracker {
    #[must_use]
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            seen: AtomicUsize::new(0),
        }
    }

    /// Record one EOS; returns `true` when this was the last missing one.
    pub fn record(&self) -> bool {
        let seen = self.seen.fetch_add(1, Ordering::SeqCst) + 1;
        seen == self.expected
    }

    #[must_use]
    pub fn all_seen(&self) -> bool {
        self.seen.load(Ordering::SeqCst) >= self.expected
    }

    #[must_use]
    pub fn seen(&self) -> usize {
        self.seen.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.seen.store(0, Ordering::SeqCst);
    }
}
