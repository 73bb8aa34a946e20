// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 daqflow developers

//! Lock-free component metrics.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Per-component counters, updated by worker threads and read by status
/// snapshots without locking.
#[derive(Debug, Default)]
pub struct Metrics {
    pub events_processed: AtomicU64,
    pub bytes_transferred: AtomicU64,
    pub heartbeat_counter: AtomicU64,
    /// Current depth of the component's main queue.
    pub queue_size: AtomicU32,
    pub queue_max: AtomicU32,
    /// Sequence gaps observed on the inputs.
    pub gap_count: AtomicU64,
    /// Frames rejected by the codec.
    pub bad_frames: AtomicU64,
    /// Time-sort merger: records older than the flushed window.
    pub late_dropped: AtomicU64,
}

impl Metrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_events(&self, n: u64) {
        self.events_processed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_bytes(&self, n: u64) {
        self.bytes_transferred.fetch_add(n, Ordering::Relaxed);
    }

    pub fn tick_heartbeat(&self) {
        self.heartbeat_counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_queue_gauge(&self, size: u32, max: u32) {
        self.queue_size.store(size, Ordering::Relaxed);
        self.queue_max.store(max, Ordering::Relaxed);
    }

    pub fn add_gap(&self) {
        self.gap_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bad_frame(&self) {
        self.bad_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_late_dropped(&self, n: u64) {
        self.late_dropped.fetch_add(n, Ordering::Relaxed);
    }

    #[must_use]
    pub fn events(&self) -> u64 {
        self.events_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes_transferred.load(Ordering::Relaxed)
    }

    /// Zero everything; called on run start.
    pub fn reset(&self) {
        self.events_processed.store(0, Ordering::Relaxed);
        self.bytes_transferred.store(0, Ordering::Relaxed);
        self.queue_size.store(0, Ordering::Relaxed);
        self.gap_count.store(0, Ordering::Relaxed);
        self.bad_frames.store(0, Ordering::Relaxed);
        self.late_dropped.store(0, Ordering::Relaxed);
    }
}
