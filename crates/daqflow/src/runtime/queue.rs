// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 daqflow developers

//! Bounded FIFO connecting component worker threads.
//!
//! Producers block (with timeout) when the queue is full, which is the
//! back-pressure mechanism inside a component. `close` wakes every waiter
//! so a stop request is observed promptly.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Duration;

/// Why a push did not happen.
#[derive(Debug, PartialEq, Eq)]
pub enum PushError<T> {
    /// Queue stayed full for the whole timeout; the item is handed back.
    Full(T),
    /// Queue was closed; the item is handed back.
    Closed(T),
}

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Mutex-and-condvar bounded FIFO.
pub struct BoundedQueue<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Push, waiting up to `timeout` for space.
    pub fn push(&self, item: T, timeout: Duration) -> Result<(), PushError<T>> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(PushError::Closed(item));
        }
        while inner.items.len() >= self.capacity {
            if self.not_full.wait_for(&mut inner, timeout).timed_out() {
                return Err(PushError::Full(item));
            }
            if inner.closed {
                return Err(PushError::Closed(item));
            }
        }
        inner.items.push_back(item);
        drop(inner);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Push without waiting.
    pub fn try_push(&self, item: T) -> Result<(), PushError<T>> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(PushError::Closed(item));
        }
        if inner.items.len() >= self.capacity {
            return Err(PushError::Full(item));
        }
        inner.items.push_back(item);
        drop(inner);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Pop, waiting up to `timeout` for an item.
    ///
    /// Returns `None` on timeout, or immediately when the queue is closed
    /// and drained.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                drop(inner);
                self.not_full.notify_one();
                return Some(item);
            }
            if inner.closed {
                return None;
            }
            if self.not_empty.wait_for(&mut inner, timeout).timed_out() {
                return None;
            }
        }
    }

    /// Discard all queued items.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.items.clear();
        drop(inner);
        self.not_full.notify_all();
    }

    /// Close the queue and wake every waiter. Queued items stay poppable.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        drop(inner);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Reopen after a `close`; used when a component restarts a run.
    pub fn reopen(&self) {
        let mut inner = self.inner.lock();
        inner.closed = false;
        inner.items.clear();
    }
}
