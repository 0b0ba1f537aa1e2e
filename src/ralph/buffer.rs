//! Bounded retry buffer for failed upserts.
//!
//! A single shared FIFO queue. When the buffer is full the oldest entry is
//! dropped and counted as unrecoverable; nothing is lost silently.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::schema::Signal;

/// Default buffer capacity.
pub const DEFAULT_RETRY_CAPACITY: usize = 1000;

/// Bounded FIFO of signals awaiting a later upsert attempt.
pub struct RetryBuffer {
    queue: Mutex<VecDeque<Signal>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl RetryBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue a signal, evicting the oldest entry when full.
    pub fn push(&self, signal: Signal) {
        let mut queue = self.queue.lock().expect("retry buffer lock");
        if queue.len() >= self.capacity {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(signal);
    }

    /// Take everything currently buffered, oldest first.
    pub fn drain(&self) -> Vec<Signal> {
        self.queue
            .lock()
            .expect("retry buffer lock")
            .drain(..)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().expect("retry buffer lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries evicted because the buffer was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for RetryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_CAPACITY)
    }
}
