// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounded multi-producer segment queue.
//!
//! Producers (the transport and application receive paths) push without
//! blocking; the consumer pops with a bounded wait. Overflow is reported to
//! the caller, which drops the segment and counts it.

use std::time::Duration;

use crossbeam::queue::ArrayQueue;

use super::wake::WakeNotifier;

pub struct SegmentQueue<T> {
    items: ArrayQueue<T>,
    wake: WakeNotifier,
}

impl<T> SegmentQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: ArrayQueue::new(capacity),
            wake: WakeNotifier::new(),
        }
    }

    /// Push an item, waking a blocked consumer. Returns the item back when
    /// the queue is full.
    pub fn push(&self, item: T) -> Result<(), T> {
        self.items.push(item)?;
        self.wake.notify();
        Ok(())
    }

    /// Pop without blocking.
    pub fn try_pop(&self) -> Option<T> {
        self.items.pop()
    }

    /// Pop, waiting up to `timeout` for an item to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        if let Some(item) = self.items.pop() {
            return Some(item);
        }
        self.wake.wait_timeout(timeout);
        self.items.pop()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drop all queued items.
    pub fn clear(&self) {
        while self.items.pop().is_some() {}
    }
}
