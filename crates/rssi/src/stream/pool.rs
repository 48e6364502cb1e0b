// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Buffer allocation pools.
//!
//! A [`Pool`] mints [`Buffer`]s and takes their backing storage back when the
//! buffer is dropped. Returning through the pool is the only reclamation
//! path, which lets specialized pools (for example DMA-backed ones) identify
//! the descriptor behind an allocation via the opaque `meta` tag.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::Buffer;

/// Maximum number of returned allocations kept for reuse.
const FREE_LIST_DEPTH: usize = 64;

/// Allocator interface for [`Buffer`] backing storage.
///
/// `meta` is a pool-private tag carried by the buffer for its whole life and
/// handed back on return. Heap pools ignore it; hardware pools use it to find
/// the backing descriptor.
pub trait Pool: Send + Sync {
    /// Mint a buffer with a usable capacity of at least `size` bytes.
    fn req_buffer(self: Arc<Self>, size: usize) -> Buffer;

    /// Take back the storage of a dropped buffer.
    fn ret_buffer(&self, data: Box<[u8]>, meta: u32);
}

/// Pool allocation counters.
#[derive(Debug, Default, Clone)]
pub struct PoolStats {
    /// Buffers handed out in total.
    pub issued: u64,
    /// Buffers satisfied from the free list.
    pub reused: u64,
    /// Buffers returned so far.
    pub returned: u64,
}

/// Heap-backed pool with a bounded free list.
///
/// Returned allocations are kept and re-issued when a later request fits
/// inside one of them, so a steady-state transmit path allocates once.
pub struct HeapPool {
    free: Mutex<Vec<Box<[u8]>>>,
    issued: AtomicU64,
    reused: AtomicU64,
    returned: AtomicU64,
}

impl HeapPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new(Vec::new()),
            issued: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            returned: AtomicU64::new(0),
        })
    }

    /// Snapshot of the allocation counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            issued: self.issued.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            returned: self.returned.load(Ordering::Relaxed),
        }
    }

    /// Buffers currently issued and not yet returned.
    pub fn outstanding(&self) -> u64 {
        self.issued
            .load(Ordering::Relaxed)
            .saturating_sub(self.returned.load(Ordering::Relaxed))
    }

    fn take(&self, size: usize) -> Box<[u8]> {
        let mut free = self.free.lock();
        if let Some(idx) = free.iter().position(|b| b.len() >= size) {
            self.reused.fetch_add(1, Ordering::Relaxed);
            return free.swap_remove(idx);
        }
        drop(free);
        vec![0u8; size].into_boxed_slice()
    }
}

impl Pool for HeapPool {
    fn req_buffer(self: Arc<Self>, size: usize) -> Buffer {
        let data = self.take(size);
        self.issued.fetch_add(1, Ordering::Relaxed);
        let pool: Arc<dyn Pool> = self;
        Buffer::from_pool(&pool, data, 0)
    }

    fn ret_buffer(&self, data: Box<[u8]>, _meta: u32) {
        self.returned.fetch_add(1, Ordering::Relaxed);
        let mut free = self.free.lock();
        if free.len() < FREE_LIST_DEPTH {
            free.push(data);
        }
    }
}
