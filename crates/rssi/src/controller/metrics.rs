// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Controller observability counters.
//!
//! Lock-free atomic counters updated from the receive, transmit and worker
//! paths. Snapshots are advisory: individual loads are not taken under a
//! common lock.

use std::sync::atomic::{AtomicU64, Ordering};

/// Cumulative counters for one controller.
#[derive(Debug, Default)]
pub struct ControllerMetrics {
    /// Segments discarded for failed verification or an empty frame.
    dropped: AtomicU64,
    /// Segments sent more than once.
    retransmissions: AtomicU64,
    /// Times the connection was torn down and reset.
    resets: AtomicU64,
    /// Segments handed to the transport.
    segments_tx: AtomicU64,
    /// Segments received from the transport.
    segments_rx: AtomicU64,
}

impl ControllerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn inc_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_retransmissions(&self) {
        self.retransmissions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_resets(&self) {
        self.resets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_segments_tx(&self) {
        self.segments_tx.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_segments_rx(&self) {
        self.segments_rx.fetch_add(1, Ordering::Relaxed);
    }

    /// Segments discarded for failed verification or an empty frame.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Segments sent more than once.
    pub fn retransmissions(&self) -> u64 {
        self.retransmissions.load(Ordering::Relaxed)
    }

    /// Times the connection was torn down and reset.
    pub fn resets(&self) -> u64 {
        self.resets.load(Ordering::Relaxed)
    }

    /// Segments handed to the transport.
    pub fn segments_tx(&self) -> u64 {
        self.segments_tx.load(Ordering::Relaxed)
    }

    /// Segments received from the transport.
    pub fn segments_rx(&self) -> u64 {
        self.segments_rx.load(Ordering::Relaxed)
    }
}
