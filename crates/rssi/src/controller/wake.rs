// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wake notification with an atomic fast path.
//!
//! Producers call [`WakeNotifier::notify`] on every event; the consumer
//! sleeps in [`WakeNotifier::wait_timeout`]. The pending flag is atomic so a
//! notification arriving just before the wait returns immediately without
//! touching the condvar, and the condvar is only signalled when a waiter is
//! actually sleeping.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
pub struct WakeNotifier {
    pending: AtomicBool,
    sleepers: Mutex<usize>,
    condvar: Condvar,
}

impl WakeNotifier {
    pub fn new() -> Self {
        Self {
            pending: AtomicBool::new(false),
            sleepers: Mutex::new(0),
            condvar: Condvar::new(),
        }
    }

    /// Record an event and wake any sleeping waiter.
    pub fn notify(&self) {
        self.pending.store(true, Ordering::Release);
        if *self.sleepers.lock() > 0 {
            self.condvar.notify_all();
        }
    }

    /// Wait until notified or `timeout` elapses. Returns true when a
    /// notification was consumed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.pending.swap(false, Ordering::Acquire) {
            return true;
        }

        let mut sleepers = self.sleepers.lock();
        if self.pending.swap(false, Ordering::Acquire) {
            return true;
        }

        *sleepers += 1;
        self.condvar.wait_for(&mut sleepers, timeout);
        *sleepers -= 1;

        self.pending.swap(false, Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_pending_notification_returns_immediately() {
        let wake = WakeNotifier::new();
        wake.notify();

        let start = Instant::now();
        assert!(wake.wait_timeout(Duration::from_millis(100)));
        assert!(start.elapsed() < Duration::from_millis(20));
    }

    #[test]
    fn test_timeout_without_notification() {
        let wake = WakeNotifier::new();
        let start = Instant::now();
        assert!(!wake.wait_timeout(Duration::from_millis(10)));
        assert!(start.elapsed() >= Duration::from_millis(9));
    }

    #[test]
    fn test_notify_wakes_sleeper() {
        let wake = Arc::new(WakeNotifier::new());
        let remote = Arc::clone(&wake);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            remote.notify();
        });

        assert!(wake.wait_timeout(Duration::from_millis(500)));
        handle.join().expect("notifier thread");
    }
}
