// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Datagram link abstraction.
//!
//! The controller rides on "links": unreliable datagram carriers that
//! preserve frame boundaries and may drop, delay or corrupt traffic.
//!
//! # Implementations
//!
//! - [`UdpLink`] - a bound and connected UDP socket pair
//! - [`SimLink`] - an in-memory duplex pair with seeded loss injection,
//!   used by the test suites

use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Largest datagram a link is expected to carry.
pub const MAX_DATAGRAM: usize = 8192;

/// Link traffic counters.
#[derive(Debug, Default, Clone)]
pub struct LinkStats {
    /// Frames sent.
    pub frames_sent: u64,
    /// Bytes sent.
    pub bytes_sent: u64,
    /// Frames received.
    pub frames_received: u64,
    /// Bytes received.
    pub bytes_received: u64,
    /// Frames dropped before delivery.
    pub frames_dropped: u64,
    /// Send errors.
    pub send_errors: u64,
}

/// Frame-preserving datagram carrier.
pub trait Link: Send + Sync {
    /// Send one frame, best effort.
    fn send(&self, frame: &[u8]) -> io::Result<()>;

    /// Receive one frame into `buf`, waiting up to `timeout`.
    ///
    /// Returns `WouldBlock` or `TimedOut` when nothing arrived in time.
    fn recv_timeout(&self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;

    /// Traffic counters; links that do not track them return zeroes.
    fn stats(&self) -> LinkStats {
        LinkStats::default()
    }
}

// ============================================================================
// UdpLink
// ============================================================================

/// UDP link to a fixed peer.
pub struct UdpLink {
    socket: UdpSocket,
    peer: SocketAddr,
    frames_sent: AtomicU64,
    bytes_sent: AtomicU64,
    frames_received: AtomicU64,
    bytes_received: AtomicU64,
    send_errors: AtomicU64,
}

impl UdpLink {
    /// Bind `local` and direct traffic at `peer`.
    pub fn new(local: SocketAddr, peer: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(local)?;
        Ok(Self::from_socket(socket, peer))
    }

    /// Wrap an existing socket.
    pub fn from_socket(socket: UdpSocket, peer: SocketAddr) -> Self {
        Self {
            socket,
            peer,
            frames_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            send_errors: AtomicU64::new(0),
        }
    }

    /// Local socket address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Peer address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl Link for UdpLink {
    fn send(&self, frame: &[u8]) -> io::Result<()> {
        match self.socket.send_to(frame, self.peer) {
            Ok(n) => {
                self.frames_sent.fetch_add(1, Ordering::Relaxed);
                self.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
                Ok(())
            }
            Err(err) => {
                self.send_errors.fetch_add(1, Ordering::Relaxed);
                Err(err)
            }
        }
    }

    fn recv_timeout(&self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        self.socket.set_read_timeout(Some(timeout))?;
        let n = self.socket.recv(buf)?;
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }

    fn stats(&self) -> LinkStats {
        LinkStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            frames_dropped: 0,
            send_errors: self.send_errors.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// SimLink
// ============================================================================

/// One direction of an in-memory link pair.
struct Pipe {
    frames: Mutex<VecDeque<Vec<u8>>>,
    ready: Condvar,
}

impl Pipe {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            frames: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
        })
    }

    fn push(&self, frame: Vec<u8>) {
        self.frames.lock().push_back(frame);
        self.ready.notify_all();
    }

    fn pop_timeout(&self, timeout: Duration) -> Option<Vec<u8>> {
        let mut frames = self.frames.lock();
        if let Some(frame) = frames.pop_front() {
            return Some(frame);
        }
        self.ready.wait_for(&mut frames, timeout);
        frames.pop_front()
    }
}

/// In-memory link endpoint with configurable impairments.
///
/// [`SimLink::pair`] yields two connected endpoints. Random loss uses a
/// seeded xorshift generator so runs are reproducible;
/// [`SimLink::drop_next_matching`] arms a deterministic drop of the next
/// frames at or above a size threshold, which distinguishes data segments
/// from bare control traffic.
pub struct SimLink {
    tx: Arc<Pipe>,
    rx: Arc<Pipe>,
    loss_permille: AtomicU32,
    rng_state: AtomicU64,
    drop_budget: AtomicU32,
    drop_min_len: AtomicU32,
    frames_sent: AtomicU64,
    bytes_sent: AtomicU64,
    frames_received: AtomicU64,
    bytes_received: AtomicU64,
    frames_dropped: AtomicU64,
}

impl SimLink {
    /// Create a connected pair of perfect links.
    pub fn pair() -> (Arc<Self>, Arc<Self>) {
        let a_to_b = Pipe::new();
        let b_to_a = Pipe::new();
        let a = Arc::new(Self::new(Arc::clone(&a_to_b), Arc::clone(&b_to_a), 1));
        let b = Arc::new(Self::new(b_to_a, a_to_b, 2));
        (a, b)
    }

    fn new(tx: Arc<Pipe>, rx: Arc<Pipe>, seed: u64) -> Self {
        Self {
            tx,
            rx,
            loss_permille: AtomicU32::new(0),
            rng_state: AtomicU64::new(0x9E37_79B9_7F4A_7C15 ^ seed),
            drop_budget: AtomicU32::new(0),
            drop_min_len: AtomicU32::new(0),
            frames_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        }
    }

    /// Random loss rate for this endpoint's sends, in permille.
    pub fn set_loss_permille(&self, permille: u32) {
        self.loss_permille.store(permille.min(1000), Ordering::Relaxed);
    }

    /// Reseed the loss generator.
    pub fn set_seed(&self, seed: u64) {
        self.rng_state.store(seed | 1, Ordering::Relaxed);
    }

    /// Drop the next `count` outbound frames of at least `min_len` bytes.
    pub fn drop_next_matching(&self, count: u32, min_len: usize) {
        self.drop_min_len.store(min_len as u32, Ordering::Relaxed);
        self.drop_budget.store(count, Ordering::Relaxed);
    }

    fn rand_permille(&self) -> u32 {
        let mut state = self.rng_state.load(Ordering::Relaxed);
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        self.rng_state.store(state, Ordering::Relaxed);
        (state % 1000) as u32
    }

    fn should_drop(&self, frame: &[u8]) -> bool {
        if frame.len() >= self.drop_min_len.load(Ordering::Relaxed) as usize {
            let mut budget = self.drop_budget.load(Ordering::Relaxed);
            while budget > 0 {
                match self.drop_budget.compare_exchange(
                    budget,
                    budget - 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => return true,
                    Err(actual) => budget = actual,
                }
            }
        }
        let loss = self.loss_permille.load(Ordering::Relaxed);
        loss > 0 && self.rand_permille() < loss
    }
}

impl Link for SimLink {
    fn send(&self, frame: &[u8]) -> io::Result<()> {
        if self.should_drop(frame) {
            self.frames_dropped.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(frame.len() as u64, Ordering::Relaxed);
        self.tx.push(frame.to_vec());
        Ok(())
    }

    fn recv_timeout(&self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        match self.rx.pop_timeout(timeout) {
            Some(frame) => {
                let n = frame.len().min(buf.len());
                buf[..n].copy_from_slice(&frame[..n]);
                self.frames_received.fetch_add(1, Ordering::Relaxed);
                self.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
                Ok(n)
            }
            None => Err(io::Error::new(io::ErrorKind::TimedOut, "no frame")),
        }
    }

    fn stats(&self) -> LinkStats {
        LinkStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            send_errors: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_sim_pair_delivers_both_ways() {
        let (a, b) = SimLink::pair();
        a.send(b"ping").expect("send");
        b.send(b"pong").expect("send");

        let mut buf = [0u8; 16];
        let n = b.recv_timeout(&mut buf, Duration::from_millis(100)).expect("recv");
        assert_eq!(&buf[..n], b"ping");
        let n = a.recv_timeout(&mut buf, Duration::from_millis(100)).expect("recv");
        assert_eq!(&buf[..n], b"pong");
    }

    #[test]
    fn test_sim_recv_timeout() {
        let (a, _b) = SimLink::pair();
        let mut buf = [0u8; 16];
        let err = a
            .recv_timeout(&mut buf, Duration::from_millis(10))
            .expect_err("nothing queued");
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_sim_recv_wakes_on_send() {
        let (a, b) = SimLink::pair();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            b.send(b"late").expect("send");
        });

        let mut buf = [0u8; 16];
        let n = a
            .recv_timeout(&mut buf, Duration::from_millis(500))
            .expect("woken by send");
        assert_eq!(&buf[..n], b"late");
        handle.join().expect("sender thread");
    }

    #[test]
    fn test_sim_total_loss() {
        let (a, b) = SimLink::pair();
        a.set_loss_permille(1000);
        a.send(b"gone").expect("send");
        assert_eq!(a.stats().frames_dropped, 1);

        let mut buf = [0u8; 16];
        assert!(b.recv_timeout(&mut buf, Duration::from_millis(10)).is_err());
    }

    #[test]
    fn test_sim_drop_next_matching() {
        let (a, b) = SimLink::pair();
        a.drop_next_matching(1, 10);

        // Short control frame passes, long data frame is eaten once.
        a.send(b"ctrl").expect("send");
        a.send(b"data-data-data").expect("send");
        a.send(b"data-data-data").expect("send");

        let mut buf = [0u8; 32];
        let n = b.recv_timeout(&mut buf, Duration::from_millis(100)).expect("recv");
        assert_eq!(&buf[..n], b"ctrl");
        let n = b.recv_timeout(&mut buf, Duration::from_millis(100)).expect("recv");
        assert_eq!(&buf[..n], b"data-data-data");
        assert!(b.recv_timeout(&mut buf, Duration::from_millis(10)).is_err());
        assert_eq!(a.stats().frames_dropped, 1);
    }

    #[test]
    fn test_udp_link_roundtrip() {
        let sock_a = UdpSocket::bind("127.0.0.1:0").expect("bind a");
        let sock_b = UdpSocket::bind("127.0.0.1:0").expect("bind b");
        let addr_a = sock_a.local_addr().expect("addr a");
        let addr_b = sock_b.local_addr().expect("addr b");

        let a = UdpLink::from_socket(sock_a, addr_b);
        let b = UdpLink::from_socket(sock_b, addr_a);

        a.send(b"hello").expect("send");
        let mut buf = [0u8; 16];
        let n = b.recv_timeout(&mut buf, Duration::from_millis(500)).expect("recv");
        assert_eq!(&buf[..n], b"hello");
        assert_eq!(a.stats().frames_sent, 1);
        assert_eq!(b.stats().frames_received, 1);
    }
}
