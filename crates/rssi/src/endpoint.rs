// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport and application endpoints.
//!
//! Both endpoints are thin frame forwarders with no protocol logic of their
//! own. The [`Transport`] bridges a datagram [`Link`] to the controller's
//! receive path and serves its frame allocations; the [`Application`] hands
//! user payload in and pulls delivered frames out. [`Client`] wires a
//! complete stack together:
//!
//! ```text
//! user -> Application::send_frame -> Controller -> Transport -> Link
//! Link -> rx pump -> Controller    -> Application::recv       -> user
//! ```

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::ControllerConfig;
use crate::controller::{Controller, ControllerError, SegmentIo};
use crate::link::{Link, UdpLink, MAX_DATAGRAM};
use crate::stream::{from_frame, to_frame, Frame, HeapPool, Pool};

/// Interval at which the receive pump re-checks its shutdown flag.
const RX_POLL: Duration = Duration::from_millis(100);

// ============================================================================
// Transport endpoint
// ============================================================================

/// Link-side endpoint: allocates frames from a pool and moves complete
/// segments between the controller and the datagram link.
pub struct Transport {
    link: Arc<dyn Link>,
    pool: Arc<HeapPool>,
}

impl Transport {
    /// Create a transport over `link` with a fresh heap pool.
    pub fn new(link: Arc<dyn Link>) -> Arc<Self> {
        Self::with_pool(link, HeapPool::new())
    }

    /// Create a transport over `link` drawing buffers from `pool`.
    pub fn with_pool(link: Arc<dyn Link>, pool: Arc<HeapPool>) -> Arc<Self> {
        Arc::new(Self { link, pool })
    }

    /// The buffer pool backing this transport.
    pub fn pool(&self) -> &Arc<HeapPool> {
        &self.pool
    }

    /// Spawn the receive pump: frames arriving on the link are wrapped in
    /// buffers and fed to [`Controller::transport_rx`] until the pump stops.
    pub fn start_rx(self: &Arc<Self>, controller: Arc<Controller>) -> io::Result<RxPump> {
        let transport = Arc::clone(self);
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        let handle = thread::Builder::new()
            .name("rssi-rx".into())
            .spawn(move || {
                let mut buf = vec![0u8; MAX_DATAGRAM];
                while flag.load(Ordering::Acquire) {
                    match transport.link.recv_timeout(&mut buf, RX_POLL) {
                        Ok(0) => {}
                        Ok(n) => {
                            let mut buffer = transport.pool.clone().req_buffer(n);
                            buffer.window_mut()[..n].copy_from_slice(&buf[..n]);
                            if buffer.set_payload(n, true).is_ok() {
                                controller.transport_rx(Frame::with_buffer(buffer));
                            }
                        }
                        Err(err)
                            if err.kind() == io::ErrorKind::TimedOut
                                || err.kind() == io::ErrorKind::WouldBlock => {}
                        Err(err) => {
                            log::warn!("[RSSI] link receive failed: {}", err);
                            thread::sleep(Duration::from_millis(10));
                        }
                    }
                }
            })?;

        Ok(RxPump {
            running,
            handle: Some(handle),
        })
    }
}

impl SegmentIo for Transport {
    fn req_frame(&self, size: u32, _zero_copy: bool, max_buf_size: u32) -> Frame {
        let max_buf = max_buf_size.max(1) as usize;
        let mut remaining = size.max(1) as usize;
        let mut frame = Frame::new();
        while remaining > 0 {
            let chunk = remaining.min(max_buf);
            frame.append_buffer(self.pool.clone().req_buffer(chunk));
            remaining -= chunk;
        }
        frame
    }

    fn send_frame(&self, frame: &Frame) -> io::Result<()> {
        let mut bytes = vec![0u8; frame.payload()];
        let mut cur = frame.begin_read();
        from_frame(frame, &mut cur, &mut bytes)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))?;
        self.link.send(&bytes)
    }
}

/// Handle for the transport receive thread. Stops and joins on drop.
pub struct RxPump {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl RxPump {
    /// Stop the pump and wait for the thread to exit. Idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RxPump {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Application endpoint
// ============================================================================

/// User-side endpoint: forwards outbound frames into the controller and
/// delivers reassembled frames out of it.
pub struct Application {
    controller: Arc<Controller>,
}

impl Application {
    pub fn new(controller: Arc<Controller>) -> Self {
        Self { controller }
    }

    /// Allocate an outbound frame with header room reserved.
    pub fn req_frame(&self, size: u32) -> Result<Frame, ControllerError> {
        self.controller.req_frame(size)
    }

    /// Send one frame of user payload.
    pub fn send_frame(&self, frame: Frame) -> Result<(), ControllerError> {
        self.controller.application_rx(frame)
    }

    /// Receive the next delivered frame, blocking until the controller
    /// stops.
    pub fn recv(&self) -> Option<Frame> {
        self.controller.application_tx()
    }

    /// Receive the next delivered frame, waiting at most `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Frame> {
        self.controller.application_tx_timeout(timeout)
    }
}

// ============================================================================
// Client bundle
// ============================================================================

/// A complete endpoint stack: pool, link, transport, controller and
/// application wired together.
pub struct Client {
    controller: Arc<Controller>,
    application: Application,
    pump: RxPump,
}

impl Client {
    /// Build a stack over an arbitrary link.
    pub fn over_link(link: Arc<dyn Link>, cfg: ControllerConfig) -> io::Result<Self> {
        let transport = Transport::new(link);
        let io_handle: Arc<dyn SegmentIo> = Arc::clone(&transport) as Arc<dyn SegmentIo>;
        let controller = Controller::start(cfg, io_handle)?;
        let pump = transport.start_rx(Arc::clone(&controller))?;
        let application = Application::new(Arc::clone(&controller));
        Ok(Self {
            controller,
            application,
            pump,
        })
    }

    /// Build a stack over a UDP socket pair.
    pub fn connect(local: SocketAddr, peer: SocketAddr, cfg: ControllerConfig) -> io::Result<Self> {
        Self::over_link(Arc::new(UdpLink::new(local, peer)?), cfg)
    }

    /// Wait until the connection opens, up to `timeout`.
    pub fn wait_open(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.controller.is_open() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(2));
        }
        true
    }

    /// Send `payload` as one segment.
    pub fn send(&self, payload: &[u8]) -> io::Result<()> {
        let mut frame = self
            .controller
            .req_frame(payload.len() as u32)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err.to_string()))?;
        let mut cur = frame.begin_write();
        to_frame(&mut frame, &mut cur, payload)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err.to_string()))?;
        frame
            .set_payload(payload.len())
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err.to_string()))?;
        self.controller
            .application_rx(frame)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err.to_string()))
    }

    /// Receive the next delivered payload, waiting at most `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Vec<u8>> {
        let frame = self.application.recv_timeout(timeout)?;
        let mut bytes = vec![0u8; frame.payload()];
        let mut cur = frame.begin_read();
        if from_frame(&frame, &mut cur, &mut bytes).is_err() {
            return None;
        }
        Some(bytes)
    }

    /// The controller behind this stack.
    pub fn controller(&self) -> &Arc<Controller> {
        &self.controller
    }

    /// Frame-level application endpoint.
    pub fn application(&self) -> &Application {
        &self.application
    }

    /// Tear the stack down: stop the receive pump, then the controller.
    pub fn stop(&mut self) {
        self.pump.stop();
        self.controller.stop();
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.stop();
    }
}
