// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RSSI connection controller.
//!
//! The controller owns the protocol state machine, the retransmission table,
//! the timers and both directional queues. It mediates between an
//! application endpoint (user payload) and a transport endpoint (unreliable
//! link). A dedicated worker thread drives timers, retransmission and state
//! transitions; receive and transmit paths run on their callers' threads and
//! only nudge the worker through a wake notifier.
//!
//! # State Machine
//!
//! ```text
//!                +--------+   try period    +---------+
//!        +------>| Closed |---------------->| WaitSyn |----+
//!        |       +--------+    send SYN     +----+----+    | try period
//!        |            ^                          |         | (resend SYN)
//!        |            | RX RST                   |<--------+
//!        |            |                          | RX SYN+ACK
//!        |            |                          v (adopt peer params)
//!        |       +----+----+              +------------+
//!        |       |  Error  |              | SendSeqAck |
//!        |       +----+----+              +-----+------+
//!        |            ^                         | send bare ACK
//!        |  RX SYN/RST|                         v
//!        |  or retransmit exhaustion      +----------+
//!        +--- send RST, clear state ------|   Open   |
//!                                         +----------+
//! ```
//!
//! # Locking
//!
//! The retransmission table, outstanding count, local sequence and transmit
//! timestamps live under one mutex held only for short critical sections.
//! The single-writer counters (`last_ack_rx`, `last_seq_rx`, `next_seq_rx`)
//! are atomics read without locks elsewhere. A condvar on the transmit
//! mutex releases senders blocked on the outstanding window whenever acks
//! reclaim slots or the connection leaves Open.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::{Condvar, Mutex};

use crate::config::ControllerConfig;
use crate::protocol::{seq, SegmentHeader, SynParams, HEADER_SIZE, SYN_SIZE};
use crate::stream::Frame;

mod metrics;
mod queue;
mod wake;

pub use metrics::ControllerMetrics;
use queue::SegmentQueue;
use wake::WakeNotifier;

/// Slots in the retransmission table, one per sequence number.
const TX_SLOTS: usize = 256;

/// Depth of the state and application queues.
const QUEUE_DEPTH: usize = 256;

/// First sequence number assigned after start or reset.
const INITIAL_SEQUENCE: u8 = 100;

/// Segment size assumed until the peer advertises one.
const INITIAL_MAX_SEGMENT: u32 = 100;

/// What the controller needs from the transport side: frame allocation and
/// synchronous best-effort transmission.
pub trait SegmentIo: Send + Sync {
    /// Allocate a frame able to carry `size` bytes, no buffer larger than
    /// `max_buf_size`. Expected to yield single-buffer frames.
    fn req_frame(&self, size: u32, zero_copy: bool, max_buf_size: u32) -> Frame;

    /// Hand a complete segment to the link.
    fn send_frame(&self, frame: &Frame) -> io::Result<()>;
}

/// Contract errors surfaced to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerError {
    /// The outbound frame holds no buffers.
    EmptyFrame,
    /// The first buffer lacks reserved room for the segment header.
    HeaderSpace {
        /// Bytes the header needs.
        needed: usize,
        /// Bytes actually reserved or available.
        available: usize,
    },
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyFrame => write!(f, "frame must not be empty"),
            Self::HeaderSpace { needed, available } => write!(
                f,
                "insufficient header space: need {} bytes, have {}",
                needed, available
            ),
        }
    }
}

impl std::error::Error for ControllerError {}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    /// No connection. A SYN goes out every try period.
    Closed = 0,
    /// SYN sent, waiting for the peer's SYN+ACK.
    WaitSyn = 1,
    /// Peer parameters adopted; a bare ACK completes the handshake.
    SendSeqAck = 2,
    /// Established. Data flows, timers run.
    Open = 3,
    /// Fatal condition observed; an RST goes out and state clears.
    Error = 4,
}

impl State {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Closed,
            1 => Self::WaitSyn,
            2 => Self::SendSeqAck,
            3 => Self::Open,
            _ => Self::Error,
        }
    }
}

/// Parameters adopted from the peer's SYN.
#[derive(Debug, Clone)]
struct Negotiated {
    max_outstanding: u8,
    max_segment: u32,
    retran_timeout: u16,
    cum_ack_timeout: u16,
    null_timeout: u16,
    max_retransmissions: u8,
    max_cum_ack: u8,
}

impl Negotiated {
    fn request(cfg: &ControllerConfig) -> Self {
        Self {
            max_outstanding: 0,
            max_segment: INITIAL_MAX_SEGMENT,
            retran_timeout: cfg.retran_timeout,
            cum_ack_timeout: cfg.cum_ack_timeout,
            null_timeout: cfg.null_timeout,
            max_retransmissions: cfg.max_retransmissions,
            max_cum_ack: cfg.max_cum_ack,
        }
    }
}

/// One in-flight segment awaiting acknowledgement.
struct TxSegment {
    header: SegmentHeader,
    frame: Frame,
    send_count: u32,
    sent_at: Instant,
}

/// Transmit-side bookkeeping, guarded by the tx mutex.
///
/// Slot `s` of the table is occupied exactly when
/// `prev_ack_rx < s <= loc_sequence - 1` in modular order, and `count`
/// equals the number of occupied slots.
struct TxState {
    list: Vec<Option<TxSegment>>,
    count: u32,
    loc_sequence: u8,
    prev_ack_rx: u8,
    last_ack_tx: u8,
    tx_time: Instant,
}

impl TxState {
    fn new() -> Self {
        Self {
            list: (0..TX_SLOTS).map(|_| None).collect(),
            count: 0,
            loc_sequence: INITIAL_SEQUENCE,
            prev_ack_rx: 0,
            last_ack_tx: 0,
            tx_time: Instant::now(),
        }
    }
}

/// Segment parked on the application queue.
struct RxSegment {
    header: SegmentHeader,
    frame: Frame,
}

struct Shared {
    cfg: ControllerConfig,
    io: Arc<dyn SegmentIo>,
    conn_id: u16,
    metrics: ControllerMetrics,
    running: AtomicBool,
    state: AtomicU8,
    last_ack_rx: AtomicU8,
    last_seq_rx: AtomicU8,
    next_seq_rx: AtomicU8,
    remote_busy: AtomicBool,
    negotiated: Mutex<Negotiated>,
    tx: Mutex<TxState>,
    window: Condvar,
    wake: WakeNotifier,
    st_queue: SegmentQueue<SegmentHeader>,
    app_queue: SegmentQueue<RxSegment>,
}

/// The RSSI connection controller.
///
/// Created with [`Controller::start`], which spawns the worker thread.
/// Dropping the controller (or calling [`Controller::stop`]) interrupts the
/// worker; it sends a final RST and exits, releasing any caller blocked in
/// [`Controller::application_rx`] or [`Controller::application_tx`].
pub struct Controller {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Controller {
    /// Start a controller over the given transport.
    pub fn start(cfg: ControllerConfig, io: Arc<dyn SegmentIo>) -> io::Result<Arc<Self>> {
        let shared = Arc::new(Shared {
            conn_id: generate_conn_id(),
            metrics: ControllerMetrics::new(),
            running: AtomicBool::new(true),
            state: AtomicU8::new(State::Closed as u8),
            last_ack_rx: AtomicU8::new(0),
            last_seq_rx: AtomicU8::new(0),
            next_seq_rx: AtomicU8::new(0),
            remote_busy: AtomicBool::new(false),
            negotiated: Mutex::new(Negotiated::request(&cfg)),
            tx: Mutex::new(TxState::new()),
            window: Condvar::new(),
            wake: WakeNotifier::new(),
            st_queue: SegmentQueue::new(QUEUE_DEPTH),
            app_queue: SegmentQueue::new(QUEUE_DEPTH),
            cfg,
            io,
        });

        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("rssi-ctrl".into())
            .spawn(move || Worker::new(worker_shared).run())?;

        Ok(Arc::new(Self {
            shared,
            worker: Mutex::new(Some(handle)),
        }))
    }

    /// Whether the connection is established.
    pub fn is_open(&self) -> bool {
        self.shared.state() == State::Open
    }

    /// Current connection state.
    pub fn state(&self) -> State {
        self.shared.state()
    }

    /// Observability counters.
    pub fn metrics(&self) -> &ControllerMetrics {
        &self.shared.metrics
    }

    /// Process-lifetime connection identifier advertised in SYN segments.
    pub fn local_conn_id(&self) -> u16 {
        self.shared.conn_id
    }

    /// Whether the application queue is above the busy threshold.
    pub fn busy(&self) -> bool {
        self.shared.app_queue.len() > self.shared.cfg.busy_threshold
    }

    /// Segments currently in flight and unacknowledged.
    pub fn outstanding_segments(&self) -> u32 {
        self.shared.tx.lock().count
    }

    /// Allocate a frame for outbound payload with the segment header room
    /// already reserved in the first buffer.
    ///
    /// The returned frame holds a single buffer sized to the smallest of
    /// `size + HEADER_SIZE`, the peer's advertised segment size and the
    /// local segment size; its available capacity excludes the header.
    pub fn req_frame(&self, size: u32) -> Result<Frame, ControllerError> {
        let sh = &self.shared;
        let mut n = size.saturating_add(HEADER_SIZE as u32);
        let max_segment = sh.negotiated.lock().max_segment;
        if max_segment > 0 && n > max_segment {
            n = max_segment;
        }
        if n > sh.cfg.segment_size {
            n = sh.cfg.segment_size;
        }

        let mut frame = sh.io.req_frame(n, false, n);
        if frame.count() == 0 {
            return Err(ControllerError::EmptyFrame);
        }
        let available = frame.buffer(0).available();
        if available < HEADER_SIZE {
            return Err(ControllerError::HeaderSpace {
                needed: HEADER_SIZE,
                available,
            });
        }
        frame
            .buffer_mut(0)
            .adjust_header(HEADER_SIZE as isize)
            .map_err(|_| ControllerError::HeaderSpace {
                needed: HEADER_SIZE,
                available,
            })?;

        // Segments are single-buffer; surplus buffers go back to their pool.
        if frame.count() > 1 {
            let mut buffers = frame.into_buffers();
            let first = buffers.remove(0);
            return Ok(Frame::with_buffer(first));
        }
        Ok(frame)
    }

    /// Segment received at the transport interface.
    ///
    /// Runs on the link thread. Verifies the header, updates the ack and
    /// busy tracking, and routes the segment to the state machine and
    /// application queues. Out-of-sequence data is dropped silently; the
    /// peer retransmits it.
    pub fn transport_rx(&self, frame: Frame) {
        let sh = &self.shared;
        sh.metrics.inc_segments_rx();

        if frame.count() == 0 {
            sh.metrics.inc_dropped();
            return;
        }
        let head = match SegmentHeader::decode(frame.buffer(0).payload_bytes()) {
            Ok(head) => head,
            Err(err) => {
                sh.metrics.inc_dropped();
                log::debug!("[RSSI] dropped segment: {}", err);
                return;
            }
        };

        if head.is_ack() {
            sh.last_ack_rx.store(head.acknowledge, Ordering::Release);
        }
        sh.remote_busy.store(head.is_busy(), Ordering::Release);

        let state = sh.state();

        // SYN and RST drive the state machine while open or mid-handshake.
        if (state == State::Open || state == State::WaitSyn) && (head.is_syn() || head.is_rst()) {
            if sh.st_queue.push(head).is_err() {
                log::debug!("[RSSI] state queue full, control segment ignored");
            }
        }

        // SYN always reaches the application queue to seed the receive
        // sequence; data and NUL only when in order.
        let in_order = head.sequence == sh.next_seq_rx.load(Ordering::Acquire);
        if head.is_syn()
            || (state == State::Open && (head.is_nul() || frame.payload() > HEADER_SIZE) && in_order)
        {
            if head.is_syn() {
                sh.next_seq_rx
                    .store(head.sequence.wrapping_add(1), Ordering::Release);
            } else {
                sh.next_seq_rx.fetch_add(1, Ordering::AcqRel);
            }
            if sh.app_queue.push(RxSegment { header: head, frame }).is_err() {
                sh.metrics.inc_dropped();
                log::warn!("[RSSI] application queue full, segment dropped");
            }
        }

        sh.wake.notify();
    }

    /// Frame received at the application interface: send user payload.
    ///
    /// The frame must come from [`Controller::req_frame`] so its first
    /// buffer carries the header reservation. Blocks while the outstanding
    /// window is full; a frame arriving while the connection is not open is
    /// discarded.
    pub fn application_rx(&self, mut frame: Frame) -> Result<(), ControllerError> {
        let sh = &self.shared;
        if frame.count() == 0 {
            return Err(ControllerError::EmptyFrame);
        }
        let head_room = frame.buffer(0).head_room();
        if head_room < HEADER_SIZE {
            return Err(ControllerError::HeaderSpace {
                needed: HEADER_SIZE,
                available: head_room,
            });
        }
        frame
            .buffer_mut(0)
            .adjust_header(-(HEADER_SIZE as isize))
            .map_err(|_| ControllerError::HeaderSpace {
                needed: HEADER_SIZE,
                available: head_room,
            })?;

        let mut head = SegmentHeader::new();
        head.tx_init(false, true);

        loop {
            let limit = u32::from(sh.negotiated.lock().max_outstanding);
            let mut guard = sh.tx.lock();
            if sh.state() != State::Open {
                log::debug!("[RSSI] connection not open, outbound frame discarded");
                return Ok(());
            }
            if guard.count < limit {
                sh.transport_tx(&mut guard, head, frame, true);
                drop(guard);
                sh.wake.notify();
                return Ok(());
            }
            sh.window.wait_for(&mut guard, Duration::from_millis(1));
        }
    }

    /// Pull the next reassembled frame for the application, blocking until
    /// one arrives or the controller stops.
    pub fn application_tx(&self) -> Option<Frame> {
        self.application_tx_deadline(None)
    }

    /// Pull the next frame, waiting at most `timeout`.
    pub fn application_tx_timeout(&self, timeout: Duration) -> Option<Frame> {
        self.application_tx_deadline(Instant::now().checked_add(timeout))
    }

    fn application_tx_deadline(&self, deadline: Option<Instant>) -> Option<Frame> {
        let sh = &self.shared;
        loop {
            if !sh.running.load(Ordering::Acquire) {
                return None;
            }
            if let Some(limit) = deadline {
                if Instant::now() >= limit {
                    return None;
                }
            }
            let Some(seg) = sh.app_queue.pop_timeout(Duration::from_millis(10)) else {
                continue;
            };

            sh.last_seq_rx.store(seg.header.sequence, Ordering::Release);
            sh.wake.notify();

            // SYN and NUL only advance the receive sequence tracking.
            if seg.header.is_nul() || seg.header.is_syn() {
                continue;
            }

            let mut frame = seg.frame;
            if let Err(err) = frame.buffer_mut(0).adjust_header(HEADER_SIZE as isize) {
                log::warn!("[RSSI] malformed data segment dropped: {}", err);
                continue;
            }
            return Some(frame);
        }
    }

    /// Stop the worker and release blocked callers. Idempotent.
    pub fn stop(&self) {
        if self.shared.running.swap(false, Ordering::AcqRel) {
            self.shared.wake.notify();
            self.shared.window.notify_all();
        }
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, next: State) {
        let prev = self.state.swap(next as u8, Ordering::AcqRel);
        if prev != next as u8 {
            log::debug!("[RSSI] state {:?} -> {:?}", State::from_u8(prev), next);
            self.window.notify_all();
            self.wake.notify();
        }
    }

    fn conv_time(&self, ticks: u32) -> Duration {
        Duration::from_micros(u64::from(ticks) * 10u64.pow(u32::from(self.cfg.timeout_unit)))
    }

    fn time_passed(&self, since: Instant, ticks: u32) -> bool {
        since.elapsed() > self.conv_time(ticks)
    }

    fn adopt(&self, p: &SynParams) {
        *self.negotiated.lock() = Negotiated {
            max_outstanding: p.max_outstanding_segments,
            max_segment: u32::from(p.max_segment_size),
            retran_timeout: p.retransmission_timeout,
            cum_ack_timeout: p.cumulative_ack_timeout,
            null_timeout: p.null_timeout,
            max_retransmissions: p.max_retransmissions,
            max_cum_ack: p.max_cumulative_ack,
        };
    }

    fn local_busy(&self) -> bool {
        self.app_queue.len() > self.cfg.busy_threshold
    }

    /// Stamp, encode and hand a segment to the transport. With `seq_update`
    /// the segment consumes a sequence number and parks in the
    /// retransmission table until acknowledged.
    ///
    /// Caller holds the tx mutex.
    fn transport_tx(&self, tx: &mut TxState, mut head: SegmentHeader, mut frame: Frame, seq_update: bool) {
        head.sequence = tx.loc_sequence;
        head.acknowledge = self.last_seq_rx.load(Ordering::Acquire);
        head.set_busy(self.local_busy());

        if let Err(err) = head.encode_into(&mut frame) {
            log::error!("[RSSI] segment encode failed: {}", err);
            return;
        }
        if let Err(err) = self.io.send_frame(&frame) {
            log::warn!("[RSSI] transport send failed: {}", err);
        }
        self.metrics.inc_segments_tx();
        tx.last_ack_tx = head.acknowledge;
        tx.tx_time = Instant::now();

        if seq_update {
            let slot = usize::from(tx.loc_sequence);
            tx.list[slot] = Some(TxSegment {
                header: head,
                frame,
                send_count: 1,
                sent_at: Instant::now(),
            });
            tx.count += 1;
            tx.loc_sequence = tx.loc_sequence.wrapping_add(1);
        }
    }
}

/// Worker thread state. `st_time` tracks the last state-relevant event for
/// the try-period timers; only the worker touches it.
struct Worker {
    shared: Arc<Shared>,
    st_time: Instant,
}

impl Worker {
    fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            st_time: Instant::now(),
        }
    }

    fn run(mut self) {
        log::debug!("[RSSI] controller worker started");
        let mut wait = Duration::ZERO;
        while self.shared.running.load(Ordering::Acquire) {
            if !wait.is_zero() {
                self.shared.wake.wait_timeout(wait);
            }
            if !self.shared.running.load(Ordering::Acquire) {
                break;
            }
            wait = match self.shared.state() {
                State::Closed | State::WaitSyn => self.state_closed_wait(),
                State::SendSeqAck => self.state_send_seq_ack(),
                State::Open => self.state_open(),
                State::Error => self.state_error(),
            };
        }
        // Final reset so the peer sees the teardown.
        self.state_error();
        log::debug!("[RSSI] controller worker exited");
    }

    /// Closed and WaitSyn: answer the peer's SYN+ACK or RST, otherwise keep
    /// soliciting with our own SYN every try period.
    fn state_closed_wait(&mut self) -> Duration {
        let sh = Arc::clone(&self.shared);

        if let Some(head) = sh.st_queue.try_pop() {
            if head.is_rst() {
                sh.set_state(State::Closed);
            } else if head.is_syn() && head.is_ack() {
                if let Some(params) = head.syn_params {
                    sh.adopt(&params);
                    // Catch the ack bookkeeping up to the peer's cumulative
                    // ack, releasing anything it already covers (the SYN).
                    let mut guard = sh.tx.lock();
                    let tx = &mut *guard;
                    while tx.prev_ack_rx != head.acknowledge {
                        tx.prev_ack_rx = tx.prev_ack_rx.wrapping_add(1);
                        if tx.list[usize::from(tx.prev_ack_rx)].take().is_some() {
                            tx.count -= 1;
                        }
                    }
                    drop(guard);
                    self.st_time = Instant::now();
                    sh.set_state(State::SendSeqAck);
                    log::debug!(
                        "[RSSI] adopted peer parameters, remote conn id {:#06x}",
                        params.connection_id
                    );
                }
            }
        } else if sh.time_passed(self.st_time, sh.cfg.try_period) {
            let mut head = SegmentHeader::syn(sh.cfg.syn_params(sh.conn_id));
            head.tx_init(true, true);
            let frame = sh.io.req_frame(SYN_SIZE as u32, false, SYN_SIZE as u32);

            let mut guard = sh.tx.lock();
            sh.transport_tx(&mut guard, head, frame, true);
            drop(guard);

            self.st_time = Instant::now();
            sh.set_state(State::WaitSyn);
        }

        sh.conv_time(sh.cfg.try_period) / 4
    }

    /// Complete the handshake with a bare ACK and go to Open.
    fn state_send_seq_ack(&mut self) -> Duration {
        let sh = Arc::clone(&self.shared);

        let mut head = SegmentHeader::new();
        head.tx_init(false, true);
        let frame = sh.io.req_frame(HEADER_SIZE as u32, false, HEADER_SIZE as u32);

        let mut guard = sh.tx.lock();
        sh.transport_tx(&mut guard, head, frame, false);
        drop(guard);

        sh.set_state(State::Open);
        log::info!("[RSSI] connection open, conn id {:#06x}", sh.conn_id);

        let cum_ack = u32::from(sh.negotiated.lock().cum_ack_timeout);
        sh.conv_time(cum_ack) / 2
    }

    /// One Open-state pass: reclaim acknowledged slots, scan for expired
    /// segments, then decide on an outbound ACK or keep-alive.
    fn state_open(&mut self) -> Duration {
        let sh = Arc::clone(&self.shared);

        // Sample once; the rx paths keep writing while we run.
        let loc_ack_rx = sh.last_ack_rx.load(Ordering::Acquire);
        let loc_seq_rx = sh.last_seq_rx.load(Ordering::Acquire);

        // A queued SYN or RST while open is fatal.
        if sh.st_queue.try_pop().is_some() {
            self.st_time = Instant::now();
            sh.set_state(State::Error);
            return Duration::ZERO;
        }

        let neg = sh.negotiated.lock().clone();
        let mut guard = sh.tx.lock();
        let tx = &mut *guard;
        let loc_seq_tx = tx.loc_sequence.wrapping_sub(1);

        // Release everything the peer has acknowledged.
        if loc_ack_rx != tx.prev_ack_rx {
            let mut released = false;
            while tx.prev_ack_rx != loc_ack_rx {
                tx.prev_ack_rx = tx.prev_ack_rx.wrapping_add(1);
                if tx.list[usize::from(tx.prev_ack_rx)].take().is_some() {
                    tx.count -= 1;
                    released = true;
                }
            }
            if released {
                sh.window.notify_all();
            }
        }

        // Walk the in-flight window for expired segments.
        let mut exhausted = false;
        if loc_ack_rx != loc_seq_tx {
            let remote_busy = sh.remote_busy.load(Ordering::Acquire);
            let local_busy = sh.local_busy();
            let mut idx = loc_ack_rx.wrapping_add(1);
            let end = loc_seq_tx.wrapping_add(1);
            while idx != end {
                if let Some(seg) = tx.list[usize::from(idx)].as_mut() {
                    if remote_busy {
                        // Peer backpressure holds the timer instead of resending.
                        seg.sent_at = Instant::now();
                    } else if sh.time_passed(seg.sent_at, u32::from(neg.retran_timeout)) {
                        if seg.send_count >= u32::from(neg.max_retransmissions) {
                            exhausted = true;
                            break;
                        }
                        seg.header.acknowledge = loc_seq_rx;
                        seg.header.set_busy(local_busy);
                        if let Err(err) = seg.header.encode_into(&mut seg.frame) {
                            log::error!("[RSSI] segment re-encode failed: {}", err);
                        } else {
                            if let Err(err) = sh.io.send_frame(&seg.frame) {
                                log::warn!("[RSSI] transport send failed: {}", err);
                            }
                            seg.send_count += 1;
                            seg.sent_at = Instant::now();
                            sh.metrics.inc_retransmissions();
                            sh.metrics.inc_segments_tx();
                            tx.last_ack_tx = loc_seq_rx;
                            tx.tx_time = Instant::now();
                        }
                    }
                }
                idx = idx.wrapping_add(1);
            }
        }
        if exhausted {
            drop(guard);
            self.st_time = Instant::now();
            sh.set_state(State::Error);
            return Duration::ZERO;
        }

        // Sample the transmit clock and pending ack count under the lock.
        let loc_time = tx.tx_time;
        let ack_pend = seq::seq_sub(loc_seq_rx, tx.last_ack_tx);
        drop(guard);

        // NUL keeps an idle link alive; a bare ACK drains pending acks.
        let do_null = sh.time_passed(loc_time, u32::from(neg.null_timeout) / 3);
        let backlog = ack_pend > 0 || sh.local_busy();
        if do_null
            || u32::from(ack_pend) >= u32::from(neg.max_cum_ack)
            || (backlog && sh.time_passed(loc_time, u32::from(neg.cum_ack_timeout)))
        {
            let mut head = SegmentHeader::new();
            head.tx_init(false, true);
            head.set_nul(do_null);
            let frame = sh.io.req_frame(HEADER_SIZE as u32, false, HEADER_SIZE as u32);

            let mut guard = sh.tx.lock();
            sh.transport_tx(&mut guard, head, frame, do_null);
        }

        sh.conv_time(u32::from(neg.cum_ack_timeout)) / 2
    }

    /// Send an RST, clear all transmit and queue state, return to Closed.
    fn state_error(&mut self) -> Duration {
        let sh = Arc::clone(&self.shared);

        let mut head = SegmentHeader::new();
        head.tx_init(false, true);
        head.set_rst(true);
        let frame = sh.io.req_frame(HEADER_SIZE as u32, false, HEADER_SIZE as u32);

        let mut guard = sh.tx.lock();
        sh.transport_tx(&mut guard, head, frame, true);
        let tx = &mut *guard;
        for slot in tx.list.iter_mut() {
            *slot = None;
        }
        tx.count = 0;
        drop(guard);

        sh.metrics.inc_resets();
        sh.set_state(State::Closed);
        sh.app_queue.clear();
        sh.st_queue.clear();
        sh.window.notify_all();
        log::info!("[RSSI] connection reset");

        self.st_time = Instant::now();
        sh.conv_time(sh.cfg.try_period)
    }
}

/// Process-lifetime connection id derived from the clock.
fn generate_conn_id() -> u16 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    ((now.as_nanos() ^ (now.as_nanos() >> 32)) & 0xFFFF) as u16
}
