// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end controller scenarios over an in-memory link pair.
//!
//! Two full stacks are wired back to back through `SimLink`, with a drain
//! thread per side standing in for the application consumer. Loss is
//! injected deterministically: data segments are larger than control
//! segments, so a size threshold selects what the link eats.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rssi::stream::from_frame;
use rssi::{Client, ControllerConfig, Link, SimLink, State, SYN_SIZE};

/// Any frame longer than a SYN is a data segment.
const DATA_LEN: usize = SYN_SIZE + 1;

fn test_config() -> ControllerConfig {
    ControllerConfig {
        segment_size: 1024,
        max_outstanding: 32,
        retran_timeout: 60,
        cum_ack_timeout: 15,
        null_timeout: 600,
        max_retransmissions: 4,
        max_cum_ack: 2,
        timeout_unit: 3,
        try_period: 30,
        busy_threshold: 64,
    }
}

struct Peer {
    client: Client,
    link: Arc<SimLink>,
    rx: mpsc::Receiver<Vec<u8>>,
    paused: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    drain: Option<JoinHandle<()>>,
}

impl Peer {
    fn start(link: Arc<SimLink>, cfg: ControllerConfig) -> Peer {
        let client =
            Client::over_link(Arc::clone(&link) as Arc<dyn Link>, cfg).expect("client stack");
        let controller = Arc::clone(client.controller());
        let (tx, rx) = mpsc::channel();
        let paused = Arc::new(AtomicBool::new(false));
        let stopped = Arc::new(AtomicBool::new(false));

        let pause_flag = Arc::clone(&paused);
        let stop_flag = Arc::clone(&stopped);
        let drain = thread::spawn(move || {
            while !stop_flag.load(Ordering::Acquire) {
                if pause_flag.load(Ordering::Acquire) {
                    thread::sleep(Duration::from_millis(5));
                    continue;
                }
                if let Some(frame) = controller.application_tx_timeout(Duration::from_millis(20)) {
                    let mut bytes = vec![0u8; frame.payload()];
                    let mut cur = frame.begin_read();
                    if from_frame(&frame, &mut cur, &mut bytes).is_ok() {
                        let _ = tx.send(bytes);
                    }
                }
            }
        });

        Peer {
            client,
            link,
            rx,
            paused,
            stopped,
            drain: Some(drain),
        }
    }

    fn pause_drain(&self, on: bool) {
        self.paused.store(on, Ordering::Release);
    }

    fn expect_message(&self, timeout: Duration) -> Vec<u8> {
        self.rx
            .recv_timeout(timeout)
            .expect("message should be delivered")
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        self.stopped.store(true, Ordering::Release);
        if let Some(handle) = self.drain.take() {
            let _ = handle.join();
        }
        self.client.stop();
    }
}

fn open_pair(cfg: ControllerConfig) -> (Peer, Peer) {
    let _ = env_logger::builder().is_test(true).try_init();
    let (link_a, link_b) = SimLink::pair();
    let a = Peer::start(link_a, cfg.clone());
    let b = Peer::start(link_b, cfg);
    assert!(a.client.wait_open(Duration::from_secs(5)), "peer A opens");
    assert!(b.client.wait_open(Duration::from_secs(5)), "peer B opens");
    (a, b)
}

fn wait_until(timeout: Duration, mut pred: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if pred() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    pred()
}

#[test]
fn test_handshake_opens_both_sides() {
    let (a, b) = open_pair(test_config());
    assert!(a.client.controller().is_open());
    assert!(b.client.controller().is_open());
}

#[test]
fn test_single_data_segment_delivery_and_reclaim() {
    let (a, b) = open_pair(test_config());
    let payload = vec![0x5Au8; 100];

    a.client.send(&payload).expect("send");
    assert_eq!(b.expect_message(Duration::from_secs(2)), payload);

    // The peer's cumulative ack empties the retransmission table.
    assert!(
        wait_until(Duration::from_secs(2), || {
            a.client.controller().outstanding_segments() == 0
        }),
        "in-flight segment should be acknowledged"
    );
}

#[test]
fn test_many_segments_delivered_in_order() {
    let (a, b) = open_pair(test_config());

    let messages: Vec<Vec<u8>> = (0u8..20)
        .map(|i| format!("message-{:02}", i).into_bytes())
        .collect();
    for msg in &messages {
        a.client.send(msg).expect("send");
    }

    for expected in &messages {
        assert_eq!(&b.expect_message(Duration::from_secs(2)), expected);
    }
}

#[test]
fn test_lost_data_segment_is_retransmitted() {
    let (a, b) = open_pair(test_config());
    let base = a.client.controller().metrics().retransmissions();

    // Eat exactly one data segment on the outbound path.
    a.link.drop_next_matching(1, DATA_LEN);
    let payload = vec![0x17u8; 200];
    a.client.send(&payload).expect("send");

    assert_eq!(b.expect_message(Duration::from_secs(3)), payload);
    assert!(
        a.client.controller().metrics().retransmissions() > base,
        "delivery required a retransmission"
    );
}

#[test]
fn test_retransmit_exhaustion_resets_connection() {
    let (a, b) = open_pair(test_config());
    let resets_a = a.client.controller().metrics().resets();
    let resets_b = b.client.controller().metrics().resets();

    // Every data segment dies; control traffic still flows.
    a.link.drop_next_matching(u32::MAX, DATA_LEN);
    a.client.send(&[1u8; 64]).expect("send");

    assert!(
        wait_until(Duration::from_secs(5), || {
            a.client.controller().metrics().resets() > resets_a
        }),
        "sender should give up and reset"
    );
    // The RST reaches the peer, which tears down as well.
    assert!(
        wait_until(Duration::from_secs(5), || {
            b.client.controller().metrics().resets() > resets_b
        }),
        "peer should observe the reset"
    );
}

#[test]
fn test_busy_peer_freezes_retransmit_timers() {
    let cfg = ControllerConfig {
        busy_threshold: 8,
        max_outstanding: 64,
        ..test_config()
    };
    let (a, b) = open_pair(cfg);
    let retran_base = a.client.controller().metrics().retransmissions();
    let resets_base = a.client.controller().metrics().resets();

    // The consumer stalls; twenty segments park in the peer's queue, well
    // past its busy threshold.
    b.pause_drain(true);
    let messages: Vec<Vec<u8>> = (0u8..20)
        .map(|i| format!("backlog-{:02}", i).into_bytes())
        .collect();
    for msg in &messages {
        a.client.send(msg).expect("send");
    }

    assert!(
        wait_until(Duration::from_secs(2), || b.client.controller().busy()),
        "peer should cross its busy threshold"
    );

    // Several retransmission timeouts pass; BUSY keeps the timers frozen.
    thread::sleep(Duration::from_millis(400));
    assert_eq!(
        a.client.controller().metrics().retransmissions(),
        retran_base,
        "no retransmissions while the peer is busy"
    );
    assert_eq!(
        a.client.controller().metrics().resets(),
        resets_base,
        "no reset while the peer is busy"
    );

    // Resume the consumer; everything drains in order.
    b.pause_drain(false);
    for expected in &messages {
        assert_eq!(&b.expect_message(Duration::from_secs(3)), expected);
    }
}

#[test]
fn test_out_of_order_arrival_drops_then_recovers() {
    let (a, b) = open_pair(test_config());
    let retran_base = a.client.controller().metrics().retransmissions();

    // First data segment dies, the second arrives ahead of sequence and is
    // dropped by the receiver; both are recovered by retransmission.
    a.link.drop_next_matching(1, DATA_LEN);
    let first = b"first-message".to_vec();
    let second = b"second-message".to_vec();
    a.client.send(&first).expect("send");
    a.client.send(&second).expect("send");

    assert_eq!(b.expect_message(Duration::from_secs(3)), first);
    assert_eq!(b.expect_message(Duration::from_secs(3)), second);
    assert!(a.client.controller().metrics().retransmissions() > retran_base);

    // Exactly once: nothing further arrives.
    assert!(b.rx.recv_timeout(Duration::from_millis(300)).is_err());
}

#[test]
fn test_duplicate_retransmission_not_delivered_twice() {
    let cfg = ControllerConfig {
        // Fast keep-alives carry the recovery ack once the dropped acks are
        // spent; plenty of retries before giving up.
        null_timeout: 150,
        max_retransmissions: 10,
        ..test_config()
    };
    let (a, b) = open_pair(cfg);
    let retran_base = a.client.controller().metrics().retransmissions();

    // Eat the next control frames from the receiver so the ack for the
    // payload is lost and the sender retransmits a delivered segment.
    b.link.drop_next_matching(2, 0);
    let payload = b"exactly-once".to_vec();
    a.client.send(&payload).expect("send");

    assert_eq!(b.expect_message(Duration::from_secs(3)), payload);
    assert!(
        wait_until(Duration::from_secs(3), || {
            a.client.controller().metrics().retransmissions() > retran_base
        }),
        "lost ack should force a retransmission"
    );

    // The receiver saw the duplicate and discarded it.
    assert!(b.rx.recv_timeout(Duration::from_millis(300)).is_err());

    // The keep-alive ack eventually clears the in-flight table.
    assert!(
        wait_until(Duration::from_secs(3), || {
            a.client.controller().outstanding_segments() == 0
        }),
        "duplicate segment should still be acknowledged"
    );
}

#[test]
fn test_shutdown_sends_reset_to_peer() {
    let (a, b) = open_pair(test_config());
    let resets_b = b.client.controller().metrics().resets();

    drop(a);

    assert!(
        wait_until(Duration::from_secs(5), || {
            b.client.controller().metrics().resets() > resets_b
        }),
        "surviving peer should observe the reset"
    );
    assert!(
        wait_until(Duration::from_secs(2), || {
            b.client.controller().state() != State::Open
        }),
        "surviving peer should leave the open state"
    );
}
