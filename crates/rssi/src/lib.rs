// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # RSSI - Reliable SSI datagram transport
//!
//! A pure Rust implementation of the RSSI protocol: a connection-oriented,
//! reliable transport for framed application data over an unreliable
//! datagram link. The protocol provides connection negotiation with
//! parameter exchange, in-order delivery with sequence-numbered segments,
//! cumulative acknowledgement, retransmission on timeout, keep-alive (NUL)
//! segments, flow control via a bounded outstanding-segment window and a
//! BUSY flag, and graceful reset.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use rssi::{Client, ControllerConfig};
//!
//! fn main() -> std::io::Result<()> {
//!     let local = "0.0.0.0:8198".parse().expect("addr");
//!     let peer = "192.168.2.10:8198".parse().expect("addr");
//!     let client = Client::connect(local, peer, ControllerConfig::default())?;
//!
//!     assert!(client.wait_open(Duration::from_secs(2)));
//!     client.send(b"hello")?;
//!     if let Some(reply) = client.recv_timeout(Duration::from_secs(1)) {
//!         println!("{} bytes", reply.len());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                      Application endpoint                    |
//! |          req_frame / send_frame / recv (user thread)         |
//! +--------------------------------------------------------------+
//! |                          Controller                          |
//! |  state machine | retransmission table | timers | queues      |
//! |                  (dedicated worker thread)                   |
//! +--------------------------------------------------------------+
//! |                      Transport endpoint                      |
//! |        frame pool | segment serialization | rx pump          |
//! +--------------------------------------------------------------+
//! |                        Datagram link                         |
//! |                  UDP socket or test harness                  |
//! +--------------------------------------------------------------+
//! ```
//!
//! Payloads travel in [`Frame`]s: ordered lists of pool-allocated
//! [`Buffer`]s whose head and tail reservations let each layer prepend its
//! header into the same backing memory. The controller never copies user
//! bytes; only the link boundary serializes a segment into a datagram.

pub mod config;
pub mod controller;
pub mod endpoint;
pub mod link;
pub mod protocol;
pub mod stream;

pub use config::{ControllerConfig, VERSION};
pub use controller::{Controller, ControllerError, ControllerMetrics, SegmentIo, State};
pub use endpoint::{Application, Client, RxPump, Transport};
pub use link::{Link, LinkStats, SimLink, UdpLink};
pub use protocol::{HeaderError, SegmentHeader, SynParams, HEADER_SIZE, SYN_SIZE};
pub use stream::{Buffer, BufferError, Frame, FrameCursor, FrameError, HeapPool, Pool};
