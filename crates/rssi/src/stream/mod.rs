// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Zero-copy stream containers.
//!
//! A [`Frame`] is an ordered list of [`Buffer`]s forming one logical message.
//! Each buffer is a single contiguous allocation handed out by a [`Pool`] and
//! carries head and tail reservations so protocol layers can prepend and
//! append headers to the same backing memory without copying.
//!
//! ```text
//! Buffer layout:
//!
//!   0          head_room         payload            raw_size - tail_room
//!   +--------------+----------------+---------------------+-------------+
//!   |  head room   |  payload data  |  available space    |  tail room  |
//!   +--------------+----------------+---------------------+-------------+
//!                  [------- usable window -----------------]
//! ```
//!
//! The [`FrameCursor`] presents the frame as one flat byte sequence; buffer
//! boundaries never leak to the caller.

mod buffer;
mod cursor;
mod frame;
mod pool;

pub use buffer::{Buffer, BufferError};
pub use cursor::{from_frame, to_frame, FrameCursor};
pub use frame::{Frame, FrameError};
pub use pool::{HeapPool, Pool, PoolStats};
