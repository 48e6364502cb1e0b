// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Frame container: an ordered list of buffers forming one logical message.

use std::fmt;

use super::Buffer;

/// Error raised by cursor movement and frame copy operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer bytes remain in the frame than the operation needs.
    Exhausted {
        /// Bytes the operation needs.
        requested: usize,
        /// Bytes left between the cursor and the frame end.
        remaining: usize,
    },
    /// A write operation was attempted through a read cursor.
    ReadOnly,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted {
                requested,
                remaining,
            } => write!(
                f,
                "frame exhausted: requested {} bytes, {} remaining",
                requested, remaining
            ),
            Self::ReadOnly => write!(f, "write through a read cursor"),
        }
    }
}

impl std::error::Error for FrameError {}

/// An ordered sequence of [`Buffer`]s carrying one logical message.
///
/// Aggregate sizes are derived from the member buffers. The first buffer's
/// head room is the protocol-stack prepend point: each layer grows it to
/// reserve space for its header and shrinks it again when the header is
/// written or consumed.
#[derive(Default)]
pub struct Frame {
    buffers: Vec<Buffer>,
}

impl Frame {
    /// Create an empty frame.
    pub fn new() -> Self {
        Self {
            buffers: Vec::new(),
        }
    }

    /// Create a frame holding a single buffer.
    pub fn with_buffer(buffer: Buffer) -> Self {
        Self {
            buffers: vec![buffer],
        }
    }

    /// Append a buffer to the end of the frame.
    pub fn append_buffer(&mut self, buffer: Buffer) {
        self.buffers.push(buffer);
    }

    /// Number of buffers in the frame.
    pub fn count(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Borrow buffer `index`.
    ///
    /// # Panics
    /// Panics when `index` is out of range.
    pub fn buffer(&self, index: usize) -> &Buffer {
        &self.buffers[index]
    }

    /// Mutably borrow buffer `index`.
    ///
    /// # Panics
    /// Panics when `index` is out of range.
    pub fn buffer_mut(&mut self, index: usize) -> &mut Buffer {
        &mut self.buffers[index]
    }

    /// Take the buffers out of the frame.
    pub fn into_buffers(self) -> Vec<Buffer> {
        self.buffers
    }

    /// Sum of the buffer usable windows.
    pub fn size(&self) -> usize {
        self.buffers.iter().map(Buffer::size).sum()
    }

    /// Sum of the buffer payload lengths.
    pub fn payload(&self) -> usize {
        self.buffers.iter().map(Buffer::payload).sum()
    }

    /// Space still open for payload across the frame.
    pub fn available(&self) -> usize {
        self.size() - self.payload()
    }

    /// Set the aggregate payload length, distributing it over the buffers in
    /// order. Shrinks as well as grows.
    pub fn set_payload(&mut self, mut size: usize) -> Result<(), super::BufferError> {
        for buffer in &mut self.buffers {
            let take = size.min(buffer.size());
            buffer.set_payload(take, true)?;
            size -= take;
        }
        if size > 0 {
            return Err(super::BufferError::Boundary {
                requested: size,
                available: 0,
            });
        }
        Ok(())
    }

}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("buffers", &self.buffers.len())
            .field("size", &self.size())
            .field("payload", &self.payload())
            .finish()
    }
}
