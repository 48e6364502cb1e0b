// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Segment header encoder/decoder.
//!
//! # Wire Format
//!
//! Every segment starts with the 8-byte base header (network byte order):
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+---------------+---------------+---------------+
//! |S|A|E|R|N|0|0|B| header length |   sequence    |  acknowledge  |
//! +-+-+-+-+-+-+-+-+---------------+---------------+---------------+
//! |           checksum            |           reserved            |
//! +-------------------------------+-------------------------------+
//! ```
//!
//! Flag bits: S=SYN, A=ACK, E=EAK (reserved), R=RST, N=NUL, B=BUSY.
//!
//! A SYN segment extends the header to 24 bytes with the connection
//! parameter block:
//!
//! ```text
//! byte  8      version (high nibble), low nibble reserved
//! byte  9      max outstanding segments
//! bytes 10-11  max segment size
//! bytes 12-13  retransmission timeout
//! bytes 14-15  cumulative ack timeout
//! bytes 16-17  null timeout
//! byte  18     max retransmissions
//! byte  19     max cumulative ack
//! byte  20     timeout unit exponent
//! byte  21     reserved
//! bytes 22-23  connection id
//! ```
//!
//! The checksum is the 16-bit one's-complement sum over the header words,
//! stored complemented, so summing the encoded header yields 0xFFFF.

use std::fmt;

use crate::stream::Frame;

/// Base header size in bytes.
pub const HEADER_SIZE: usize = 8;

/// SYN header size in bytes.
pub const SYN_SIZE: usize = 24;

/// Flag bits of header byte 0.
pub mod flags {
    /// Connection request carrying the parameter block.
    pub const SYN: u8 = 0x80;
    /// Acknowledge field is valid.
    pub const ACK: u8 = 0x40;
    /// Extended ack. Reserved, never set.
    pub const EAK: u8 = 0x20;
    /// Connection reset.
    pub const RST: u8 = 0x10;
    /// Keep-alive segment with no payload.
    pub const NUL: u8 = 0x08;
    /// Receiver's application queue is near capacity.
    pub const BUSY: u8 = 0x01;
}

/// Error raised when a segment header cannot be decoded or emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderError {
    /// Fewer bytes than the header needs.
    Truncated {
        /// Bytes present.
        have: usize,
        /// Bytes the header needs.
        need: usize,
    },
    /// The header length field does not match the SYN flag.
    BadLength {
        /// Value found on the wire.
        field: u8,
        /// Value the flags demand.
        expected: u8,
    },
    /// The one's-complement sum over the header is not 0xFFFF.
    BadChecksum,
}

impl fmt::Display for HeaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { have, need } => {
                write!(f, "truncated header: {} bytes, need {}", have, need)
            }
            Self::BadLength { field, expected } => {
                write!(f, "header length {} does not match flags ({})", field, expected)
            }
            Self::BadChecksum => write!(f, "header checksum mismatch"),
        }
    }
}

impl std::error::Error for HeaderError {}

/// Connection parameters carried by a SYN segment.
///
/// Both sides advertise their values; the side completing the handshake
/// adopts the peer's block wholesale. Timeouts are tick counts scaled by
/// `10^timeout_unit` microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynParams {
    /// Protocol version, currently 1.
    pub version: u8,
    /// Outstanding-segment window the sender grants its peer.
    pub max_outstanding_segments: u8,
    /// Largest segment (header plus payload) the sender accepts.
    pub max_segment_size: u16,
    /// Retransmission timeout in timeout units.
    pub retransmission_timeout: u16,
    /// Cumulative ack timeout in timeout units.
    pub cumulative_ack_timeout: u16,
    /// Keep-alive timeout in timeout units.
    pub null_timeout: u16,
    /// Sends of one segment before the connection is declared dead.
    pub max_retransmissions: u8,
    /// Pending acks that force an immediate ack segment.
    pub max_cumulative_ack: u8,
    /// Timeout unit exponent: one tick is `10^n` microseconds.
    pub timeout_unit: u8,
    /// Process-lifetime connection identifier.
    pub connection_id: u16,
}

/// One segment header.
///
/// Holds the decoded field values; the parameter block is present exactly
/// when the segment is a SYN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    flags: u8,
    /// Segment sequence number.
    pub sequence: u8,
    /// Cumulative ack of the highest in-order segment received.
    pub acknowledge: u8,
    /// Connection parameters, present iff SYN.
    pub syn_params: Option<SynParams>,
}

impl SegmentHeader {
    /// Header with no flags set.
    pub fn new() -> Self {
        Self {
            flags: 0,
            sequence: 0,
            acknowledge: 0,
            syn_params: None,
        }
    }

    /// SYN header carrying the local parameter block.
    pub fn syn(params: SynParams) -> Self {
        Self {
            flags: 0,
            sequence: 0,
            acknowledge: 0,
            syn_params: Some(params),
        }
    }

    /// Prepare the header for first transmission.
    pub fn tx_init(&mut self, syn: bool, ack: bool) {
        debug_assert_eq!(syn, self.syn_params.is_some());
        self.flags = 0;
        self.set_ack(ack);
    }

    /// Encoded size: 8 bytes, or 24 for SYN.
    pub fn size(&self) -> usize {
        if self.is_syn() {
            SYN_SIZE
        } else {
            HEADER_SIZE
        }
    }

    pub fn is_syn(&self) -> bool {
        self.syn_params.is_some()
    }

    pub fn is_ack(&self) -> bool {
        self.flags & flags::ACK != 0
    }

    pub fn is_rst(&self) -> bool {
        self.flags & flags::RST != 0
    }

    pub fn is_nul(&self) -> bool {
        self.flags & flags::NUL != 0
    }

    pub fn is_busy(&self) -> bool {
        self.flags & flags::BUSY != 0
    }

    pub fn set_ack(&mut self, on: bool) {
        self.set_flag(flags::ACK, on);
    }

    pub fn set_rst(&mut self, on: bool) {
        self.set_flag(flags::RST, on);
    }

    pub fn set_nul(&mut self, on: bool) {
        self.set_flag(flags::NUL, on);
    }

    pub fn set_busy(&mut self, on: bool) {
        self.set_flag(flags::BUSY, on);
    }

    fn set_flag(&mut self, bit: u8, on: bool) {
        if on {
            self.flags |= bit;
        } else {
            self.flags &= !bit;
        }
    }

    /// Encode the header into `buf`, returning the encoded size.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, HeaderError> {
        let size = self.size();
        if buf.len() < size {
            return Err(HeaderError::Truncated {
                have: buf.len(),
                need: size,
            });
        }

        let mut wire = self.flags & !flags::SYN;
        if self.is_syn() {
            wire |= flags::SYN;
        }
        buf[0] = wire;
        buf[1] = size as u8;
        buf[2] = self.sequence;
        buf[3] = self.acknowledge;
        buf[4..8].fill(0);

        if let Some(p) = &self.syn_params {
            buf[8] = p.version << 4;
            buf[9] = p.max_outstanding_segments;
            buf[10..12].copy_from_slice(&p.max_segment_size.to_be_bytes());
            buf[12..14].copy_from_slice(&p.retransmission_timeout.to_be_bytes());
            buf[14..16].copy_from_slice(&p.cumulative_ack_timeout.to_be_bytes());
            buf[16..18].copy_from_slice(&p.null_timeout.to_be_bytes());
            buf[18] = p.max_retransmissions;
            buf[19] = p.max_cumulative_ack;
            buf[20] = p.timeout_unit;
            buf[21] = 0;
            buf[22..24].copy_from_slice(&p.connection_id.to_be_bytes());
        }

        let sum = ones_complement_sum(&buf[..size]);
        buf[4..6].copy_from_slice(&(!sum).to_be_bytes());
        Ok(size)
    }

    /// Write the header into the start of the frame's first buffer window
    /// and extend that buffer's payload over it.
    pub fn encode_into(&self, frame: &mut Frame) -> Result<(), HeaderError> {
        let size = self.size();
        if frame.is_empty() {
            return Err(HeaderError::Truncated {
                have: 0,
                need: size,
            });
        }
        let buffer = frame.buffer_mut(0);
        let window = buffer.window_mut();
        let win_len = window.len();
        if win_len < size {
            return Err(HeaderError::Truncated {
                have: win_len,
                need: size,
            });
        }
        self.encode(&mut window[..size])?;
        // Payload already covering the header is left alone.
        buffer
            .set_payload(size, false)
            .map_err(|_| HeaderError::Truncated {
                have: win_len,
                need: size,
            })?;
        Ok(())
    }

    /// Decode and verify a header from the front of `buf`.
    ///
    /// Succeeds only when the buffer holds the full header, the length field
    /// matches the SYN flag and the checksum verifies. Anything else is
    /// reported so the caller can drop the segment.
    pub fn decode(buf: &[u8]) -> Result<Self, HeaderError> {
        if buf.len() < HEADER_SIZE {
            return Err(HeaderError::Truncated {
                have: buf.len(),
                need: HEADER_SIZE,
            });
        }
        let wire_flags = buf[0];
        let syn = wire_flags & flags::SYN != 0;
        let size = if syn { SYN_SIZE } else { HEADER_SIZE };
        if buf.len() < size {
            return Err(HeaderError::Truncated {
                have: buf.len(),
                need: size,
            });
        }
        if buf[1] as usize != size {
            return Err(HeaderError::BadLength {
                field: buf[1],
                expected: size as u8,
            });
        }
        if ones_complement_sum(&buf[..size]) != 0xFFFF {
            return Err(HeaderError::BadChecksum);
        }

        let syn_params = if syn {
            Some(SynParams {
                version: buf[8] >> 4,
                max_outstanding_segments: buf[9],
                max_segment_size: u16::from_be_bytes([buf[10], buf[11]]),
                retransmission_timeout: u16::from_be_bytes([buf[12], buf[13]]),
                cumulative_ack_timeout: u16::from_be_bytes([buf[14], buf[15]]),
                null_timeout: u16::from_be_bytes([buf[16], buf[17]]),
                max_retransmissions: buf[18],
                max_cumulative_ack: buf[19],
                timeout_unit: buf[20],
                connection_id: u16::from_be_bytes([buf[22], buf[23]]),
            })
        } else {
            None
        };

        Ok(Self {
            flags: wire_flags & !flags::SYN,
            sequence: buf[2],
            acknowledge: buf[3],
            syn_params,
        })
    }
}

impl Default for SegmentHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SegmentHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "seq={} ack={} [{}{}{}{}{}]",
            self.sequence,
            self.acknowledge,
            if self.is_syn() { "S" } else { "-" },
            if self.is_ack() { "A" } else { "-" },
            if self.is_rst() { "R" } else { "-" },
            if self.is_nul() { "N" } else { "-" },
            if self.is_busy() { "B" } else { "-" },
        )
    }
}

/// One's-complement sum over big-endian 16-bit words, with end-around carry.
fn ones_complement_sum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(u16::from_be_bytes([*last, 0]));
    }
    while sum > 0xFFFF {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    sum as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_params() -> SynParams {
        SynParams {
            version: 1,
            max_outstanding_segments: 32,
            max_segment_size: 1024,
            retransmission_timeout: 10,
            cumulative_ack_timeout: 5,
            null_timeout: 3000,
            max_retransmissions: 15,
            max_cumulative_ack: 2,
            timeout_unit: 3,
            connection_id: 0x4d2a,
        }
    }

    #[test]
    fn test_base_header_roundtrip() {
        let mut head = SegmentHeader::new();
        head.tx_init(false, true);
        head.set_nul(true);
        head.set_busy(true);
        head.sequence = 200;
        head.acknowledge = 57;

        let mut buf = [0u8; HEADER_SIZE];
        let n = head.encode(&mut buf).expect("encode");
        assert_eq!(n, HEADER_SIZE);
        assert_eq!(buf[1], 8);

        let back = SegmentHeader::decode(&buf).expect("decode");
        assert_eq!(back, head);
        assert!(back.is_ack());
        assert!(back.is_nul());
        assert!(back.is_busy());
        assert!(!back.is_syn());
    }

    #[test]
    fn test_syn_header_roundtrip() {
        let mut head = SegmentHeader::syn(sample_params());
        head.set_ack(true);
        head.sequence = 100;

        let mut buf = [0u8; SYN_SIZE];
        let n = head.encode(&mut buf).expect("encode");
        assert_eq!(n, SYN_SIZE);
        assert_eq!(buf[0] & flags::SYN, flags::SYN);
        assert_eq!(buf[1], 24);

        let back = SegmentHeader::decode(&buf).expect("decode");
        assert_eq!(back.syn_params, Some(sample_params()));
        assert_eq!(back.sequence, 100);
        assert!(back.is_syn());
        assert!(back.is_ack());
    }

    #[test]
    fn test_encoded_header_sums_to_all_ones() {
        let mut head = SegmentHeader::syn(sample_params());
        head.tx_init(true, true);
        let mut buf = [0u8; SYN_SIZE];
        head.encode(&mut buf).expect("encode");
        assert_eq!(super::ones_complement_sum(&buf), 0xFFFF);
    }

    #[test]
    fn test_corrupted_byte_rejected() {
        let mut head = SegmentHeader::new();
        head.tx_init(false, true);
        head.sequence = 9;
        let mut buf = [0u8; HEADER_SIZE];
        head.encode(&mut buf).expect("encode");

        for i in [2usize, 3, 4, 5] {
            let mut bad = buf;
            bad[i] ^= 0x20;
            assert_eq!(
                SegmentHeader::decode(&bad),
                Err(HeaderError::BadChecksum),
                "flip in byte {} must fail verification",
                i
            );
        }
    }

    #[test]
    fn test_truncated_rejected() {
        let mut head = SegmentHeader::new();
        head.tx_init(false, false);
        let mut buf = [0u8; HEADER_SIZE];
        head.encode(&mut buf).expect("encode");

        assert_eq!(
            SegmentHeader::decode(&buf[..6]),
            Err(HeaderError::Truncated { have: 6, need: 8 })
        );
    }

    #[test]
    fn test_syn_flag_with_short_buffer_rejected() {
        let mut head = SegmentHeader::syn(sample_params());
        head.tx_init(true, true);
        let mut buf = [0u8; SYN_SIZE];
        head.encode(&mut buf).expect("encode");

        assert_eq!(
            SegmentHeader::decode(&buf[..HEADER_SIZE]),
            Err(HeaderError::Truncated { have: 8, need: 24 })
        );
    }

    #[test]
    fn test_length_field_mismatch_rejected() {
        let mut head = SegmentHeader::new();
        head.tx_init(false, true);
        let mut buf = [0u8; HEADER_SIZE];
        head.encode(&mut buf).expect("encode");
        buf[1] = 24;

        assert!(matches!(
            SegmentHeader::decode(&buf),
            Err(HeaderError::BadLength { field: 24, .. }) | Err(HeaderError::BadChecksum)
        ));
    }

    #[test]
    fn test_all_zero_header_rejected() {
        let buf = [0u8; HEADER_SIZE];
        assert!(SegmentHeader::decode(&buf).is_err());
    }

    #[test]
    fn test_tx_init_clears_stale_flags() {
        let mut head = SegmentHeader::new();
        head.set_rst(true);
        head.set_busy(true);
        head.tx_init(false, true);
        assert!(!head.is_rst());
        assert!(!head.is_busy());
        assert!(head.is_ack());
    }
}
