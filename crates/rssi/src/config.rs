// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Controller configuration.

use crate::protocol::SynParams;

/// Protocol version advertised in SYN segments.
pub const VERSION: u8 = 1;

/// Connection parameters requested by the local side.
///
/// The values below are what the controller advertises in its SYN; the
/// peer's advertisement is adopted wholesale once the handshake completes.
/// All timeouts are tick counts scaled by `10^timeout_unit` microseconds.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Largest segment (header plus payload) this side emits or accepts.
    pub segment_size: u32,
    /// Outstanding-segment window granted to the peer.
    pub max_outstanding: u8,
    /// Requested retransmission timeout, in ticks.
    pub retran_timeout: u16,
    /// Requested cumulative ack timeout, in ticks.
    pub cum_ack_timeout: u16,
    /// Requested keep-alive timeout, in ticks. A NUL segment goes out after
    /// a third of this with no transmit activity.
    pub null_timeout: u16,
    /// Sends of one segment before the connection is declared dead.
    pub max_retransmissions: u8,
    /// Pending acks that force an immediate ack segment.
    pub max_cum_ack: u8,
    /// Timeout unit exponent: one tick is `10^n` microseconds.
    pub timeout_unit: u8,
    /// Interval between connection attempts, in ticks.
    pub try_period: u32,
    /// Application queue depth above which BUSY is signalled to the peer.
    pub busy_threshold: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            segment_size: 1024,
            max_outstanding: 32,
            retran_timeout: 10,
            cum_ack_timeout: 5,
            null_timeout: 3000,
            max_retransmissions: 15,
            max_cum_ack: 2,
            timeout_unit: 3,
            try_period: 100,
            busy_threshold: 64,
        }
    }
}

impl ControllerConfig {
    /// The parameter block this side advertises in its SYN.
    pub fn syn_params(&self, connection_id: u16) -> SynParams {
        SynParams {
            version: VERSION,
            max_outstanding_segments: self.max_outstanding,
            max_segment_size: self.segment_size.min(u32::from(u16::MAX)) as u16,
            retransmission_timeout: self.retran_timeout,
            cumulative_ack_timeout: self.cum_ack_timeout,
            null_timeout: self.null_timeout,
            max_retransmissions: self.max_retransmissions,
            max_cumulative_ack: self.max_cum_ack,
            timeout_unit: self.timeout_unit,
            connection_id,
        }
    }
}
