//! Framing for cross-rank event messages.

use crate::TransportError;
use lockstep_core::SimTime;

/// Header length: dest_rank, handler, context (u32 each) + send_time,
/// link_delay (i64 each), little-endian.
const HEADER_LEN: usize = 28;

/// A cross-rank event on the wire: fixed routing header plus an opaque,
/// implementation-defined payload the receiving rank decodes through its
/// handler registry.
///
/// The receive timestamp is `send_time + link_delay`; the link delay is the
/// sending device's channel delay, which the partition guarantees is at
/// least the minimum lookahead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFrame {
    /// Rank this frame is addressed to.
    pub dest_rank: u32,
    /// Registry id of the payload decoder on the receiving side.
    pub handler: u32,
    /// Node context the event is scheduled against (local to `dest_rank`).
    pub context: u32,
    /// Logical send time at the sending LP.
    pub send_time: SimTime,
    /// Propagation delay of the crossed link.
    pub link_delay: SimTime,
    /// Serialized event payload.
    pub payload: Vec<u8>,
}

impl EventFrame {
    /// Encode header + payload into one buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&self.dest_rank.to_le_bytes());
        buf.extend_from_slice(&self.handler.to_le_bytes());
        buf.extend_from_slice(&self.context.to_le_bytes());
        buf.extend_from_slice(&self.send_time.ticks().to_le_bytes());
        buf.extend_from_slice(&self.link_delay.ticks().to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decode a received buffer.
    pub fn decode(buf: &[u8]) -> Result<Self, TransportError> {
        if buf.len() < HEADER_LEN {
            return Err(TransportError::FrameTooShort { len: buf.len() });
        }
        let u32_at = |at: usize| {
            let mut v = [0u8; 4];
            v.copy_from_slice(&buf[at..at + 4]);
            u32::from_le_bytes(v)
        };
        let i64_at = |at: usize| {
            let mut v = [0u8; 8];
            v.copy_from_slice(&buf[at..at + 8]);
            i64::from_le_bytes(v)
        };
        Ok(Self {
            dest_rank: u32_at(0),
            handler: u32_at(4),
            context: u32_at(8),
            send_time: SimTime::from_ticks(i64_at(12)),
            link_delay: SimTime::from_ticks(i64_at(20)),
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }

    /// Timestamp at which the event executes on the receiving rank.
    pub fn receive_time(&self) -> SimTime {
        self.send_time + self.link_delay
    }
}
