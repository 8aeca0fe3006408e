//! The fixed-size LBTS record exchanged by the window all-gather.

use lockstep_core::SimTime;

/// Wire length of one packed record: five host-endian fields, contiguous.
pub const LBTS_WIRE_LEN: usize = 21;

/// One rank's contribution to the lower-bound-on-timestamps exchange.
///
/// The only wire format the engine fixes bit-exactly: `smallest_time` (i64),
/// `rx_count`, `tx_count`, `rank` (u32 each) and `finished` (one byte),
/// host-endian, packed in that order. Total length must match on all ranks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LbtsRecord {
    /// Smallest timestamp this rank could still execute.
    pub smallest_time: SimTime,
    /// Cross-rank messages received so far.
    pub rx_count: u32,
    /// Cross-rank messages sent so far.
    pub tx_count: u32,
    /// Contributing rank.
    pub rank: u32,
    /// True when every LP of the rank is finished.
    pub finished: bool,
}

impl LbtsRecord {
    /// Pack into the fixed wire layout.
    pub fn to_bytes(&self) -> [u8; LBTS_WIRE_LEN] {
        let mut buf = [0u8; LBTS_WIRE_LEN];
        buf[0..8].copy_from_slice(&self.smallest_time.ticks().to_ne_bytes());
        buf[8..12].copy_from_slice(&self.rx_count.to_ne_bytes());
        buf[12..16].copy_from_slice(&self.tx_count.to_ne_bytes());
        buf[16..20].copy_from_slice(&self.rank.to_ne_bytes());
        buf[20] = self.finished as u8;
        buf
    }

    /// Unpack from the fixed wire layout.
    pub fn from_bytes(buf: &[u8; LBTS_WIRE_LEN]) -> Self {
        let mut time = [0u8; 8];
        time.copy_from_slice(&buf[0..8]);
        let mut rx = [0u8; 4];
        rx.copy_from_slice(&buf[8..12]);
        let mut tx = [0u8; 4];
        tx.copy_from_slice(&buf[12..16]);
        let mut rank = [0u8; 4];
        rank.copy_from_slice(&buf[16..20]);
        Self {
            smallest_time: SimTime::from_ticks(i64::from_ne_bytes(time)),
            rx_count: u32::from_ne_bytes(rx),
            tx_count: u32::from_ne_bytes(tx),
            rank: u32::from_ne_bytes(rank),
            finished: buf[20] != 0,
        }
    }
}
