//! Single-rank transport for purely multi-threaded runs.

use crate::{LbtsRecord, Transport, TransportError};

/// Backend for a communicator of size one: no peers, no traffic, and an
/// all-gather that returns the caller's own record.
///
/// This is what the multithreaded (non-distributed) simulator kind runs on;
/// the coordinator logic is identical either way.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTransport;

impl NullTransport {
    pub fn new() -> Self {
        NullTransport
    }
}

impl Transport for NullTransport {
    fn rank(&self) -> u32 {
        0
    }

    fn size(&self) -> u32 {
        1
    }

    fn send(&self, dest: u32, _frame: Vec<u8>) -> Result<(), TransportError> {
        Err(TransportError::UnknownRank { rank: dest, size: 1 })
    }

    fn try_recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        Ok(None)
    }

    fn all_gather(&self, record: LbtsRecord) -> Result<Vec<LbtsRecord>, TransportError> {
        Ok(vec![record])
    }

    fn barrier(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_core::SimTime;

    #[test]
    fn test_gather_echoes_own_record() {
        let transport = NullTransport::new();
        let record = LbtsRecord {
            smallest_time: SimTime::from_millis(1),
            rx_count: 0,
            tx_count: 0,
            rank: 0,
            finished: false,
        };
        assert_eq!(transport.all_gather(record).unwrap(), vec![record]);
        assert!(transport.try_recv().unwrap().is_none());
        assert!(transport.send(1, Vec::new()).is_err(), "no peers to send to");
    }
}
