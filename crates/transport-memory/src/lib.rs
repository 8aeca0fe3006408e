//! In-process multi-rank transport.
//!
//! Every "rank" is a thread of the same OS process holding one
//! [`MemoryTransport`] cloned off a shared hub. Point-to-point frames travel
//! over per-rank crossbeam channels; the LBTS all-gather and the barrier are
//! generation-counted rendezvous points on a condvar, reusable across
//! iterations the way an MPI collective is.
//!
//! The backend exists for tests and for driving multi-rank scenarios from
//! one binary. It exchanges the *packed* LBTS wire format so the
//! fixed-layout encoding is exercised end to end.

use crossbeam::channel::{unbounded, Receiver, Sender, TryRecvError};
use lockstep_transport::{LbtsRecord, Transport, TransportError, LBTS_WIRE_LEN};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

struct GatherState {
    slots: Vec<Option<[u8; LBTS_WIRE_LEN]>>,
    deposited: u32,
    generation: u64,
    result: Vec<LbtsRecord>,
}

struct BarrierState {
    arrived: u32,
    generation: u64,
}

struct Hub {
    size: u32,
    senders: Vec<Sender<Vec<u8>>>,
    receivers: Vec<Receiver<Vec<u8>>>,
    gather: Mutex<GatherState>,
    gather_cv: Condvar,
    barrier: Mutex<BarrierState>,
    barrier_cv: Condvar,
}

/// One rank's endpoint of the in-process communicator.
pub struct MemoryTransport {
    rank: u32,
    hub: Arc<Hub>,
}

impl MemoryTransport {
    /// Create a communicator of `size` ranks and return one endpoint per
    /// rank, indexed by rank.
    pub fn cluster(size: u32) -> Vec<MemoryTransport> {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..size).map(|_| unbounded()).unzip();
        let hub = Arc::new(Hub {
            size,
            senders,
            receivers,
            gather: Mutex::new(GatherState {
                slots: vec![None; size as usize],
                deposited: 0,
                generation: 0,
                result: Vec::new(),
            }),
            gather_cv: Condvar::new(),
            barrier: Mutex::new(BarrierState {
                arrived: 0,
                generation: 0,
            }),
            barrier_cv: Condvar::new(),
        });
        (0..size)
            .map(|rank| MemoryTransport {
                rank,
                hub: Arc::clone(&hub),
            })
            .collect()
    }
}

impl Transport for MemoryTransport {
    fn rank(&self) -> u32 {
        self.rank
    }

    fn size(&self) -> u32 {
        self.hub.size
    }

    fn send(&self, dest: u32, frame: Vec<u8>) -> Result<(), TransportError> {
        let sender = self
            .hub
            .senders
            .get(dest as usize)
            .ok_or(TransportError::UnknownRank {
                rank: dest,
                size: self.hub.size,
            })?;
        sender
            .send(frame)
            .map_err(|_| TransportError::Disconnected)
    }

    fn try_recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        match self.hub.receivers[self.rank as usize].try_recv() {
            Ok(frame) => Ok(Some(frame)),
            Err(TryRecvError::Empty) => Ok(None),
            // All senders live in the hub, so this only happens once every
            // rank has torn down; nothing more will arrive.
            Err(TryRecvError::Disconnected) => Ok(None),
        }
    }

    fn all_gather(&self, record: LbtsRecord) -> Result<Vec<LbtsRecord>, TransportError> {
        let hub = &self.hub;
        let mut state = hub.gather.lock();
        let arrived_at = state.generation;
        debug_assert!(
            state.slots[self.rank as usize].is_none(),
            "rank gathered twice in one generation"
        );
        state.slots[self.rank as usize] = Some(record.to_bytes());
        state.deposited += 1;

        if state.deposited == hub.size {
            state.result = state
                .slots
                .iter_mut()
                .map(|slot| {
                    let bytes = slot.take().expect("every rank deposited");
                    LbtsRecord::from_bytes(&bytes)
                })
                .collect();
            state.deposited = 0;
            state.generation += 1;
            hub.gather_cv.notify_all();
            Ok(state.result.clone())
        } else {
            while state.generation == arrived_at {
                hub.gather_cv.wait(&mut state);
            }
            Ok(state.result.clone())
        }
    }

    fn barrier(&self) -> Result<(), TransportError> {
        let hub = &self.hub;
        let mut state = hub.barrier.lock();
        let arrived_at = state.generation;
        state.arrived += 1;
        if state.arrived == hub.size {
            state.arrived = 0;
            state.generation += 1;
            hub.barrier_cv.notify_all();
        } else {
            while state.generation == arrived_at {
                hub.barrier_cv.wait(&mut state);
            }
        }
        Ok(())
    }
}
