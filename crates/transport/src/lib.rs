//! Transport contracts for the distributed half of the engine.
//!
//! The coordinator is agnostic to how ranks talk to each other; it only
//! assumes the [`Transport`] primitives: non-blocking point-to-point sends,
//! a drain of currently-available inbound frames, and a blocking all-gather
//! of fixed-size [`LbtsRecord`]s. The in-memory implementation lives in
//! `lockstep-transport-memory`; an MPI-style backend would implement the
//! same trait.
//!
//! Cross-rank event payloads are opaque bytes. Each rank registers decoders
//! in a [`HandlerRegistry`]; the transport shim uses the frame's handler id
//! to turn the bytes back into an invocable payload on the receiving side.

mod lbts;
mod null;
mod registry;
mod wire;

pub use lbts::{LbtsRecord, LBTS_WIRE_LEN};
pub use null::NullTransport;
pub use registry::{HandlerRegistry, PayloadDecoder};
pub use wire::EventFrame;

use thiserror::Error;

/// Errors from the message-passing layer. Fatal: any rank failing a
/// collective or a send aborts the distributed run.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Destination rank outside `0..size`.
    #[error("rank {rank} out of range for a communicator of size {size}")]
    UnknownRank {
        /// The offending rank.
        rank: u32,
        /// Communicator size.
        size: u32,
    },

    /// A peer went away mid-run.
    #[error("transport disconnected")]
    Disconnected,

    /// An inbound frame was shorter than its fixed header.
    #[error("event frame too short: {len} bytes")]
    FrameTooShort {
        /// Received length.
        len: usize,
    },

    /// A frame arrived at a rank it was not addressed to.
    #[error("frame addressed to rank {dest} arrived at rank {rank}")]
    Misrouted {
        /// Address in the frame header.
        dest: u32,
        /// Receiving rank.
        rank: u32,
    },
}

/// Message-passing primitives the coordinator requires of a backend.
///
/// Implementations must be usable from the coordinator thread and from
/// worker threads concurrently: sends happen inside event payloads while the
/// coordinator owns receives and collectives.
pub trait Transport: Send + Sync {
    /// This process's rank, in `0..size`.
    fn rank(&self) -> u32;

    /// Number of ranks in the communicator.
    fn size(&self) -> u32;

    /// Non-blocking point-to-point send of one frame.
    fn send(&self, dest: u32, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Drain one currently-available inbound frame, if any. Never blocks.
    fn try_recv(&self) -> Result<Option<Vec<u8>>, TransportError>;

    /// Reclaim completed send buffers. A no-op for backends that transfer
    /// ownership on send.
    fn test_send_complete(&self) {}

    /// Blocking collective: every rank contributes one record and receives
    /// all of them, indexed by rank.
    fn all_gather(&self, record: LbtsRecord) -> Result<Vec<LbtsRecord>, TransportError>;

    /// Blocking barrier across all ranks.
    fn barrier(&self) -> Result<(), TransportError>;
}
