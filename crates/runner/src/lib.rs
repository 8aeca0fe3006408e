//! The hybrid simulation coordinator.
//!
//! [`HybridRunner`] ties the engine together for one rank: it partitions the
//! topology into logical processes, migrates pre-run events into them, then
//! drives the granted-time-window loop — drain the transport, contribute to
//! the LBTS all-gather, derive the global window, and dispatch one round of
//! event execution whenever no transient messages are in flight.
//!
//! One runner exists per OS process. Multi-threaded single-process runs use
//! the same loop over a size-one transport.

mod config;
mod runner;
mod shim;

pub use config::{ConfigError, SimulatorConfig, SimulatorConfigBuilder, SimulatorKind};
pub use runner::HybridRunner;
pub use shim::TransportShim;

use lockstep_core::ScheduleError;
use lockstep_runtime::RuntimeError;
use lockstep_topology::PartitionError;
use lockstep_transport::TransportError;
use thiserror::Error;

/// Any fatal condition that aborts a run.
///
/// There is no local recovery: a rank returning one of these stops
/// participating in the collectives, which the peers observe as a transport
/// failure of their own.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Partition(#[from] PartitionError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl RunError {
    /// Process exit code for the CLI: distinct codes per failure class.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::Config(_) => 1,
            RunError::Schedule(_) => 2,
            RunError::Partition(_) => 3,
            RunError::Transport(_) => 4,
            RunError::Runtime(_) => 5,
        }
    }
}
