//! Logical processes and the process-wide LP dispatcher.
//!
//! A [`LogicalProcess`] owns one scheduler and a local clock and executes its
//! own events strictly in (timestamp, sequence) order. The [`LpRuntime`]
//! registers every LP of this rank, fans rounds out to a fixed rayon worker
//! pool, and tracks the granted time window the coordinator derives from the
//! LBTS exchange.
//!
//! # Concurrency model
//!
//! - Scheduler state is private to its LP; at most one worker executes a
//!   given LP at a time (`par_iter_mut` hands out disjoint `&mut`).
//! - Cross-LP schedules stage the event in the target's inbox under a short
//!   mutex; the owner drains the inbox at its next round boundary.
//! - The destroy queue and the per-rank stop flags are the only other shared
//!   structures; the former sits behind the process-wide critical section,
//!   the latter are atomics checked at the top of each LP's round loop.

mod current;
mod dispatcher;
mod lp;

pub use current::current_lp;
pub use dispatcher::{CriticalSectionGuard, LpRuntime};
pub use lp::{LogicalProcess, LpContext};

use thiserror::Error;

/// Errors from runtime bring-up.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The rayon worker pool could not be constructed.
    #[error("failed to build worker pool: {0}")]
    PoolBuild(String),
}
