//! Core types for the lockstep simulation engine.
//!
//! This crate provides the foundational pieces shared by every other crate:
//!
//! - [`SimTime`]: simulated time as a signed 64-bit tick count
//! - [`Event`], [`EventKey`], [`EventId`]: a scheduled callback and its handle
//! - [`Scheduler`]: the per-LP priority queue contract, with heap, map and
//!   calendar backends selected through [`SchedulerKind`]
//! - [`ScheduleContext`]: the capability an executing event payload receives
//!   to schedule further work
//!
//! # Architecture
//!
//! Events are **invocable once**: a payload is a boxed `FnOnce` that consumes
//! itself when the owning logical process executes it. Payloads never touch
//! scheduler state directly; they go through a [`ScheduleContext`] handed to
//! them by the dispatcher, which enforces delay validity and the cross-LP
//! lookahead bound.

mod event;
mod time;

pub mod scheduler;

pub use event::{Event, EventId, EventKey, EventPayload, DESTROY_UID, NO_CONTEXT};
pub use scheduler::{Scheduler, SchedulerKind};
pub use time::SimTime;

use thiserror::Error;

/// Errors raised while scheduling an event.
///
/// Every variant is fatal to the run: simulation correctness is not defined
/// past any of them, so they propagate out of the round loop and abort the
/// coordinator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// A negative delay was supplied.
    #[error("negative delay {0} supplied to schedule")]
    InvalidDelay(SimTime),

    /// A cross-LP event was scheduled closer than the partition lookahead.
    #[error("cross-LP event scheduled with delay {delay}, below the minimum lookahead {lookahead}")]
    LookaheadViolation {
        /// The offending delay.
        delay: SimTime,
        /// The minimum lookahead derived at partition time.
        lookahead: SimTime,
    },

    /// An event was scheduled with the context of a node owned by another rank.
    ///
    /// Remote events travel through the transport shim, never through the
    /// local scheduling path.
    #[error("context {context} belongs to a remote rank; use the transport shim")]
    NotLocal {
        /// The offending context node id.
        context: u32,
    },
}

/// The capability handed to an executing event payload.
///
/// Implemented by the runtime's per-LP execution context. All scheduling done
/// from inside a payload goes through this trait, which pins the payload to
/// the clock of the logical process executing it.
pub trait ScheduleContext {
    /// Current simulated time of the executing logical process.
    fn now(&self) -> SimTime;

    /// Context (node id) of the event currently executing, or [`NO_CONTEXT`].
    fn context(&self) -> u32;

    /// Local id of the executing logical process.
    fn lp(&self) -> u32;

    /// Schedule `payload` on the executing LP at `now + delay`.
    fn schedule(&mut self, delay: SimTime, payload: EventPayload)
        -> Result<EventId, ScheduleError>;

    /// Schedule `payload` against a node context, routing to the LP that owns
    /// the node. Cross-LP schedules must respect the minimum lookahead and
    /// return no handle; same-LP schedules behave like
    /// [`schedule`](ScheduleContext::schedule).
    fn schedule_with_context(
        &mut self,
        context: u32,
        delay: SimTime,
        payload: EventPayload,
    ) -> Result<(), ScheduleError>;

    /// Schedule `payload` at the current time on the executing LP.
    fn schedule_now(&mut self, payload: EventPayload) -> Result<EventId, ScheduleError> {
        self.schedule(SimTime::ZERO, payload)
    }

    /// Append a teardown event to the process-wide destroy queue.
    fn schedule_destroy(&mut self, payload: EventPayload) -> EventId;

    /// Physically remove an event from the executing LP's scheduler (or the
    /// destroy queue for destroy events). Unknown ids are a no-op.
    fn remove(&mut self, id: &EventId);

    /// Request every logical process of this rank to stop executing events.
    fn stop(&mut self);
}
