//! Per-LP event schedulers.
//!
//! A scheduler is a priority queue ordered by [`EventKey`] (timestamp, then
//! sequence). All scheduler state is private to one logical process; the
//! dispatcher never touches it across threads. The backing structure is
//! pluggable through [`SchedulerKind`], and the dispatcher depends only on
//! the [`Scheduler`] trait.

mod calendar;
mod heap;
mod map;

pub use calendar::CalendarScheduler;
pub use heap::HeapScheduler;
pub use map::MapScheduler;

use crate::{Event, EventId, EventKey};
use std::fmt;
use std::str::FromStr;

/// Priority queue of events ordered by (timestamp, sequence).
pub trait Scheduler: Send {
    /// Insert an event. Keys are unique within one LP because sequences are
    /// monotonic.
    fn insert(&mut self, event: Event);

    /// Key of the earliest event, if any.
    fn peek_next(&self) -> Option<EventKey>;

    /// Remove and return the earliest event.
    fn remove_next(&mut self) -> Option<Event>;

    /// Physically remove the event referenced by `id`.
    ///
    /// Returns the removed event, or `None` when the id is unknown — an
    /// idempotent no-op, not an error.
    fn remove(&mut self, id: &EventId) -> Option<Event>;

    /// True when no events are queued.
    fn is_empty(&self) -> bool;

    /// Number of queued events.
    fn len(&self) -> usize;
}

/// Selects the scheduler backend used by every logical process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerKind {
    /// Binary heap; the default.
    #[default]
    Heap,
    /// Ordered map (B-tree).
    Map,
    /// Calendar queue with bucket rotation.
    Calendar,
}

impl SchedulerKind {
    /// Instantiate an empty scheduler of this kind.
    pub fn create(self) -> Box<dyn Scheduler> {
        match self {
            SchedulerKind::Heap => Box::new(HeapScheduler::new()),
            SchedulerKind::Map => Box::new(MapScheduler::new()),
            SchedulerKind::Calendar => Box::new(CalendarScheduler::new()),
        }
    }
}

impl FromStr for SchedulerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "heap" => Ok(SchedulerKind::Heap),
            "map" => Ok(SchedulerKind::Map),
            "calendar" => Ok(SchedulerKind::Calendar),
            other => Err(format!(
                "unknown scheduler type {other:?} (expected heap, map or calendar)"
            )),
        }
    }
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SchedulerKind::Heap => "heap",
            SchedulerKind::Map => "map",
            SchedulerKind::Calendar => "calendar",
        };
        f.write_str(name)
    }
}
