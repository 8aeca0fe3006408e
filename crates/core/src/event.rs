//! Scheduled events and their handles.

use crate::{ScheduleContext, ScheduleError, SimTime};
use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};

/// Context value meaning "not tied to any node".
pub const NO_CONTEXT: u32 = u32::MAX;

/// Uid marking destroy-queue entries, which fire once at teardown.
pub const DESTROY_UID: u64 = u64::MAX;

/// The callback carried by an event. Invoked at most once, with the
/// scheduling capability of the logical process executing it.
pub type EventPayload = Box<dyn FnOnce(&mut dyn ScheduleContext) -> Result<(), ScheduleError> + Send>;

/// Key for ordering events within one logical process.
///
/// Events are ordered by:
/// 1. Timestamp (earlier first)
/// 2. Sequence number (FIFO for the same timestamp)
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct EventKey {
    /// When this event should execute.
    pub ts: SimTime,
    /// Insertion sequence, monotonic within the owning LP.
    pub sequence: u64,
}

impl Ord for EventKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.ts.cmp(&other.ts) {
            Ordering::Equal => self.sequence.cmp(&other.sequence),
            ord => ord,
        }
    }
}

impl PartialOrd for EventKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Shared cancellation flag between an [`Event`] and its [`EventId`]s.
#[derive(Debug, Default)]
struct CancelFlag(AtomicBool);

/// A scheduled callback: timestamp, context, sequence, cancellation flag and
/// a payload invocable once.
///
/// Owned by the scheduler it lives in. On execution, ownership moves to the
/// worker invoking the payload and the event is dropped afterwards; dropping
/// the event is what expires its outstanding [`EventId`]s.
pub struct Event {
    key: EventKey,
    context: u32,
    uid: u64,
    flag: Arc<CancelFlag>,
    payload: EventPayload,
}

impl Event {
    /// Create an event executing at `ts` with the given per-LP sequence.
    pub fn new(ts: SimTime, sequence: u64, context: u32, payload: EventPayload) -> Self {
        Event {
            key: EventKey { ts, sequence },
            context,
            uid: sequence,
            flag: Arc::new(CancelFlag::default()),
            payload,
        }
    }

    /// Create a destroy-queue entry (uid [`DESTROY_UID`], timestamp past any
    /// grantable window).
    pub fn destroy(sequence: u64, payload: EventPayload) -> Self {
        Event {
            key: EventKey {
                ts: SimTime::max_simulation_time(),
                sequence,
            },
            context: NO_CONTEXT,
            uid: DESTROY_UID,
            flag: Arc::new(CancelFlag::default()),
            payload,
        }
    }

    /// Ordering key of this event.
    pub fn key(&self) -> EventKey {
        self.key
    }

    /// Timestamp at which this event executes.
    pub fn ts(&self) -> SimTime {
        self.key.ts
    }

    /// Node context of this event, or [`NO_CONTEXT`].
    pub fn context(&self) -> u32 {
        self.context
    }

    /// True once [`EventId::cancel`] has been called on a handle.
    pub fn is_cancelled(&self) -> bool {
        self.flag.0.load(AtomicOrdering::Acquire)
    }

    /// Obtain a handle for cancellation, removal and expiry queries.
    pub fn id(&self) -> EventId {
        EventId {
            key: self.key,
            context: self.context,
            uid: self.uid,
            flag: Arc::downgrade(&self.flag),
        }
    }

    /// True if `id` refers to this event.
    pub fn matches(&self, id: &EventId) -> bool {
        self.key == id.key && self.uid == id.uid
    }

    /// Re-key the event into another LP's sequence space, keeping timestamp,
    /// context, payload and the cancellation flag.
    ///
    /// Used when an event changes owner (inbox drain, migration). Handles
    /// issued before the move keep cancelling and expiring correctly through
    /// the shared flag; only physical removal stops matching.
    pub fn rekeyed(mut self, sequence: u64) -> Event {
        self.key.sequence = sequence;
        self.uid = sequence;
        self
    }

    /// Consume the event and run its payload.
    ///
    /// The caller is responsible for skipping cancelled events; invoking a
    /// cancelled event is a logic error guarded in debug builds.
    pub fn invoke(self, ctx: &mut dyn ScheduleContext) -> Result<(), ScheduleError> {
        debug_assert!(!self.is_cancelled(), "cancelled event invoked");
        (self.payload)(ctx)
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("ts", &self.key.ts)
            .field("sequence", &self.key.sequence)
            .field("context", &self.context)
            .field("uid", &self.uid)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Handle to a scheduled event.
///
/// Holds a weak reference to the event's cancellation flag: once the event
/// has executed or been removed (its owning `Arc` dropped), the handle
/// reports expired. Cloneable and freely shareable across threads.
#[derive(Debug, Clone)]
pub struct EventId {
    key: EventKey,
    context: u32,
    uid: u64,
    flag: Weak<CancelFlag>,
}

impl EventId {
    /// Ordering key of the referenced event.
    pub fn key(&self) -> EventKey {
        self.key
    }

    /// Timestamp of the referenced event.
    pub fn ts(&self) -> SimTime {
        self.key.ts
    }

    /// Node context of the referenced event.
    pub fn context(&self) -> u32 {
        self.context
    }

    /// Uid of the referenced event ([`DESTROY_UID`] for destroy entries).
    pub fn uid(&self) -> u64 {
        self.uid
    }

    /// True for handles to destroy-queue entries.
    pub fn is_destroy(&self) -> bool {
        self.uid == DESTROY_UID
    }

    /// Flip the cancellation flag. The event stays queued; the executing LP
    /// skips it when it surfaces. Expired handles are a no-op.
    pub fn cancel(&self) {
        if let Some(flag) = self.flag.upgrade() {
            flag.0.store(true, AtomicOrdering::Release);
        }
    }

    /// True if the event has executed, been removed, or been cancelled.
    pub fn is_expired(&self) -> bool {
        match self.flag.upgrade() {
            Some(flag) => flag.0.load(AtomicOrdering::Acquire),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> EventPayload {
        Box::new(|_| Ok(()))
    }

    #[test]
    fn test_event_key_ordering() {
        let earlier = EventKey {
            ts: SimTime::from_millis(1),
            sequence: 9,
        };
        let later = EventKey {
            ts: SimTime::from_millis(2),
            sequence: 1,
        };
        assert!(earlier < later, "timestamp dominates sequence");

        let first = EventKey {
            ts: SimTime::from_millis(1),
            sequence: 1,
        };
        assert!(first < earlier, "sequence breaks timestamp ties");
    }

    #[test]
    fn test_cancel_through_handle() {
        let ev = Event::new(SimTime::from_millis(1), 0, NO_CONTEXT, noop());
        let id = ev.id();
        assert!(!ev.is_cancelled());
        assert!(!id.is_expired());

        id.cancel();
        assert!(ev.is_cancelled());
        assert!(id.is_expired(), "cancelled events report expired");
    }

    #[test]
    fn test_drop_expires_handle() {
        let ev = Event::new(SimTime::from_millis(1), 0, NO_CONTEXT, noop());
        let id = ev.id();
        drop(ev);
        assert!(id.is_expired());
        // Cancel after expiry must not panic.
        id.cancel();
    }

    #[test]
    fn test_destroy_uid() {
        let ev = Event::destroy(3, noop());
        assert!(ev.id().is_destroy());
        assert_eq!(ev.ts(), SimTime::max_simulation_time());
    }
}
