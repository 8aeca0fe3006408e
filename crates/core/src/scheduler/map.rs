//! Ordered-map scheduler backend.

use super::Scheduler;
use crate::{Event, EventId, EventKey};
use std::collections::BTreeMap;

/// Scheduler backed by a `BTreeMap<EventKey, Event>`.
///
/// Keys are unique within one LP (sequences are monotonic), so the map holds
/// exactly one event per key. O(log n) for every operation including removal
/// by id, which the heap backend cannot offer.
pub struct MapScheduler {
    events: BTreeMap<EventKey, Event>,
}

impl MapScheduler {
    pub fn new() -> Self {
        Self {
            events: BTreeMap::new(),
        }
    }
}

impl Default for MapScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for MapScheduler {
    fn insert(&mut self, event: Event) {
        let prev = self.events.insert(event.key(), event);
        debug_assert!(prev.is_none(), "duplicate event key inserted");
    }

    fn peek_next(&self) -> Option<EventKey> {
        self.events.keys().next().copied()
    }

    fn remove_next(&mut self) -> Option<Event> {
        self.events.pop_first().map(|(_, event)| event)
    }

    fn remove(&mut self, id: &EventId) -> Option<Event> {
        match self.events.get(&id.key()) {
            Some(event) if event.matches(id) => self.events.remove(&id.key()),
            _ => None,
        }
    }

    fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    fn len(&self) -> usize {
        self.events.len()
    }
}
