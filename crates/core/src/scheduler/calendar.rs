//! Calendar-queue scheduler backend.

use super::Scheduler;
use crate::{Event, EventId, EventKey};

const INITIAL_BUCKETS: usize = 16;
const INITIAL_WIDTH: i64 = 1_000_000; // 1ms in ticks

/// Scheduler backed by a calendar queue: events hash into day buckets by
/// `timestamp / width`, each bucket kept sorted.
///
/// Insertions are O(1) amortized when the width tracks the average event
/// spacing; the bucket count doubles (and the width is re-estimated) when
/// the load factor exceeds two. Dequeue scans bucket heads, which stays
/// cheap because buckets are short under that policy.
pub struct CalendarScheduler {
    buckets: Vec<Vec<Event>>,
    width: i64,
    size: usize,
}

impl CalendarScheduler {
    pub fn new() -> Self {
        Self {
            buckets: (0..INITIAL_BUCKETS).map(|_| Vec::new()).collect(),
            width: INITIAL_WIDTH,
            size: 0,
        }
    }

    fn bucket_of(&self, key: EventKey) -> usize {
        let day = key.ts.ticks() / self.width;
        (day as u64 % self.buckets.len() as u64) as usize
    }

    fn push_sorted(bucket: &mut Vec<Event>, event: Event) {
        let at = bucket.partition_point(|e| e.key() < event.key());
        bucket.insert(at, event);
    }

    /// Index of the bucket holding the globally smallest key.
    fn min_bucket(&self) -> Option<usize> {
        let mut best: Option<(EventKey, usize)> = None;
        for (i, bucket) in self.buckets.iter().enumerate() {
            if let Some(event) = bucket.first() {
                let key = event.key();
                match best {
                    Some((bk, _)) if bk <= key => {}
                    _ => best = Some((key, i)),
                }
            }
        }
        best.map(|(_, i)| i)
    }

    /// Double the bucket count and re-estimate the width from the observed
    /// event span, then redistribute.
    fn grow(&mut self) {
        let events: Vec<Event> = self.buckets.iter_mut().flat_map(std::mem::take).collect();

        let (mut lo, mut hi) = (i64::MAX, i64::MIN);
        for event in &events {
            lo = lo.min(event.ts().ticks());
            hi = hi.max(event.ts().ticks());
        }
        if !events.is_empty() {
            self.width = ((hi - lo) / events.len() as i64).max(1);
        }

        let count = self.buckets.len() * 2;
        self.buckets = (0..count).map(|_| Vec::new()).collect();
        for event in events {
            let idx = self.bucket_of(event.key());
            Self::push_sorted(&mut self.buckets[idx], event);
        }
    }
}

impl Default for CalendarScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for CalendarScheduler {
    fn insert(&mut self, event: Event) {
        if self.size > self.buckets.len() * 2 {
            self.grow();
        }
        let idx = self.bucket_of(event.key());
        Self::push_sorted(&mut self.buckets[idx], event);
        self.size += 1;
    }

    fn peek_next(&self) -> Option<EventKey> {
        self.min_bucket()
            .and_then(|i| self.buckets[i].first())
            .map(Event::key)
    }

    fn remove_next(&mut self) -> Option<Event> {
        let i = self.min_bucket()?;
        let event = self.buckets[i].remove(0);
        self.size -= 1;
        Some(event)
    }

    fn remove(&mut self, id: &EventId) -> Option<Event> {
        let idx = self.bucket_of(id.key());
        let bucket = &mut self.buckets[idx];
        let at = bucket.iter().position(|e| e.matches(id))?;
        self.size -= 1;
        Some(bucket.remove(at))
    }

    fn is_empty(&self) -> bool {
        self.size == 0
    }

    fn len(&self) -> usize {
        self.size
    }
}
