//! A single logical process and its execution context.

use crate::current;
use crate::dispatcher::RuntimeShared;
use lockstep_core::{
    Event, EventId, EventPayload, ScheduleContext, ScheduleError, Scheduler, SimTime, NO_CONTEXT,
};

/// One logical process: an independent event stream with its own clock,
/// scheduler and statistics.
pub struct LogicalProcess {
    local_id: u32,
    now: SimTime,
    executing_context: u32,
    scheduler: Box<dyn Scheduler>,
    next_sequence: u64,
    event_count: u64,
    rx_count: u64,
    tx_count: u64,
}

impl LogicalProcess {
    pub(crate) fn new(local_id: u32, scheduler: Box<dyn Scheduler>) -> Self {
        Self {
            local_id,
            now: SimTime::ZERO,
            executing_context: NO_CONTEXT,
            scheduler,
            next_sequence: 0,
            event_count: 0,
            rx_count: 0,
            tx_count: 0,
        }
    }

    /// Local id of this LP (0 is the staging LP).
    pub fn local_id(&self) -> u32 {
        self.local_id
    }

    /// Current simulated time; never exceeds the granted window.
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Number of events this LP has executed.
    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    /// Cross-LP events drained from this LP's inbox.
    pub fn rx_count(&self) -> u64 {
        self.rx_count
    }

    /// Cross-LP events this LP staged into other inboxes.
    pub fn tx_count(&self) -> u64 {
        self.tx_count
    }

    /// Insert an event at an absolute timestamp, assigning the next sequence.
    pub(crate) fn insert_at(&mut self, ts: SimTime, context: u32, payload: EventPayload) -> EventId {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let event = Event::new(ts, sequence, context, payload);
        let id = event.id();
        self.scheduler.insert(event);
        id
    }

    /// Adopt an event created elsewhere (inbox drain, migration), re-keying
    /// it into this LP's sequence space. Its timestamp is already absolute.
    pub(crate) fn insert_event(&mut self, event: Event) -> EventId {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let event = event.rekeyed(sequence);
        let id = event.id();
        self.scheduler.insert(event);
        id
    }

    /// Physically remove an event from this LP's scheduler. Unknown ids are
    /// a no-op.
    pub(crate) fn remove(&mut self, id: &EventId) {
        self.scheduler.remove(id);
    }

    /// Move staged inbox events into the scheduler.
    pub(crate) fn drain_inbox(&mut self, shared: &RuntimeShared) {
        let staged = {
            let mut inbox = shared.inbox(self.local_id).lock();
            std::mem::take(&mut *inbox)
        };
        for event in staged {
            self.rx_count += 1;
            self.insert_event(event);
        }
    }

    /// Earliest timestamp this LP could still execute: the scheduler head or
    /// a staged inbox event, whichever is smaller. A stopped LP reports
    /// [`SimTime::MAX`] so it never holds back the global window.
    pub(crate) fn next_event_time(&self, shared: &RuntimeShared) -> SimTime {
        if shared.stop_requested(self.local_id) {
            return SimTime::MAX;
        }
        let head = self
            .scheduler
            .peek_next()
            .map(|key| key.ts)
            .unwrap_or(SimTime::MAX);
        let staged = shared
            .inbox(self.local_id)
            .lock()
            .iter()
            .map(Event::ts)
            .min()
            .unwrap_or(SimTime::MAX);
        head.min(staged)
    }

    /// True when this LP has no more work: stopped, or both scheduler and
    /// inbox are empty.
    pub(crate) fn is_finished(&self, shared: &RuntimeShared) -> bool {
        shared.stop_requested(self.local_id)
            || (self.scheduler.is_empty() && shared.inbox(self.local_id).lock().is_empty())
    }

    /// Drain the inbox, then execute every event below `grant`, advancing
    /// the local clock as each one fires. Cancelled events are skipped
    /// silently; a set stop flag exits at the next check.
    pub(crate) fn process_one_round(
        &mut self,
        grant: SimTime,
        shared: &RuntimeShared,
    ) -> Result<(), ScheduleError> {
        self.drain_inbox(shared);

        loop {
            if shared.stop_requested(self.local_id) {
                break;
            }
            let due = matches!(self.scheduler.peek_next(), Some(key) if key.ts < grant);
            if !due {
                break;
            }
            let Some(event) = self.scheduler.remove_next() else {
                break;
            };

            debug_assert!(event.ts() >= self.now, "event timestamp behind LP clock");
            self.now = event.ts();
            if event.is_cancelled() {
                continue;
            }

            self.event_count += 1;
            self.executing_context = event.context();
            let mut ctx = LpContext { lp: self, shared };
            event.invoke(&mut ctx)?;
            self.executing_context = NO_CONTEXT;
        }
        Ok(())
    }

    /// Execute an event immediately, without scheduling and without touching
    /// the clock. Used only while migrating initialization events, whose
    /// insertion order must be preserved.
    pub(crate) fn invoke_now(
        &mut self,
        event: Event,
        shared: &RuntimeShared,
    ) -> Result<(), ScheduleError> {
        if event.is_cancelled() {
            return Ok(());
        }
        self.event_count += 1;
        self.executing_context = event.context();
        let mut ctx = LpContext { lp: self, shared };
        event.invoke(&mut ctx)?;
        self.executing_context = NO_CONTEXT;
        Ok(())
    }

    /// Replace the scheduler backend, transferring pending events in order.
    pub(crate) fn replace_scheduler(&mut self, mut scheduler: Box<dyn Scheduler>) {
        while let Some(event) = self.scheduler.remove_next() {
            scheduler.insert(event);
        }
        self.scheduler = scheduler;
    }

    /// Drain every pending event in (timestamp, sequence) order.
    pub(crate) fn drain_all(&mut self) -> Vec<Event> {
        let mut events = Vec::with_capacity(self.scheduler.len());
        while let Some(event) = self.scheduler.remove_next() {
            events.push(event);
        }
        events
    }
}

/// The scheduling capability handed to an executing payload: a mutable view
/// of the executing LP plus the shared structures needed for cross-LP
/// staging.
pub struct LpContext<'a> {
    pub(crate) lp: &'a mut LogicalProcess,
    pub(crate) shared: &'a RuntimeShared,
}

impl ScheduleContext for LpContext<'_> {
    fn now(&self) -> SimTime {
        self.lp.now
    }

    fn context(&self) -> u32 {
        self.lp.executing_context
    }

    fn lp(&self) -> u32 {
        debug_assert_eq!(current::current_lp(), Some(self.lp.local_id));
        self.lp.local_id
    }

    fn schedule(&mut self, delay: SimTime, payload: EventPayload)
        -> Result<EventId, ScheduleError> {
        if delay.is_negative() {
            return Err(ScheduleError::InvalidDelay(delay));
        }
        let context = self.lp.executing_context;
        Ok(self.lp.insert_at(self.lp.now + delay, context, payload))
    }

    fn schedule_with_context(
        &mut self,
        context: u32,
        delay: SimTime,
        payload: EventPayload,
    ) -> Result<(), ScheduleError> {
        if delay.is_negative() {
            return Err(ScheduleError::InvalidDelay(delay));
        }
        let target = if context == NO_CONTEXT {
            self.lp.local_id
        } else {
            self.shared.route(context)?
        };

        if target == self.lp.local_id {
            self.lp.insert_at(self.lp.now + delay, context, payload);
            return Ok(());
        }

        // Crossing an LP boundary: the partition guarantees every cut link
        // carries at least the minimum lookahead, so a closer schedule is a
        // model error and the run is not recoverable.
        let lookahead = self.shared.min_lookahead();
        if delay < lookahead {
            return Err(ScheduleError::LookaheadViolation { delay, lookahead });
        }

        self.lp.tx_count += 1;
        self.shared
            .stage(target, Event::new(self.lp.now + delay, 0, context, payload));
        Ok(())
    }

    fn schedule_destroy(&mut self, payload: EventPayload) -> EventId {
        self.shared.schedule_destroy(payload)
    }

    fn remove(&mut self, id: &EventId) {
        if id.is_destroy() {
            self.shared.remove_destroy(id);
        } else {
            self.lp.remove(id);
        }
    }

    fn stop(&mut self) {
        self.shared.stop_all();
    }
}
