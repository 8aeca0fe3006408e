//! The process-wide LP registry and round dispatcher.

use crate::lp::LogicalProcess;
use crate::{current, RuntimeError};
use lockstep_core::{Event, EventId, EventPayload, ScheduleError, SchedulerKind, SimTime};
use parking_lot::{Mutex, MutexGuard};
use rayon::prelude::*;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Route-table entry marking a node owned by a remote rank.
const REMOTE: u32 = u32::MAX;

/// Process-wide FIFO of teardown events, drained once at shutdown.
struct DestroyQueue {
    events: VecDeque<Event>,
    next_sequence: u64,
}

/// Guard over the process-wide critical section.
///
/// Protects the destroy queue and whatever other process-wide structure a
/// caller needs serialized; LP interiors are never under it.
pub struct CriticalSectionGuard<'a> {
    _guard: MutexGuard<'a, DestroyQueue>,
}

/// State shared between the dispatcher and every worker: inboxes, stop
/// flags, routing, lookahead and the destroy queue.
pub(crate) struct RuntimeShared {
    inboxes: Vec<Mutex<Vec<Event>>>,
    stop_flags: Vec<AtomicBool>,
    context_to_lp: Vec<u32>,
    min_lookahead: SimTime,
    critical: Mutex<DestroyQueue>,
}

impl RuntimeShared {
    fn new() -> Self {
        Self {
            inboxes: vec![Mutex::new(Vec::new())],
            stop_flags: vec![AtomicBool::new(false)],
            context_to_lp: Vec::new(),
            min_lookahead: SimTime::ZERO,
            critical: Mutex::new(DestroyQueue {
                events: VecDeque::new(),
                next_sequence: 0,
            }),
        }
    }

    pub(crate) fn inbox(&self, lp: u32) -> &Mutex<Vec<Event>> {
        &self.inboxes[lp as usize]
    }

    pub(crate) fn stage(&self, lp: u32, event: Event) {
        self.inboxes[lp as usize].lock().push(event);
    }

    /// LP owning the node `context`. Before partitioning every context maps
    /// to the staging LP.
    pub(crate) fn route(&self, context: u32) -> Result<u32, ScheduleError> {
        if self.context_to_lp.is_empty() {
            return Ok(0);
        }
        match self.context_to_lp.get(context as usize) {
            Some(&lp) if lp != REMOTE => Ok(lp),
            _ => Err(ScheduleError::NotLocal { context }),
        }
    }

    pub(crate) fn min_lookahead(&self) -> SimTime {
        self.min_lookahead
    }

    pub(crate) fn stop_requested(&self, lp: u32) -> bool {
        self.stop_flags[lp as usize].load(Ordering::Acquire)
    }

    pub(crate) fn stop_all(&self) {
        for flag in &self.stop_flags {
            flag.store(true, Ordering::Release);
        }
    }

    pub(crate) fn schedule_destroy(&self, payload: EventPayload) -> EventId {
        let mut queue = self.critical.lock();
        let sequence = queue.next_sequence;
        queue.next_sequence += 1;
        let event = Event::destroy(sequence, payload);
        let id = event.id();
        queue.events.push_back(event);
        id
    }

    pub(crate) fn remove_destroy(&self, id: &EventId) {
        let mut queue = self.critical.lock();
        if let Some(at) = queue.events.iter().position(|e| e.matches(id)) {
            queue.events.remove(at);
        }
    }
}

/// Process-wide registry of logical processes and the worker pool that
/// executes their rounds.
///
/// LP 0 is reserved as the staging LP used before partitioning; partitioning
/// allocates LPs `1..=lp_count` via [`enable_new`](LpRuntime::enable_new).
pub struct LpRuntime {
    lps: Vec<LogicalProcess>,
    shared: RuntimeShared,
    pool: Option<rayon::ThreadPool>,
    thread_count: usize,
    scheduler_kind: SchedulerKind,
    granted: SimTime,
}

impl LpRuntime {
    /// Create a runtime holding only the staging LP.
    pub fn new(scheduler_kind: SchedulerKind) -> Self {
        Self {
            lps: vec![LogicalProcess::new(0, scheduler_kind.create())],
            shared: RuntimeShared::new(),
            pool: None,
            thread_count: 1,
            scheduler_kind,
            granted: SimTime::ZERO,
        }
    }

    /// Allocate LPs `1..=lp_count`, each with a fresh scheduler of the
    /// configured kind, and record the worker count for
    /// [`run_before`](LpRuntime::run_before).
    pub fn enable_new(&mut self, thread_count: usize, lp_count: u32) {
        debug_assert!(self.lps.len() == 1, "enable_new called twice");
        for id in 1..=lp_count {
            self.lps
                .push(LogicalProcess::new(id, self.scheduler_kind.create()));
            self.shared.inboxes.push(Mutex::new(Vec::new()));
            self.shared.stop_flags.push(AtomicBool::new(false));
        }
        self.thread_count = thread_count.max(1);
        debug!(
            lp_count,
            thread_count = self.thread_count,
            "logical processes allocated"
        );
    }

    /// Record the minimum lookahead the partitioner derived; enforced on
    /// every cross-LP schedule from here on.
    pub fn set_min_lookahead(&mut self, lookahead: SimTime) {
        self.shared.min_lookahead = lookahead;
    }

    /// Minimum lookahead currently enforced.
    pub fn min_lookahead(&self) -> SimTime {
        self.shared.min_lookahead
    }

    /// Install the node-to-LP routing table (`u32::MAX` marks remote nodes).
    pub fn set_route_table(&mut self, table: Vec<u32>) {
        self.shared.context_to_lp = table;
    }

    /// Spawn the worker pool. One-time setup hook called before the window
    /// loop starts.
    pub fn run_before(&mut self) -> Result<(), RuntimeError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.thread_count)
            .thread_name(|i| format!("lockstep-worker-{i}"))
            .build()
            .map_err(|e| RuntimeError::PoolBuild(e.to_string()))?;
        self.pool = Some(pool);
        Ok(())
    }

    /// Tear the worker pool down. Called after the window loop exits.
    pub fn run_after(&mut self) {
        self.pool = None;
        debug!(events = self.event_count(), "dispatcher drained");
    }

    /// Smallest timestamp any local LP could still execute, staged inbox
    /// events included. Single-threaded; called between rounds only.
    pub fn calculate_smallest_time(&self) -> SimTime {
        self.lps
            .iter()
            .map(|lp| lp.next_event_time(&self.shared))
            .min()
            .unwrap_or(SimTime::MAX)
    }

    /// Record the granted window bound for the next round.
    pub fn set_granted_time(&mut self, grant: SimTime) {
        self.granted = grant;
    }

    /// The granted window bound currently in force.
    pub fn granted_time(&self) -> SimTime {
        self.granted
    }

    /// Execute one round: every LP drains its inbox and runs its events
    /// below the granted bound, distinct LPs in parallel on the worker pool.
    ///
    /// A single LP is never executed by two workers at once; `par_iter_mut`
    /// hands each worker a disjoint `&mut`. With one worker the iteration
    /// degenerates to in-order sequential execution, which is what makes
    /// single-threaded runs deterministic.
    pub fn process_one_round(&mut self) -> Result<(), ScheduleError> {
        let grant = self.granted;
        let shared = &self.shared;
        let lps = &mut self.lps;
        let run = |lp: &mut LogicalProcess| {
            current::enter(lp.local_id());
            let result = lp.process_one_round(grant, shared);
            current::exit();
            result
        };
        match &self.pool {
            Some(pool) => pool.install(|| lps.par_iter_mut().try_for_each(run)),
            None => lps.iter_mut().try_for_each(run),
        }
    }

    /// True when every local LP is finished.
    pub fn is_finished(&self) -> bool {
        self.lps.iter().all(|lp| lp.is_finished(&self.shared))
    }

    /// Request every LP to stop executing events; each round loop exits at
    /// its next check.
    pub fn stop_all(&self) {
        self.shared.stop_all();
    }

    /// Total events executed across local LPs.
    pub fn event_count(&self) -> u64 {
        self.lps.iter().map(LogicalProcess::event_count).sum()
    }

    /// Number of LPs including the staging LP.
    pub fn lp_count(&self) -> usize {
        self.lps.len()
    }

    /// Borrow one LP for inspection.
    pub fn lp(&self, id: u32) -> Option<&LogicalProcess> {
        self.lps.get(id as usize)
    }

    /// Schedule onto the staging LP before partitioning (driver-facing
    /// schedule path).
    pub fn schedule_staging(
        &mut self,
        delay: SimTime,
        context: u32,
        payload: EventPayload,
    ) -> Result<EventId, ScheduleError> {
        if delay.is_negative() {
            return Err(ScheduleError::InvalidDelay(delay));
        }
        let lp = &mut self.lps[0];
        Ok(lp.insert_at(lp.now() + delay, context, payload))
    }

    /// Insert at an absolute timestamp on a specific LP. Migration path.
    pub fn insert_at(
        &mut self,
        lp: u32,
        ts: SimTime,
        context: u32,
        payload: EventPayload,
    ) -> EventId {
        self.lps[lp as usize].insert_at(ts, context, payload)
    }

    /// Stage an event carrying an absolute timestamp into the inbox of the
    /// LP owning `context`. Used by the transport shim.
    pub fn stage_event(
        &self,
        context: u32,
        ts: SimTime,
        payload: EventPayload,
    ) -> Result<(), ScheduleError> {
        self.stage_migrated(Event::new(ts, 0, context, payload))
    }

    /// Stage an existing event into the inbox of the LP owning its context,
    /// keeping its cancellation flag alive. Migration path.
    pub fn stage_migrated(&self, event: Event) -> Result<(), ScheduleError> {
        let target = self.shared.route(event.context())?;
        self.shared.stage(target, event);
        Ok(())
    }

    /// Adopt an existing event directly into an LP's scheduler. Migration
    /// path for context-free events.
    pub fn migrate_local(&mut self, lp: u32, event: Event) {
        self.lps[lp as usize].insert_event(event);
    }

    /// LP owning the node `context`, per the installed route table.
    pub fn route(&self, context: u32) -> Result<u32, ScheduleError> {
        self.shared.route(context)
    }

    /// Execute an event immediately on the given LP, outside any round.
    pub fn invoke_now(&mut self, lp: u32, event: Event) -> Result<(), ScheduleError> {
        let shared = &self.shared;
        current::enter(lp);
        let result = self.lps[lp as usize].invoke_now(event, shared);
        current::exit();
        result
    }

    /// Drain the staging LP's pending events in (timestamp, sequence) order.
    pub fn take_staging_events(&mut self) -> Vec<Event> {
        self.lps[0].drain_all()
    }

    /// Remove an event from the scheduler of the LP that owns it, or from
    /// the destroy queue for destroy events. Unknown ids are a no-op.
    pub fn remove(&mut self, id: &EventId) {
        if id.is_destroy() {
            self.shared.remove_destroy(id);
            return;
        }
        match self.shared.route(id.context()) {
            Ok(lp) => self.lps[lp as usize].remove(id),
            // Context-free events can sit on any LP; identity matching makes
            // the scan safe.
            Err(_) => {
                for lp in &mut self.lps {
                    lp.remove(id);
                }
            }
        }
    }

    /// Append a teardown event to the destroy queue.
    pub fn schedule_destroy(&self, payload: EventPayload) -> EventId {
        self.shared.schedule_destroy(payload)
    }

    /// Enter the process-wide critical section.
    pub fn critical_section(&self) -> CriticalSectionGuard<'_> {
        CriticalSectionGuard {
            _guard: self.shared.critical.lock(),
        }
    }

    /// Replace every LP's scheduler, transferring pending events in order.
    pub fn set_scheduler(&mut self, kind: SchedulerKind) {
        self.scheduler_kind = kind;
        for lp in &mut self.lps {
            lp.replace_scheduler(kind.create());
        }
    }

    /// Drain the destroy queue, invoking non-cancelled entries in insertion
    /// order on the staging LP. Called once at shutdown.
    pub fn destroy(&mut self) -> Result<(), ScheduleError> {
        loop {
            let event = {
                let mut queue = self.shared.critical.lock();
                queue.events.pop_front()
            };
            let Some(event) = event else { break };
            if event.is_cancelled() {
                continue;
            }
            self.invoke_now(0, event)?;
        }
        Ok(())
    }
}
