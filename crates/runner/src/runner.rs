//! The per-rank run loop.

use crate::{ConfigError, RunError, SimulatorConfig, SimulatorKind, TransportShim};
use lockstep_core::{EventId, EventPayload, ScheduleError, SimTime, NO_CONTEXT};
use lockstep_runtime::LpRuntime;
use lockstep_topology::{auto_lookahead, label_partitions, NodeId, Topology};
use lockstep_transport::{LbtsRecord, PayloadDecoder, Transport};
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Route-table entry marking a node owned by a remote rank.
const REMOTE: u32 = u32::MAX;

/// The coordination core of one rank: partitioner, dispatcher and the
/// granted-time-window loop.
///
/// Driver code builds a [`Topology`], schedules initial events against its
/// nodes, then calls [`run`](HybridRunner::run). Partitioning happens inside
/// `run`, once; the topology is immutable afterwards.
pub struct HybridRunner {
    config: SimulatorConfig,
    topology: Topology,
    runtime: LpRuntime,
    shim: Arc<TransportShim>,
    rank: u16,
    min_lookahead: SimTime,
    global_finished: bool,
}

impl HybridRunner {
    /// Create a runner for this rank over the given transport.
    pub fn new(
        config: SimulatorConfig,
        topology: Topology,
        transport: Box<dyn Transport>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if config.kind == SimulatorKind::Multithreaded && transport.size() != 1 {
            return Err(ConfigError::InvalidConfig(format!(
                "multithreaded runs are single-rank, got a communicator of size {}",
                transport.size()
            )));
        }
        if transport.size() > u16::MAX as u32 {
            return Err(ConfigError::InvalidConfig(format!(
                "communicator size {} does not fit the 16-bit rank field",
                transport.size()
            )));
        }
        let rank = transport.rank() as u16;
        let runtime = LpRuntime::new(config.scheduler);
        let min_lookahead = config.min_lookahead;
        Ok(Self {
            config,
            topology,
            runtime,
            shim: Arc::new(TransportShim::new(transport)),
            rank,
            min_lookahead,
            global_finished: false,
        })
    }

    /// This process's rank.
    pub fn rank(&self) -> u16 {
        self.rank
    }

    /// The transport shim, cloneable into event payloads that send
    /// cross-rank messages.
    pub fn shim(&self) -> &Arc<TransportShim> {
        &self.shim
    }

    /// The LP registry, for inspection.
    pub fn runtime(&self) -> &LpRuntime {
        &self.runtime
    }

    /// The topology, for inspection.
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Minimum lookahead in force (resolved from the auto median once
    /// partitioning has run).
    pub fn min_lookahead(&self) -> SimTime {
        self.min_lookahead
    }

    /// Register a decoder for inbound cross-rank events.
    pub fn register_handler(&self, handler: u32, decoder: PayloadDecoder) {
        self.shim.register_handler(handler, decoder);
    }

    /// Simulated time as seen from the coordinator thread (the staging LP's
    /// clock; per-LP clocks advance independently during rounds).
    pub fn now(&self) -> SimTime {
        self.runtime.lp(0).map(|lp| lp.now()).unwrap_or(SimTime::ZERO)
    }

    /// Total events executed across this rank's LPs.
    pub fn event_count(&self) -> u64 {
        self.runtime.event_count()
    }

    /// True once the whole distributed run has terminated.
    pub fn is_finished(&self) -> bool {
        self.global_finished
    }

    /// Schedule a context-free event `delay` after the staging clock.
    pub fn schedule(
        &mut self,
        delay: SimTime,
        payload: EventPayload,
    ) -> Result<EventId, ScheduleError> {
        self.runtime.schedule_staging(delay, NO_CONTEXT, payload)
    }

    /// Schedule a context-free event at the current time.
    pub fn schedule_now(&mut self, payload: EventPayload) -> Result<EventId, ScheduleError> {
        self.schedule(SimTime::ZERO, payload)
    }

    /// Schedule an event against a node. Events for nodes owned by other
    /// ranks are dropped: every rank runs the same driver code and keeps
    /// only its own slice of the schedule.
    pub fn schedule_with_context(
        &mut self,
        node: NodeId,
        delay: SimTime,
        payload: EventPayload,
    ) -> Result<(), ScheduleError> {
        if !self.topology.is_local(node, self.rank) {
            debug!(node = node.0, "dropping schedule for a remote node");
            return Ok(());
        }
        self.runtime
            .schedule_staging(delay, node.0, payload)
            .map(|_| ())
    }

    /// Append a teardown event to the destroy queue, drained by
    /// [`destroy`](HybridRunner::destroy).
    pub fn schedule_destroy(&self, payload: EventPayload) -> EventId {
        self.runtime.schedule_destroy(payload)
    }

    /// Request every LP of this rank to stop executing events.
    pub fn stop(&self) {
        self.runtime.stop_all();
    }

    /// Schedule a stop at `now + delay`.
    pub fn stop_after(&mut self, delay: SimTime) -> Result<EventId, ScheduleError> {
        self.schedule(
            delay,
            Box::new(|ctx| {
                ctx.stop();
                Ok(())
            }),
        )
    }

    /// Cancel an event: it stays queued but is skipped at execution.
    pub fn cancel(&self, id: &EventId) {
        id.cancel();
    }

    /// True if the event has executed, been removed, or been cancelled.
    pub fn is_expired(&self, id: &EventId) -> bool {
        id.is_expired()
    }

    /// Physically remove an event. Unknown ids are a no-op.
    pub fn remove(&mut self, id: &EventId) {
        self.runtime.remove(id);
    }

    /// Time until the event fires, zero if expired.
    pub fn delay_left(&self, id: &EventId) -> SimTime {
        if self.is_expired(id) {
            SimTime::ZERO
        } else {
            id.ts() - self.now()
        }
    }

    /// Partition the topology, then drive the granted-time-window loop to
    /// global termination.
    pub fn run(&mut self) -> Result<(), RunError> {
        self.partition()?;
        self.runtime.run_before()?;

        let rank = self.shim.rank();
        // The effective round granularity: with a zero lookahead (isolated
        // partitions) the window still opens one tick past the global
        // minimum, which is what lets the minimum event execute.
        let granularity = self.min_lookahead.max(SimTime::TICK);

        self.global_finished = false;
        while !self.global_finished {
            self.shim.receive_messages(&self.runtime)?;
            self.shim.test_send_complete();

            let (rx_count, tx_count) = self.shim.counters();
            let mine = LbtsRecord {
                smallest_time: self.runtime.calculate_smallest_time(),
                rx_count,
                tx_count,
                rank,
                finished: self.runtime.is_finished(),
            };
            let all = self.shim.all_gather(mine)?;

            let mut global_min = SimTime::MAX;
            let mut tot_rx: u64 = 0;
            let mut tot_tx: u64 = 0;
            let mut all_done = true;
            for record in &all {
                global_min = global_min.min(record.smallest_time);
                tot_rx += record.rx_count as u64;
                tot_tx += record.tx_count as u64;
                all_done &= record.finished;
            }

            let grant = global_min.saturating_add(granularity);
            self.runtime.set_granted_time(grant);

            // tot_rx == tot_tx means no transient messages: nothing already
            // sent could still arrive below the grant.
            self.global_finished = all_done && tot_rx == tot_tx;
            trace!(
                grant = %grant,
                tot_rx,
                tot_tx,
                all_done,
                "window advanced"
            );

            if !self.global_finished && tot_rx == tot_tx && !self.runtime.is_finished() {
                self.runtime.process_one_round()?;
            }
        }

        self.runtime.run_after();
        info!(
            rank,
            events = self.runtime.event_count(),
            "run terminated"
        );
        Ok(())
    }

    /// Drain the destroy queue and synchronize teardown across ranks.
    pub fn destroy(&mut self) -> Result<(), RunError> {
        self.runtime.destroy()?;
        self.shim.barrier()?;
        Ok(())
    }

    /// Derive the lookahead, label the topology, allocate LPs and migrate
    /// the staged schedule into them.
    fn partition(&mut self) -> Result<(), RunError> {
        if self.config.min_lookahead == SimTime::ZERO {
            self.min_lookahead = auto_lookahead(&self.topology, self.rank);
            info!(lookahead = %self.min_lookahead, "minimum lookahead set to local median");
        } else {
            self.min_lookahead = self.config.min_lookahead;
        }

        let lp_count = label_partitions(&mut self.topology, self.rank, self.min_lookahead)?;
        let threads = self.config.max_threads.min(lp_count.max(1) as usize);
        info!(
            rank = self.rank,
            partitions = lp_count,
            threads,
            "partition done"
        );

        self.runtime.enable_new(threads, lp_count);
        self.runtime.set_min_lookahead(self.min_lookahead);

        let mut table = vec![REMOTE; self.topology.node_count()];
        for node in self.topology.node_ids() {
            let system_id = self.topology.system_id(node);
            if system_id.rank() == self.rank {
                table[node.0 as usize] = system_id.lp() as u32;
            }
        }
        self.runtime.set_route_table(table);

        // Migrate the staged schedule. Initialization events (t=0) run
        // immediately, in insertion order: simulator setup code has order
        // dependencies that cannot be executed in parallel. Anything they
        // schedule goes through the normal path.
        for event in self.runtime.take_staging_events() {
            if event.ts() == SimTime::ZERO {
                let lp = if event.context() == NO_CONTEXT {
                    0
                } else {
                    self.runtime.route(event.context())?
                };
                self.runtime.invoke_now(lp, event)?;
            } else if event.context() == NO_CONTEXT {
                self.runtime.migrate_local(0, event);
            } else {
                self.runtime.stage_migrated(event)?;
            }
        }
        Ok(())
    }
}
