//! Single-rank runs over the null transport: basic rounds, partitioning,
//! stop semantics and single-thread determinism.

use lockstep_core::{ScheduleContext, SchedulerKind, SimTime};
use lockstep_runner::{HybridRunner, RunError, SimulatorConfig, SimulatorKind};
use lockstep_topology::Topology;
use lockstep_transport::NullTransport;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing_test::traced_test;

fn config(max_threads: usize, lookahead: SimTime) -> SimulatorConfig {
    SimulatorConfig::builder()
        .max_threads(max_threads)
        .min_lookahead(lookahead)
        .build()
        .unwrap()
}

fn runner(config: SimulatorConfig, topology: Topology) -> HybridRunner {
    HybridRunner::new(config, topology, Box::new(NullTransport::new())).unwrap()
}

/// One node, events at t = 1, 2, 3 ms: all execute in order, the LP clock
/// ends at 3 ms and termination is immediate afterwards.
#[test]
fn test_single_lp_three_events() {
    let mut topo = Topology::new();
    let node = topo.add_node(0);

    let mut runner = runner(config(4, SimTime::from_millis(1)), topo);
    let trace = Arc::new(Mutex::new(Vec::new()));
    for ms in [1i64, 2, 3] {
        let trace = trace.clone();
        runner
            .schedule_with_context(
                node,
                SimTime::from_millis(ms),
                Box::new(move |ctx| {
                    trace.lock().push(ctx.now().as_millis());
                    Ok(())
                }),
            )
            .unwrap();
    }

    runner.run().unwrap();

    assert_eq!(*trace.lock(), vec![1, 2, 3]);
    assert_eq!(runner.event_count(), 3);
    assert!(runner.is_finished());

    let lp = runner.topology().system_id(node).lp() as u32;
    assert_eq!(lp, 1, "single local node lands on LP 1");
    assert_eq!(
        runner.runtime().lp(lp).unwrap().now(),
        SimTime::from_millis(3)
    );
}

/// Two nodes on a 2 ms link with a 1 ms lookahead partition into two LPs.
/// An initialization event on A schedules onto B across the cut; B executes
/// it at t = 2 ms and the per-LP traffic counters record the crossing.
#[test]
fn test_two_lps_cross_schedule() {
    let mut topo = Topology::new();
    let a = topo.add_node(0);
    let b = topo.add_node(0);
    topo.connect(a, b, SimTime::from_millis(2));

    let mut runner = runner(config(2, SimTime::from_millis(1)), topo);
    let executed_at = Arc::new(AtomicU64::new(0));
    let executed_at2 = executed_at.clone();
    let b_ctx = b.0;
    runner
        .schedule_with_context(
            a,
            SimTime::ZERO,
            Box::new(move |ctx| {
                let executed_at = executed_at2.clone();
                ctx.schedule_with_context(
                    b_ctx,
                    SimTime::from_millis(2),
                    Box::new(move |ctx| {
                        executed_at.store(ctx.now().as_millis() as u64, Ordering::SeqCst);
                        Ok(())
                    }),
                )?;
                Ok(())
            }),
        )
        .unwrap();

    runner.run().unwrap();

    assert_eq!(executed_at.load(Ordering::SeqCst), 2, "B executes at t=2ms");
    assert_eq!(runner.event_count(), 2);
    assert!(runner.is_finished());

    let lp_a = runner.topology().system_id(a).lp() as u32;
    let lp_b = runner.topology().system_id(b).lp() as u32;
    assert_ne!(lp_a, lp_b, "the 2ms link is a partition cut");
    assert_eq!(runner.runtime().lp(lp_a).unwrap().tx_count(), 1);
    assert_eq!(runner.runtime().lp(lp_b).unwrap().rx_count(), 1);
}

/// With the zero "auto" sentinel, the partitioner picks the median of the
/// local point-to-point delays.
#[test]
#[traced_test]
fn test_auto_lookahead_median() {
    let mut topo = Topology::new();
    let nodes: Vec<_> = (0..6).map(|_| topo.add_node(0)).collect();
    for (i, ms) in [1i64, 3, 5, 9, 100].iter().enumerate() {
        topo.connect(nodes[i], nodes[i + 1], SimTime::from_millis(*ms));
    }

    let mut runner = runner(config(2, SimTime::ZERO), topo);
    runner.run().unwrap();
    assert_eq!(runner.min_lookahead(), SimTime::from_millis(5));
    assert!(logs_contain("minimum lookahead set to local median"));
}

/// A scheduled stop halts execution at its timestamp; later events stay
/// unexecuted and the run still terminates.
#[test]
fn test_stop_after() {
    let mut runner = runner(config(1, SimTime::from_millis(1)), Topology::new());
    let fired = Arc::new(AtomicU64::new(0));
    for ms in 1..=10i64 {
        let fired = fired.clone();
        runner
            .schedule(
                SimTime::from_millis(ms),
                Box::new(move |_| {
                    fired.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .unwrap();
    }
    runner.stop_after(SimTime::from_millis(5)).unwrap();

    runner.run().unwrap();

    assert_eq!(fired.load(Ordering::SeqCst), 5, "events past the stop never run");
    assert!(runner.is_finished());
    assert_eq!(runner.runtime().lp(0).unwrap().now(), SimTime::from_millis(5));
}

/// Negative delays are rejected up front.
#[test]
fn test_negative_delay_rejected() {
    let mut runner = runner(config(1, SimTime::from_millis(1)), Topology::new());
    assert!(runner
        .schedule(SimTime::from_millis(-3), Box::new(|_| Ok(())))
        .is_err());
}

/// Cancelled events are skipped; removal of unknown ids is a no-op.
#[test]
fn test_cancel_and_remove() {
    let mut runner = runner(config(1, SimTime::from_millis(1)), Topology::new());
    let fired = Arc::new(AtomicU64::new(0));
    let fired2 = fired.clone();
    let id = runner
        .schedule(
            SimTime::from_millis(1),
            Box::new(move |_| {
                fired2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .unwrap();

    assert!(!runner.is_expired(&id));
    assert_eq!(runner.delay_left(&id), SimTime::from_millis(1));

    runner.cancel(&id);
    assert!(runner.is_expired(&id));
    assert_eq!(runner.delay_left(&id), SimTime::ZERO);

    // Removing after cancellation, and removing twice, are both no-ops.
    runner.remove(&id);
    runner.remove(&id);

    runner.run().unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert_eq!(runner.event_count(), 0);
}

/// Destroy events run only at teardown, in insertion order.
#[test]
fn test_destroy_queue() {
    let mut runner = runner(config(1, SimTime::from_millis(1)), Topology::new());
    let order = Arc::new(Mutex::new(Vec::new()));
    for tag in 0..3u32 {
        let order = order.clone();
        runner.schedule_destroy(Box::new(move |_| {
            order.lock().push(tag);
            Ok(())
        }));
    }

    runner.run().unwrap();
    assert!(order.lock().is_empty(), "nothing fires before destroy()");

    runner.destroy().unwrap();
    assert_eq!(*order.lock(), vec![0, 1, 2]);
}

/// A lookahead violation inside a round aborts the run with the matching
/// error.
#[test]
fn test_lookahead_violation_aborts_run() {
    let mut topo = Topology::new();
    let a = topo.add_node(0);
    let b = topo.add_node(0);
    topo.connect(a, b, SimTime::from_millis(10));

    let mut runner = runner(config(1, SimTime::from_millis(5)), topo);
    let b_ctx = b.0;
    runner
        .schedule_with_context(
            a,
            SimTime::from_millis(1),
            Box::new(move |ctx| {
                // 2ms across a 5ms-lookahead cut: fatal.
                ctx.schedule_with_context(b_ctx, SimTime::from_millis(2), Box::new(|_| Ok(())))?;
                Ok(())
            }),
        )
        .unwrap();

    let err = runner.run().unwrap_err();
    assert!(matches!(err, RunError::Schedule(_)));
    assert_eq!(err.exit_code(), 2);
}

/// Ping-pong across two LPs on one worker thread, traced as
/// (lp, timestamp) pairs.
fn traced_ping_pong(scheduler: SchedulerKind) -> Vec<(u32, i64)> {
    let mut topo = Topology::new();
    let a = topo.add_node(0);
    let b = topo.add_node(0);
    topo.connect(a, b, SimTime::from_millis(10));

    let config = SimulatorConfig::builder()
        .max_threads(1)
        .min_lookahead(SimTime::from_millis(5))
        .scheduler(scheduler)
        .kind(SimulatorKind::Multithreaded)
        .build()
        .unwrap();
    let mut runner = HybridRunner::new(config, topo, Box::new(NullTransport::new())).unwrap();

    type Trace = Arc<Mutex<Vec<(u32, i64)>>>;
    fn ping(trace: Trace, to: u32, from: u32, depth: u32) -> lockstep_core::EventPayload {
        Box::new(move |ctx| {
            trace.lock().push((ctx.lp(), ctx.now().as_millis()));
            if depth > 0 {
                ctx.schedule_with_context(
                    to,
                    SimTime::from_millis(10),
                    ping(trace.clone(), from, to, depth - 1),
                )?;
            }
            Ok(())
        })
    }

    let trace: Trace = Arc::new(Mutex::new(Vec::new()));
    runner
        .schedule_with_context(
            a,
            SimTime::from_millis(1),
            ping(trace.clone(), b.0, a.0, 6),
        )
        .unwrap();

    runner.run().unwrap();
    let result = trace.lock().clone();
    result
}

/// With one OS process and one worker thread, two identical runs produce
/// identical event sequences.
#[test]
fn test_single_thread_determinism() {
    let first = traced_ping_pong(SchedulerKind::Heap);
    let second = traced_ping_pong(SchedulerKind::Heap);
    assert_eq!(first, second);
    assert_eq!(first.len(), 7, "initial event plus six hops");

    // The LP clock never moves backwards between executions (per LP).
    for lp in first.iter().map(|(lp, _)| *lp).collect::<std::collections::BTreeSet<_>>() {
        let times: Vec<i64> = first
            .iter()
            .filter(|(l, _)| *l == lp)
            .map(|(_, t)| *t)
            .collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]), "now regressed on LP {lp}");
    }
}

/// The event sequence is independent of the scheduler backend.
#[test]
fn test_scheduler_backends_agree() {
    let heap = traced_ping_pong(SchedulerKind::Heap);
    let map = traced_ping_pong(SchedulerKind::Map);
    let calendar = traced_ping_pong(SchedulerKind::Calendar);
    assert_eq!(heap, map);
    assert_eq!(heap, calendar);
}
