//! Multi-rank runs over the in-process transport: cross-rank event flow,
//! transient-message safety and global conservation.

use lockstep_core::{ScheduleContext, SimTime};
use lockstep_runner::{HybridRunner, SimulatorConfig, SimulatorKind};
use lockstep_topology::{NodeId, Topology};
use lockstep_transport_memory::MemoryTransport;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;

const PACKET_HANDLER: u32 = 1;

fn hybrid_config(lookahead_ms: i64) -> SimulatorConfig {
    SimulatorConfig::builder()
        .max_threads(2)
        .min_lookahead(SimTime::from_millis(lookahead_ms))
        .kind(SimulatorKind::Hybrid)
        .build()
        .unwrap()
}

/// Run the same driver closure on every rank of an in-process cluster.
fn run_ranks<R, F>(size: u32, driver: F) -> Vec<R>
where
    R: Send + 'static,
    F: Fn(u32, MemoryTransport) -> R + Send + Sync + 'static,
{
    let driver = Arc::new(driver);
    let handles: Vec<_> = MemoryTransport::cluster(size)
        .into_iter()
        .enumerate()
        .map(|(rank, transport)| {
            let driver = Arc::clone(&driver);
            thread::spawn(move || driver(rank as u32, transport))
        })
        .collect();
    handles
        .into_iter()
        .map(|handle| handle.join().expect("rank thread panicked"))
        .collect()
}

/// The dumbbell: four left leaves and a router on rank 0, a router and four
/// right leaves on rank 1. Leaf links 2 ms, router link 5 ms.
///
/// ```text
/// n0..n3 --- n4 ===== n5 --- n6..n9
///  rank 0    (5ms)     rank 1
/// ```
struct Dumbbell {
    topo: Topology,
    left: Vec<NodeId>,
    router0: NodeId,
    router1: NodeId,
    right: Vec<NodeId>,
}

fn dumbbell() -> Dumbbell {
    let mut topo = Topology::new();
    let left: Vec<_> = (0..4).map(|_| topo.add_node(0)).collect();
    let router0 = topo.add_node(0);
    let router1 = topo.add_node(1);
    let right: Vec<_> = (0..4).map(|_| topo.add_node(1)).collect();

    for &leaf in &left {
        topo.connect(leaf, router0, SimTime::from_millis(2));
    }
    topo.connect(router0, router1, SimTime::from_millis(5));
    for &leaf in &right {
        topo.connect(router1, leaf, SimTime::from_millis(2));
    }

    Dumbbell {
        topo,
        left,
        router0,
        router1,
        right,
    }
}

struct RankReport {
    rx: u32,
    tx: u32,
    events: u64,
    sinks: Vec<u32>,
    sink_times_ms: Vec<i64>,
}

/// One 512-byte burst per left leaf at t = 1 s crosses the rank boundary
/// and lands in exactly one right-side sink; traffic counters balance
/// globally and the run terminates well before t = 5 s.
#[test]
fn test_dumbbell_one_packet_per_flow() {
    let reports = run_ranks(2, |_, transport| {
        let net = dumbbell();
        let Dumbbell {
            topo,
            left,
            router0,
            router1,
            right,
        } = net;

        let mut runner =
            HybridRunner::new(hybrid_config(5), topo, Box::new(transport)).unwrap();
        let sinks: Arc<Vec<AtomicU32>> = Arc::new((0..4).map(|_| AtomicU32::new(0)).collect());
        let sink_times: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));

        // Same driver code on both ranks: the decoder forwards an arriving
        // packet from the router to its sink leaf, two milliseconds away.
        {
            let sinks = sinks.clone();
            let sink_times = sink_times.clone();
            let right = right.clone();
            runner.register_handler(
                PACKET_HANDLER,
                Box::new(move |_context, bytes| {
                    let flow = bytes[0] as usize;
                    let sinks = sinks.clone();
                    let sink_times = sink_times.clone();
                    let leaf = right[flow].0;
                    Box::new(move |ctx| {
                        ctx.schedule_with_context(
                            leaf,
                            SimTime::from_millis(2),
                            Box::new(move |ctx| {
                                sinks[flow].fetch_add(1, Ordering::SeqCst);
                                sink_times.lock().push(ctx.now().as_millis());
                                Ok(())
                            }),
                        )?;
                        Ok(())
                    })
                }),
            );
        }

        // One flow per left leaf. Remote-node schedules are dropped, so
        // this loop is a no-op on rank 1.
        for (flow, &leaf) in left.iter().enumerate() {
            let shim = runner.shim().clone();
            let router_ctx = router0.0;
            let remote_router = router1.0;
            runner
                .schedule_with_context(
                    leaf,
                    SimTime::from_secs(1),
                    Box::new(move |ctx| {
                        let shim = shim.clone();
                        ctx.schedule_with_context(
                            router_ctx,
                            SimTime::from_millis(2),
                            Box::new(move |ctx| {
                                let mut packet = vec![0u8; 512];
                                packet[0] = flow as u8;
                                shim.send_event(
                                    1,
                                    PACKET_HANDLER,
                                    remote_router,
                                    ctx.now(),
                                    SimTime::from_millis(5),
                                    packet,
                                )
                                .expect("router link send");
                                Ok(())
                            }),
                        )?;
                        Ok(())
                    }),
                )
                .unwrap();
        }

        runner.run().unwrap();

        let (rx, tx) = runner.shim().counters();
        let sink_times_ms = sink_times.lock().clone();
        RankReport {
            rx,
            tx,
            events: runner.event_count(),
            sinks: sinks.iter().map(|c| c.load(Ordering::SeqCst)).collect(),
            sink_times_ms,
        }
    });

    let [rank0, rank1] = &reports[..] else {
        panic!("expected two rank reports");
    };

    assert_eq!(rank0.tx, 4, "one wire message per flow");
    assert_eq!(rank0.rx, 0);
    assert_eq!(rank1.rx, 4);
    assert_eq!(rank1.tx, 0);
    assert_eq!(
        rank0.tx + rank1.tx,
        rank0.rx + rank1.rx,
        "global conservation at termination"
    );

    assert_eq!(rank1.sinks, vec![1, 1, 1, 1], "each sink got exactly one packet");
    assert_eq!(rank0.sinks, vec![0, 0, 0, 0]);
    for &t in &rank1.sink_times_ms {
        assert_eq!(t, 1009, "1s start + 2ms leaf + 5ms router + 2ms leaf");
    }

    // leaf send + router hop per flow on rank 0; router arrival + sink per
    // flow on rank 1.
    assert_eq!(rank0.events, 8);
    assert_eq!(rank1.events, 8);
}

/// A message sent right at the window edge must be drained before any
/// later local event on the receiving rank executes: the t = 16 ms check
/// on rank 1 always observes the flag set by the t = 15 ms arrival.
#[test]
fn test_transient_message_ordering() {
    const FLAG_HANDLER: u32 = 2;

    let traces = run_ranks(2, |rank, transport| {
        let mut topo = Topology::new();
        let a = topo.add_node(0);
        let b = topo.add_node(1);
        topo.connect(a, b, SimTime::from_millis(5));

        let mut runner =
            HybridRunner::new(hybrid_config(5), topo, Box::new(transport)).unwrap();
        let flag = Arc::new(AtomicBool::new(false));
        let trace: Arc<Mutex<Vec<(i64, bool)>>> = Arc::new(Mutex::new(Vec::new()));

        {
            let flag = flag.clone();
            let trace = trace.clone();
            runner.register_handler(
                FLAG_HANDLER,
                Box::new(move |_context, _bytes| {
                    let flag = flag.clone();
                    let trace = trace.clone();
                    Box::new(move |ctx| {
                        flag.store(true, Ordering::SeqCst);
                        trace.lock().push((ctx.now().as_millis(), true));
                        Ok(())
                    })
                }),
            );
        }

        // Sender on rank 0: fires at t=10ms, arrival at t=15ms.
        let shim = runner.shim().clone();
        let b_ctx = b.0;
        runner
            .schedule_with_context(
                a,
                SimTime::from_millis(10),
                Box::new(move |ctx| {
                    shim.send_event(
                        1,
                        FLAG_HANDLER,
                        b_ctx,
                        ctx.now(),
                        SimTime::from_millis(5),
                        Vec::new(),
                    )
                    .expect("boundary link send");
                    Ok(())
                }),
            )
            .unwrap();

        // Checker on rank 1: one tick after the earliest possible arrival.
        {
            let flag = flag.clone();
            let trace = trace.clone();
            runner
                .schedule_with_context(
                    b,
                    SimTime::from_millis(16),
                    Box::new(move |ctx| {
                        trace
                            .lock()
                            .push((ctx.now().as_millis(), flag.load(Ordering::SeqCst)));
                        Ok(())
                    }),
                )
                .unwrap();
        }

        runner.run().unwrap();
        let (rx, tx) = runner.shim().counters();
        let trace_out = trace.lock().clone();
        (rank, rx, tx, trace_out)
    });

    let rank0 = traces.iter().find(|t| t.0 == 0).unwrap();
    let rank1 = traces.iter().find(|t| t.0 == 1).unwrap();

    assert_eq!((rank0.1, rank0.2), (0, 1));
    assert_eq!((rank1.1, rank1.2), (1, 0));
    assert_eq!(
        rank1.3,
        vec![(15, true), (16, true)],
        "the arrival executes first and the checker sees its flag"
    );
}

/// A rank with no work of its own still participates in the window
/// protocol until every rank is done.
#[test]
fn test_idle_rank_waits_for_peers() {
    let counts = run_ranks(2, |_, transport| {
        let mut topo = Topology::new();
        let a = topo.add_node(0);
        let _b = topo.add_node(1);

        let mut runner =
            HybridRunner::new(hybrid_config(5), topo, Box::new(transport)).unwrap();
        // Only rank 0 has events.
        for ms in [1i64, 4, 9] {
            runner
                .schedule_with_context(a, SimTime::from_millis(ms), Box::new(|_| Ok(())))
                .unwrap();
        }
        runner.run().unwrap();
        runner.destroy().unwrap();
        runner.event_count()
    });

    assert_eq!(counts, vec![3, 0]);
}
