//! lockstep-sim CLI
//!
//! Drives the two-rank dumbbell scenario with configurable parameters.
//!
//! # Example
//!
//! ```bash
//! # Default run: 4 flows, 5ms trunk lookahead, stop at t=5s
//! lockstep-sim
//!
//! # More flows, auto lookahead, calendar scheduler
//! lockstep-sim -f 16 --lookahead-ms 0 -S calendar --seed 7
//! ```

use clap::Parser;
use lockstep_core::{SchedulerKind, SimTime};
use lockstep_simulator::{run_dumbbell, ScenarioConfig};
use tracing_subscriber::EnvFilter;

/// Hybrid parallel simulation of a two-rank dumbbell network.
#[derive(Parser, Debug)]
#[command(name = "lockstep-sim")]
#[command(version, about, long_about = None)]
struct Args {
    /// Number of leaf pairs (one packet flow each)
    #[arg(short = 'f', long, default_value = "4")]
    flows: usize,

    /// Simulated stop time in seconds
    #[arg(short = 'd', long, default_value = "5")]
    stop_secs: i64,

    /// Minimum lookahead in milliseconds; 0 selects the auto median
    #[arg(long, default_value = "5")]
    lookahead_ms: i64,

    /// Worker threads per rank
    #[arg(short = 't', long, default_value = "2")]
    max_threads: usize,

    /// Per-LP scheduler backend (heap, map or calendar)
    #[arg(short = 'S', long, default_value = "heap")]
    scheduler: String,

    /// Seed for the flow start jitter. When omitted, a random seed is used.
    #[arg(long)]
    seed: Option<u64>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,lockstep_simulator=info")),
        )
        .init();

    let args = Args::parse();

    let scheduler: SchedulerKind = match args.scheduler.parse() {
        Ok(kind) => kind,
        Err(message) => {
            eprintln!("error: {message}");
            std::process::exit(1);
        }
    };
    let seed = args.seed.unwrap_or_else(rand::random);

    let config = ScenarioConfig {
        flows: args.flows,
        stop: SimTime::from_secs(args.stop_secs),
        min_lookahead: SimTime::from_millis(args.lookahead_ms),
        max_threads: args.max_threads,
        scheduler,
        seed,
    };
    println!(
        "Running {} flows (seed {seed}, scheduler {scheduler}, lookahead {}ms)",
        config.flows, args.lookahead_ms
    );

    match run_dumbbell(config) {
        Ok(report) => {
            report.print_summary();
            if !report.is_clean(args.flows) {
                eprintln!("error: lost packets or unbalanced traffic counters");
                std::process::exit(1);
            }
        }
        Err(error) => {
            eprintln!("error: {error}");
            std::process::exit(error.exit_code());
        }
    }
}
