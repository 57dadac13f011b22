//! Compare replica selection strategies on the same workload
//!
//! Runs one client against a pool of replicas with uneven service times, once per
//! strategy, and prints latency percentiles. A final run enables backpressure with
//! both admission policies.
//!
//! Run with: cargo run --package des-replica --example replica_selection_demo
//! Set RUST_LOG=des_replica=debug to see dispatch and admission decisions.

use des_core::async_runtime::DesRuntime;
use des_core::dists::{ExponentialDistribution, PoissonArrivals};
use des_core::{init_simulation_logging, Executor, Monitor, SimTime, Simulation};
use des_replica::config::{AdmissionPolicy, ClientConfig, TokenBucketConfig};
use des_replica::{Client, ReplicaId, ReplicaServer, SelectionStrategy, Workload};
use std::time::Duration;

const REQUESTS: u64 = 2_000;
const ARRIVAL_RATE: f64 = 900.0;
/// Mean service time of each replica. The last one is a straggler.
const SERVICE_MS: [u64; 5] = [4, 4, 4, 4, 12];

struct Outcome {
    label: String,
    latencies: Vec<f64>,
    shadow_reads: u64,
}

fn run(label: String, config: ClientConfig) -> Result<Outcome, Box<dyn std::error::Error>> {
    let mut sim = Simulation::default();
    let runtime = DesRuntime::install(&mut sim);
    let mut pool = Vec::new();
    for (i, ms) in SERVICE_MS.iter().enumerate() {
        let service = ExponentialDistribution::with_mean(Duration::from_millis(*ms), 1 + i as u64)?;
        pool.push(ReplicaServer::new(ReplicaId(i), 2, Box::new(service)).install(&mut sim));
    }

    let client = Client::new("client-0", config, pool, &runtime, sim.clock())?;
    let workload = Workload::new(
        vec![client.clone()],
        Box::new(PoissonArrivals::new(ARRIVAL_RATE, 99)?),
        REQUESTS,
        Monitor::new("latency"),
    );
    let handle = workload.start(&runtime, sim.clock());

    // Refill tasks keep token-bucket runs alive, so bound every run in time
    sim.execute(Executor::timed(SimTime::from_secs(4)));

    Ok(Outcome {
        label,
        latencies: handle.latency().values("client-0"),
        shadow_reads: client.shadow_reads_sent(),
    })
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let rank = ((sorted.len() - 1) as f64 * p).round() as usize;
    sorted[rank]
}

fn report(outcome: &Outcome) {
    let mut sorted = outcome.latencies.clone();
    sorted.sort_by(f64::total_cmp);
    let mean = sorted.iter().sum::<f64>() / sorted.len().max(1) as f64;
    println!(
        "{:<32} n={:<5} mean={:>7.2}ms p50={:>7.2}ms p99={:>7.2}ms shadow={}",
        outcome.label,
        sorted.len(),
        mean * 1e3,
        percentile(&sorted, 0.5) * 1e3,
        percentile(&sorted, 0.99) * 1e3,
        outcome.shadow_reads,
    );
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_simulation_logging();

    println!("=== Replica Selection Strategies ===");
    println!("{} replicas, service means {:?} ms, {} req/s\n", SERVICE_MS.len(), SERVICE_MS, ARRIVAL_RATE);

    for strategy in SelectionStrategy::ALL {
        let config = ClientConfig::builder()
            .strategy(strategy)
            .replication_factor(3)
            .build()?;
        report(&run(strategy.to_string(), config)?);
    }

    println!("\n=== Shadow reads and backpressure (expDelay) ===");
    let shadowed = ClientConfig::builder().shadow_read_ratio(0.1).build()?;
    report(&run("expDelay + 10% shadow reads".to_string(), shadowed)?);

    for policy in [AdmissionPolicy::TokenBucket, AdmissionPolicy::AdaptiveThreshold] {
        let config = ClientConfig::builder()
            .backpressure(true)
            .admission(policy)
            .initial_threshold(4.0)
            .token_bucket(TokenBucketConfig {
                refill_epsilon: Duration::from_micros(10),
                ..TokenBucketConfig::default()
            })
            .build()?;
        report(&run(format!("expDelay + {policy}"), config)?);
    }

    Ok(())
}
