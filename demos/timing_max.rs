//! Per-worker timing with a deliberately unbalanced workload.
//!
//! Workers synchronise on a barrier, then worker `k` spins for `(k + 1)`
//! units of work. The coordinator reports the minimum and maximum elapsed
//! time: the maximum is the run time of the whole group.
//!
//! Run with: cargo run --release --example timing_max -- 4

use std::hint::black_box;
use std::time::Instant;

use ferromv::{launch, logging, ReduceOp, Result, WorkerGroup};

const UNIT: u64 = 10_000_000;

fn main() -> Result<()> {
    logging::init("warn")?;

    let workers: usize = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(4);

    let times = launch(workers, |group| {
        group.barrier()?;
        let start = Instant::now();

        let mut dummy = 0.0f64;
        for i in 0..(group.rank() as u64 + 1) * UNIT {
            dummy += black_box(i as f64 * 1e-7);
        }
        black_box(dummy);

        let elapsed = start.elapsed().as_secs_f64();
        let slowest = group.reduce_scalar(elapsed, ReduceOp::Max, WorkerGroup::COORDINATOR)?;
        let fastest = group.reduce_scalar(elapsed, ReduceOp::Min, WorkerGroup::COORDINATOR)?;

        if let (Some(slowest), Some(fastest)) = (slowest, fastest) {
            println!("Workers: {}", group.size());
            println!("  Min time: {fastest:.4}s");
            println!("  Max time: {slowest:.4}s");
        }
        Ok(elapsed)
    })?;

    for (rank, t) in times.iter().enumerate() {
        println!("  worker {rank}: {t:.4}s");
    }
    Ok(())
}
