//! Strided parallel sum of `0..=n`.
//!
//! The coordinator picks `n` and broadcasts it. Worker `k` adds
//! `k, k + W, k + 2W, ...` up to `n`; the partial sums are reduced to the
//! coordinator together with the slowest worker's time.
//!
//! Run with: cargo run --release --example parallel_sum -- 100000000 4

use std::time::Instant;

use ferromv::{launch, logging, ReduceOp, Result, WorkerGroup};

fn main() -> Result<()> {
    logging::init("warn")?;

    let mut args = std::env::args().skip(1);
    let n: f64 = args.next().and_then(|s| s.parse().ok()).unwrap_or(1e7);
    let workers: usize = args.next().and_then(|s| s.parse().ok()).unwrap_or(4);

    launch(workers, |group| {
        let rank = group.rank();
        let size = group.size();

        let n = group.broadcast_scalar(if group.is_coordinator() { n } else { 0.0 }, 0)?;

        let start = Instant::now();
        let mut sum = 0.0;
        let mut i = rank as f64;
        while i <= n {
            sum += i;
            i += size as f64;
        }

        let total = group.reduce_scalar(sum, ReduceOp::Sum, WorkerGroup::COORDINATOR)?;
        let elapsed = start.elapsed().as_secs_f64();
        let slowest = group.reduce_scalar(elapsed, ReduceOp::Max, WorkerGroup::COORDINATOR)?;

        if let (Some(total), Some(slowest)) = (total, slowest) {
            let expected = n.floor() * (n.floor() + 1.0) / 2.0;
            println!("Sum of 0..={n} on {size} workers is {total}");
            println!("Elapsed time (max across workers): {slowest:.6} s");
            assert!(
                (total - expected).abs() <= expected * 1e-12,
                "sum {total} differs from closed form {expected}"
            );
        }
        Ok(())
    })?;

    Ok(())
}
