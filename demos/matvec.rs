//! In-memory distributed matrix-vector product checked against the
//! sequential reference.
//!
//! Run with: cargo run --release --example matvec -- 1024 8

use ferromv::kernel::{self, Problem};
use ferromv::{launch, logging, KernelConfig, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn main() -> Result<()> {
    logging::init("info")?;

    let mut args = std::env::args().skip(1);
    let dim: usize = args.next().and_then(|s| s.parse().ok()).unwrap_or(512);
    let workers: usize = args.next().and_then(|s| s.parse().ok()).unwrap_or(4);

    let mut rng = StdRng::seed_from_u64(42);
    let vector: Vec<f64> = (0..dim).map(|_| rng.random_range(-1.0..1.0)).collect();
    let matrix: Vec<f64> = (0..dim * dim).map(|_| rng.random_range(-1.0..1.0)).collect();
    let expected = kernel::matvec(&matrix, &vector)?;

    let config = KernelConfig {
        workers,
        ..KernelConfig::from_env()
    };
    config.validate()?;

    let reports = launch(config.workers, |group| {
        let problem = group.is_coordinator().then(|| Problem {
            vector: vector.clone(),
            matrix: matrix.clone(),
        });
        kernel::run(group, problem, &config)
    })?;

    if let Some(report) = reports.into_iter().next().flatten() {
        let identical = report
            .result
            .iter()
            .zip(&expected)
            .all(|(a, b)| a.to_bits() == b.to_bits());
        println!(
            "dim {dim} on {} workers ({} schedule): slowest worker {:.6}s, \
             matches reference: {identical}",
            report.workers,
            config.schedule,
            report.slowest.as_secs_f64()
        );
        assert!(identical, "distributed result differs from the reference");
    }
    Ok(())
}
