//! ferromv command-line interface.
//!
//! Multiply a matrix file by a vector file on a group of workers:
//! ```sh
//! ferromv vec.txt mat.txt --workers 4 --output Result.txt
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use ferromv::kernel::{self, Problem};
use ferromv::{io, launch, logging, KernelConfig, Schedule};

#[derive(Parser)]
#[command(name = "ferromv")]
#[command(about = "Row-partitioned distributed matrix-vector multiplication")]
#[command(version)]
struct Cli {
    /// Vector file; its length is the dimension.
    vector: PathBuf,
    /// Row-major matrix file with at least dim² values.
    matrix: PathBuf,
    /// Number of workers (must divide the dimension).
    #[arg(short, long, env = "FERROMV_WORKERS")]
    workers: Option<usize>,
    /// Row schedule inside each worker: sequential or parallel.
    #[arg(short, long, env = "FERROMV_SCHEDULE")]
    schedule: Option<Schedule>,
    /// Threads per worker for the parallel schedule.
    #[arg(long, env = "FERROMV_LOCAL_THREADS")]
    local_threads: Option<usize>,
    /// Where the coordinator writes the result.
    #[arg(short, long, default_value = "Result.txt")]
    output: PathBuf,
    /// Log level used when RUST_LOG and FERROMV_LOG are unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level)?;

    let defaults = KernelConfig::from_env();
    let config = KernelConfig {
        workers: cli.workers.unwrap_or(defaults.workers),
        schedule: cli.schedule.unwrap_or(defaults.schedule),
        local_threads: cli.local_threads.or(defaults.local_threads),
    };
    config.validate()?;
    tracing::info!(
        workers = config.workers,
        schedule = %config.schedule,
        vector = %cli.vector.display(),
        matrix = %cli.matrix.display(),
        "starting"
    );

    let reports = launch(config.workers, |group| {
        let problem = if group.is_coordinator() {
            Some(load_problem(&cli.vector, &cli.matrix))
        } else {
            None
        }
        .transpose();
        let problem = group.confirm(problem)?;
        let report = kernel::run(group, problem, &config)?;
        if let Some(report) = &report {
            group.confirm(io::write_result(&cli.output, &report.result))?;
        } else {
            group.confirm(Ok(()))?;
        }
        Ok(report)
    })
    .context("matrix-vector run failed")?;

    let report = reports
        .into_iter()
        .next()
        .flatten()
        .context("coordinator returned no result")?;
    println!(
        "Wrote {} values to {} ({} workers, slowest worker {:.6} s)",
        report.result.len(),
        cli.output.display(),
        report.workers,
        report.slowest.as_secs_f64()
    );
    Ok(())
}

fn load_problem(vector: &Path, matrix: &Path) -> ferromv::Result<Problem> {
    let vector = io::load_vector(vector)?;
    let matrix = io::load_matrix(matrix, vector.len())?;
    Ok(Problem { vector, matrix })
}
