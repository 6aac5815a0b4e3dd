//! Distributed `y = A·x` over a [`WorkerGroup`].
//!
//! Every worker calls the same functions in the same order; only the
//! coordinator supplies the dimension, the vector and the matrix, and only the
//! coordinator receives the result. [`run`] drives the whole pipeline:
//!
//! ```text
//! Init -> DimAgreed -> VectorReady -> Partitioned -> Computed -> Collected -> Done
//! ```
//!
//! Each arrow is one or more collectives, so no worker enters a phase before
//! every worker has left the previous one.

use std::time::{Duration, Instant};

use rayon::prelude::*;

use crate::comm::WorkerGroup;
use crate::config::{KernelConfig, Schedule};
use crate::error::{Error, Result};
use crate::partition::{Partition, RowBlock};
use crate::ReduceOp;

/// Coordinator-side input.
#[derive(Debug, Clone, PartialEq)]
pub struct Problem {
    /// Dense vector `x`; its length is the dimension.
    pub vector: Vec<f64>,
    /// Row-major `dim × dim` matrix `A`.
    pub matrix: Vec<f64>,
}

/// Coordinator-side output of [`run`].
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    /// `y = A·x` in global row order.
    pub result: Vec<f64>,
    /// Wall time of the slowest worker.
    pub slowest: Duration,
    /// Number of workers that shared the rows.
    pub workers: usize,
}

/// Lifecycle of one kernel run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    /// Nothing shared yet.
    Init,
    /// Every worker holds the validated dimension.
    DimAgreed,
    /// Every worker holds its own copy of the vector.
    VectorReady,
    /// Every worker holds its row block.
    Partitioned,
    /// Every worker computed its local results.
    Computed,
    /// The coordinator holds the full result.
    Collected,
    /// Timing reduced; buffers released.
    Done,
}

/// Share the coordinator's dimension and validate it on every worker.
///
/// The coordinator passes `Some(dim)`; other workers pass `None` (anything
/// they pass is ignored). Every worker checks the agreed value against the
/// group size, so an invalid dimension fails everywhere before any buffer is
/// sized from it.
pub fn agree_dimension(group: &WorkerGroup, candidate: Option<usize>) -> Result<Partition> {
    let local = if group.is_coordinator() {
        candidate.ok_or_else(|| {
            Error::InvalidDimension("the coordinator supplied no dimension".into())
        })
    } else {
        Ok(0)
    };
    let proposed = group.confirm(local)?;
    let dim = group.broadcast_scalar(proposed as u64, WorkerGroup::COORDINATOR)?;
    let dim = usize::try_from(dim)
        .map_err(|_| Error::InvalidDimension(format!("dimension {dim} overflows usize")))?;
    Partition::new(dim, group.size())
}

/// Give every worker an independent copy of the coordinator's vector.
pub fn replicate_vector(
    group: &WorkerGroup,
    partition: &Partition,
    vector: Option<Vec<f64>>,
) -> Result<Vec<f64>> {
    let local = if group.is_coordinator() {
        vector.ok_or_else(|| Error::InvalidCount("the coordinator supplied no vector".into()))
    } else {
        Ok(vec![0.0; partition.dim()])
    };
    let mut buf = group.confirm(local)?;
    group.broadcast(&mut buf, WorkerGroup::COORDINATOR)?;
    Ok(buf)
}

/// Scatter the coordinator's matrix so worker `k` receives rows
/// [`partition.row_range(k)`](Partition::row_range).
///
/// The coordinator's matrix must hold exactly `dim²` values.
pub fn distribute_rows(
    group: &WorkerGroup,
    partition: &Partition,
    matrix: Option<&[f64]>,
) -> Result<RowBlock> {
    let local = if group.is_coordinator() {
        match matrix {
            Some(matrix) if matrix.len() == partition.matrix_len() => Ok(matrix),
            Some(matrix) => Err(Error::InvalidCount(format!(
                "matrix holds {} elements, dimension {} needs {}",
                matrix.len(),
                partition.dim(),
                partition.matrix_len()
            ))),
            None => Err(Error::InvalidCount("the coordinator supplied no matrix".into())),
        }
    } else {
        Ok(&[][..])
    };
    let send = group.confirm(local)?;
    let mut recv = vec![0.0; partition.block_len()];
    group.scatter(send, &mut recv, WorkerGroup::COORDINATOR)?;
    RowBlock::new(
        partition.row_range(group.rank()).start,
        partition.dim(),
        recv,
    )
}

/// Dot every row of `block` with `vector`.
///
/// Each row is accumulated in column order `j = 0..dim`, so the output is
/// bit-identical for both schedules. The parallel schedule runs on the rayon
/// pool the caller is installed in.
pub fn local_products(block: &RowBlock, vector: &[f64], schedule: Schedule) -> Result<Vec<f64>> {
    if vector.len() != block.dim() {
        return Err(Error::InvalidCount(format!(
            "vector of length {} against rows of length {}",
            vector.len(),
            block.dim()
        )));
    }
    let products: Vec<f64> = match schedule {
        Schedule::Sequential => block.rows().map(|row| dot(row, vector)).collect(),
        Schedule::Parallel => block
            .as_slice()
            .par_chunks_exact(block.dim())
            .map(|row| dot(row, vector))
            .collect(),
    };
    Ok(products)
}

/// Gather every worker's local results into global row order on the
/// coordinator. Returns `Some` on the coordinator only.
pub fn collect_results(
    group: &WorkerGroup,
    partition: &Partition,
    local: &[f64],
) -> Result<Option<Vec<f64>>> {
    let rows = partition.result_range(group.rank());
    if local.len() != rows.len() {
        return Err(Error::InvalidCount(format!(
            "{} local results for rows {rows:?}",
            local.len()
        )));
    }
    let mut result = if group.is_coordinator() {
        vec![0.0; partition.dim()]
    } else {
        Vec::new()
    };
    group.gather(local, &mut result, WorkerGroup::COORDINATOR)?;
    Ok(group.is_coordinator().then_some(result))
}

/// Run the whole pipeline on this worker.
///
/// Must be called by every worker of the group. `problem` is only read on
/// the coordinator. Returns `Some(report)` on the coordinator and `None`
/// elsewhere.
pub fn run(
    group: &WorkerGroup,
    problem: Option<Problem>,
    config: &KernelConfig,
) -> Result<Option<Report>> {
    let started = Instant::now();
    let mut phase = Phase::Init;

    let (vector, matrix) = match problem.filter(|_| group.is_coordinator()) {
        Some(Problem { vector, matrix }) => (Some(vector), Some(matrix)),
        None => (None, None),
    };

    let partition = agree_dimension(group, vector.as_ref().map(Vec::len))?;
    advance(&mut phase, Phase::DimAgreed, group);

    let vector = replicate_vector(group, &partition, vector)?;
    advance(&mut phase, Phase::VectorReady, group);

    let block = distribute_rows(group, &partition, matrix.as_deref())?;
    drop(matrix);
    advance(&mut phase, Phase::Partitioned, group);

    let local = group.confirm(compute(&block, &vector, config))?;
    drop(block);
    advance(&mut phase, Phase::Computed, group);

    let result = collect_results(group, &partition, &local)?;
    advance(&mut phase, Phase::Collected, group);

    let elapsed = started.elapsed().as_secs_f64();
    let slowest = group.reduce_scalar(elapsed, ReduceOp::Max, WorkerGroup::COORDINATOR)?;
    advance(&mut phase, Phase::Done, group);

    tracing::debug!(
        elapsed,
        steps = group.steps(),
        rows = partition.rows_per_worker(),
        "kernel finished on worker"
    );

    Ok(result.zip(slowest).map(|(result, secs)| {
        tracing::info!(
            dim = partition.dim(),
            workers = partition.workers(),
            slowest = secs,
            "matrix-vector product assembled"
        );
        Report {
            result,
            slowest: Duration::from_secs_f64(secs),
            workers: partition.workers(),
        }
    }))
}

/// Sequential `A·x` for a row-major `dim × dim` matrix, with the same
/// accumulation order as the distributed kernel.
pub fn matvec(matrix: &[f64], vector: &[f64]) -> Result<Vec<f64>> {
    let dim = vector.len();
    if dim == 0 {
        return Err(Error::InvalidDimension("empty vector".into()));
    }
    if matrix.len() != dim * dim {
        return Err(Error::InvalidCount(format!(
            "matrix holds {} elements, dimension {dim} needs {}",
            matrix.len(),
            dim * dim
        )));
    }
    Ok(matrix.chunks_exact(dim).map(|row| dot(row, vector)).collect())
}

fn dot(row: &[f64], vector: &[f64]) -> f64 {
    let mut sum = 0.0;
    for (a, x) in row.iter().zip(vector) {
        sum += a * x;
    }
    sum
}

fn compute(block: &RowBlock, vector: &[f64], config: &KernelConfig) -> Result<Vec<f64>> {
    match (config.schedule, config.local_threads) {
        (Schedule::Parallel, Some(threads)) => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .map_err(|err| Error::Internal(format!("could not build row pool: {err}")))?;
            pool.install(|| local_products(block, vector, Schedule::Parallel))
        }
        (schedule, _) => local_products(block, vector, schedule),
    }
}

fn advance(phase: &mut Phase, next: Phase, group: &WorkerGroup) {
    debug_assert!(next > *phase, "phase {next:?} entered after {phase:?}");
    tracing::debug!(rank = group.rank(), from = ?*phase, to = ?next, "phase");
    *phase = next;
}
