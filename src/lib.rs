//! # ferromv
//!
//! Row-partitioned dense matrix-vector multiplication over a fixed group of
//! cooperating workers.
//!
//! The crate has two layers:
//! - a worker group runtime ([`launch`], [`WorkerGroup`]) that runs the same
//!   closure on `W` threads and connects them only through blocking
//!   collectives (barrier, broadcast, scatter, gather, reductions);
//! - the `y = A·x` kernel ([`kernel`]) built on those collectives: the
//!   coordinator's dimension and vector are broadcast, the matrix rows are
//!   scattered in equal contiguous blocks, every worker computes its dot
//!   products, and the coordinator gathers the result in row order.
//!
//! ## Quick Start
//!
//! ```
//! use ferromv::kernel::{self, Problem};
//! use ferromv::{launch, KernelConfig};
//!
//! fn main() -> Result<(), ferromv::Error> {
//!     let reports = launch(2, |group| {
//!         let problem = group.is_coordinator().then(|| Problem {
//!             vector: vec![1.0, 1.0],
//!             matrix: vec![1.0, 2.0, 3.0, 4.0],
//!         });
//!         kernel::run(group, problem, &KernelConfig::default())
//!     })?;
//!
//!     let report = reports[0].as_ref().expect("coordinator holds the result");
//!     assert_eq!(report.result, vec![3.0, 7.0]);
//!     Ok(())
//! }
//! ```
//!
//! ## Capabilities
//!
//! - **Generic API**: collectives work with any [`Element`] (`f32`, `f64`, `i32`, `i64`, `u8`, `u32`, `u64`)
//! - **Barrier semantics**: every collective completes only once all workers reached it
//! - **Failure relay**: a failed or departed worker surfaces as [`Error::PeerFailed`] on its peers instead of a hang
//! - **Environment configuration**: see [`env`] and [`config`]

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]

mod comm;
pub mod config;
mod datatype;
pub mod env;
mod error;
pub mod io;
pub mod kernel;
pub mod logging;
pub mod partition;
mod transport;

pub use comm::WorkerGroup;
pub use config::{KernelConfig, Schedule};
pub use datatype::{DatatypeTag, Element};
pub use error::{Error, Result};
pub use partition::{Partition, RowBlock};

use std::any::Any;

/// Reduction operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    /// Sum of values
    Sum,
    /// Maximum value
    Max,
    /// Minimum value
    Min,
    /// Product of values
    Prod,
}

/// Run `body` on `size` workers and return their outputs in rank order.
///
/// Every worker executes the same closure (single program, multiple data)
/// with its own [`WorkerGroup`] handle; rank 0 is the coordinator. The call
/// returns once every worker has finished.
///
/// # Errors
///
/// Returns [`Error::InvalidCount`] for an empty group. If any worker fails,
/// the whole run fails with a worker-tagged error; when several workers fail,
/// the one that failed on its own is reported rather than the peers that only
/// relayed its failure.
///
/// # Example
///
/// ```
/// use ferromv::{launch, ReduceOp};
///
/// let sums = launch(3, |group| {
///     group.allreduce_scalar(group.rank() as u32, ReduceOp::Sum)
/// })
/// .unwrap();
/// assert_eq!(sums, vec![3, 3, 3]);
/// ```
pub fn launch<T, F>(size: usize, body: F) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(&WorkerGroup) -> Result<T> + Sync,
{
    if size == 0 {
        return Err(Error::InvalidCount(
            "a worker group needs at least one worker".into(),
        ));
    }
    tracing::debug!(workers = size, "launching worker group");

    let body = &body;
    let outcomes: Vec<Result<T>> = std::thread::scope(|scope| {
        let spawned: Vec<_> = transport::mesh(size)
            .into_iter()
            .map(|endpoint| {
                let rank = endpoint.rank();
                std::thread::Builder::new()
                    .name(format!("ferromv-worker-{rank}"))
                    .spawn_scoped(scope, move || {
                        let span = tracing::info_span!("worker", rank);
                        let _entered = span.enter();
                        let group = WorkerGroup::new(endpoint);
                        let outcome = body(&group);
                        match &outcome {
                            Ok(_) => group.depart("finished"),
                            Err(err) => {
                                tracing::error!(%err, "worker failed");
                                group.depart(&format!("failed: {err}"));
                            }
                        }
                        outcome
                    })
            })
            .collect();

        spawned
            .into_iter()
            .enumerate()
            .map(|(rank, handle)| match handle {
                Ok(handle) => handle.join().unwrap_or_else(|panic| {
                    Err(Error::WorkerPanicked {
                        rank,
                        message: panic_message(panic.as_ref()),
                    })
                }),
                Err(err) => Err(Error::Internal(format!(
                    "could not spawn worker {rank}: {err}"
                ))),
            })
            .collect()
    });

    let mut outputs = Vec::with_capacity(size);
    let mut failures = Vec::new();
    for (rank, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Ok(value) => outputs.push(value),
            Err(err) => failures.push(err.on_worker(rank)),
        }
    }
    if failures.is_empty() {
        return Ok(outputs);
    }
    let origin = failures
        .iter()
        .position(|err| !err.is_relayed())
        .unwrap_or(0);
    Err(failures.swap_remove(origin))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_group_is_rejected() {
        let err = launch(0, |_| Ok(())).unwrap_err();
        assert!(matches!(err, Error::InvalidCount(_)));
    }

    #[test]
    fn outputs_are_in_rank_order() {
        let out = launch(5, |group| Ok(group.rank() * 10)).unwrap();
        assert_eq!(out, vec![0, 10, 20, 30, 40]);
    }

    #[test]
    fn originating_failure_is_reported_over_relayed_ones() {
        let err = launch(3, |group| {
            let local = if group.rank() == 2 {
                Err(Error::Internal("disk on fire".into()))
            } else {
                Ok(())
            };
            group.confirm(local)
        })
        .unwrap_err();
        match err {
            Error::Worker { rank, source } => {
                assert_eq!(rank, 2);
                assert!(matches!(*source, Error::Internal(_)));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn early_exit_does_not_deadlock_the_others() {
        let err = launch(3, |group| {
            if group.rank() == 1 {
                return Err(Error::InvalidDimension("gave up".into()));
            }
            group.barrier()
        })
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Worker { rank: 1, ref source } if matches!(**source, Error::InvalidDimension(_))
        ));
    }

    #[test]
    fn panicking_worker_is_reported() {
        let err = launch(2, |group| {
            if group.rank() == 1 {
                panic!("worker blew up");
            }
            group.barrier()
        })
        .unwrap_err();
        match err {
            Error::WorkerPanicked { rank, message } => {
                assert_eq!(rank, 1);
                assert_eq!(message, "worker blew up");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
