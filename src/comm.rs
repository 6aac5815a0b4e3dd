//! Collective operations on a worker group.

use crate::datatype::Element;
use crate::error::{Error, Result};
use crate::transport::{Collective, Endpoint, Fault, Payload};
use crate::ReduceOp;

/// One worker's handle on the group it belongs to.
///
/// Every method here is a collective: all workers of the group must call the
/// same method with the same `root`, in the same order. Each call returns only
/// after every worker has reached it.
///
/// # Example
///
/// ```
/// use ferromv::launch;
///
/// let ranks = launch(4, |group| {
///     println!("I am worker {} of {}", group.rank(), group.size());
///     group.barrier()?;
///     Ok(group.rank())
/// })
/// .unwrap();
/// assert_eq!(ranks, vec![0, 1, 2, 3]);
/// ```
pub struct WorkerGroup {
    endpoint: Endpoint,
}

impl WorkerGroup {
    /// Rank of the coordinator, the worker that owns file I/O and the
    /// assembled global buffers.
    pub const COORDINATOR: usize = 0;

    pub(crate) fn new(endpoint: Endpoint) -> Self {
        WorkerGroup { endpoint }
    }

    /// Get the rank of the calling worker.
    pub fn rank(&self) -> usize {
        self.endpoint.rank()
    }

    /// Get the number of workers in the group.
    pub fn size(&self) -> usize {
        self.endpoint.size()
    }

    /// Returns `true` on the coordinator (rank 0).
    pub fn is_coordinator(&self) -> bool {
        self.rank() == Self::COORDINATOR
    }

    /// Number of collective steps this worker has entered so far.
    pub fn steps(&self) -> u64 {
        self.endpoint.steps()
    }

    pub(crate) fn depart(&self, reason: &str) {
        self.endpoint.depart(reason);
    }

    // ========================================================================
    // Synchronization
    // ========================================================================

    /// Barrier synchronization.
    ///
    /// No worker returns until all workers have entered the barrier.
    pub fn barrier(&self) -> Result<()> {
        self.endpoint
            .exchange(Collective::Barrier, Self::COORDINATOR, Ok(Payload::empty()), |c| {
                Ok(c.into_iter().map(|_| Payload::empty()).collect())
            })?;
        Ok(())
    }

    /// Share a local outcome with the whole group.
    ///
    /// If any worker passes an error, every other worker receives
    /// [`Error::PeerFailed`] naming the lowest failing rank, and the failing
    /// worker gets its own error back. Call this after a step that can fail on
    /// a subset of workers (typically coordinator-only file loading) and
    /// before the next collective, so healthy workers stop instead of waiting.
    pub fn confirm<T>(&self, local: Result<T>) -> Result<T> {
        let contribution = match &local {
            Ok(_) => Ok(Payload::empty()),
            Err(err) => Err(err.to_string()),
        };
        let shared = self
            .endpoint
            .exchange(Collective::Confirm, Self::COORDINATOR, contribution, |c| {
                Ok(c.into_iter().map(|_| Payload::empty()).collect())
            });
        let value = local?;
        shared?;
        Ok(value)
    }

    // ========================================================================
    // Blocking Collectives
    // ========================================================================

    /// Broadcast a slice from root to all workers.
    ///
    /// # Arguments
    ///
    /// * `data` - Buffer to broadcast (input at root, output at others). Every
    ///   worker must pass a buffer of the root's length.
    /// * `root` - Rank of the root worker
    pub fn broadcast<T: Element>(&self, data: &mut [T], root: usize) -> Result<()> {
        let size = self.size();
        let source: &[T] = data;
        let delivered = self.endpoint.exchange(
            Collective::Broadcast,
            root,
            Ok(length_payload(source.len())),
            |contributions| {
                check_uniform_lengths(contributions, source.len(), "broadcast")?;
                Ok((0..size)
                    .map(|rank| {
                        if rank == root {
                            Payload::empty()
                        } else {
                            Payload::from_vec(source.to_vec())
                        }
                    })
                    .collect())
            },
        )?;

        if self.rank() != root {
            copy_into(data, delivered)?;
        }
        Ok(())
    }

    /// Broadcast a single value from root to all workers.
    ///
    /// The value passed by non-root workers is ignored.
    pub fn broadcast_scalar<T: Element>(&self, value: T, root: usize) -> Result<T> {
        let mut buf = [value];
        self.broadcast(&mut buf, root)?;
        Ok(buf[0])
    }

    /// Scatter equal contiguous blocks from root to all workers.
    ///
    /// Worker `k` receives `send[k * n..(k + 1) * n]` where `n = recv.len()`.
    /// `send` is only significant at root and must hold `n * size` elements;
    /// every worker must pass a `recv` of the same length.
    pub fn scatter<T: Element>(&self, send: &[T], recv: &mut [T], root: usize) -> Result<()> {
        let size = self.size();
        let n = recv.len();
        let delivered = self.endpoint.exchange(
            Collective::Scatter,
            root,
            Ok(length_payload(n)),
            |contributions| {
                check_uniform_lengths(contributions, n, "scatter")?;
                if send.len() != n * size {
                    return Err(Fault::Count(format!(
                        "scatter root holds {} elements, {size} blocks of {n} need {}",
                        send.len(),
                        n * size
                    )));
                }
                Ok((0..size)
                    .map(|rank| {
                        if rank == root {
                            Payload::empty()
                        } else {
                            Payload::from_vec(send[rank * n..(rank + 1) * n].to_vec())
                        }
                    })
                    .collect())
            },
        )?;

        if self.rank() == root {
            recv.copy_from_slice(&send[root * n..(root + 1) * n]);
        } else {
            copy_into(recv, delivered)?;
        }
        Ok(())
    }

    /// Gather equal blocks from all workers to the root.
    ///
    /// Worker `k`'s `send` lands at `recv[k * n..(k + 1) * n]` where
    /// `n = send.len()`. `recv` is only significant at root and must hold
    /// `n * size` elements; every worker must send the same number of elements.
    pub fn gather<T: Element>(&self, send: &[T], recv: &mut [T], root: usize) -> Result<()> {
        let size = self.size();
        let n = send.len();
        let contribution = if self.rank() == root {
            Payload::empty()
        } else {
            Payload::from_vec(send.to_vec())
        };
        self.endpoint
            .exchange(Collective::Gather, root, Ok(contribution), |contributions| {
                if recv.len() != n * size {
                    return Err(Fault::Count(format!(
                        "gather root buffer holds {} elements, {size} blocks of {n} need {}",
                        recv.len(),
                        n * size
                    )));
                }
                for (rank, payload) in contributions.into_iter().enumerate() {
                    let block = &mut recv[rank * n..(rank + 1) * n];
                    if rank == root {
                        block.copy_from_slice(send);
                        continue;
                    }
                    if payload.len() != n {
                        return Err(Fault::Count(format!(
                            "gather: worker {rank} sent {} elements, root expects {n}",
                            payload.len()
                        )));
                    }
                    let data = payload.into_vec::<T>().map_err(|err| {
                        Fault::Protocol(format!("gather from worker {rank}: {err}"))
                    })?;
                    block.copy_from_slice(&data);
                }
                Ok((0..size).map(|_| Payload::empty()).collect())
            })?;
        Ok(())
    }

    /// Reduce one value per worker to the root.
    ///
    /// Values are combined in rank order. Returns `Some(result)` on the root
    /// and `None` elsewhere.
    pub fn reduce_scalar<T: Element>(
        &self,
        value: T,
        op: ReduceOp,
        root: usize,
    ) -> Result<Option<T>> {
        let size = self.size();
        let delivered = self.endpoint.exchange(
            Collective::Reduce,
            root,
            Ok(Payload::from_vec(vec![value])),
            |contributions| {
                let total = fold::<T>(contributions, op)?;
                Ok((0..size)
                    .map(|rank| {
                        if rank == root {
                            Payload::from_vec(vec![total])
                        } else {
                            Payload::empty()
                        }
                    })
                    .collect())
            },
        )?;

        if self.rank() == root {
            Ok(delivered.into_vec::<T>()?.first().copied())
        } else {
            Ok(None)
        }
    }

    /// All-reduce a single value: every worker receives the combined result.
    pub fn allreduce_scalar<T: Element>(&self, value: T, op: ReduceOp) -> Result<T> {
        let size = self.size();
        let delivered = self.endpoint.exchange(
            Collective::Reduce,
            Self::COORDINATOR,
            Ok(Payload::from_vec(vec![value])),
            |contributions| {
                let total = fold::<T>(contributions, op)?;
                Ok((0..size).map(|_| Payload::from_vec(vec![total])).collect())
            },
        )?;
        delivered
            .into_vec::<T>()?
            .first()
            .copied()
            .ok_or_else(|| Error::Internal("all-reduce delivered no value".into()))
    }
}

fn length_payload(len: usize) -> Payload {
    Payload::from_vec(vec![len as u64])
}

fn check_uniform_lengths(
    contributions: Vec<Payload>,
    expected: usize,
    what: &str,
) -> std::result::Result<(), Fault> {
    for (rank, payload) in contributions.into_iter().enumerate() {
        let len = payload
            .into_vec::<u64>()
            .ok()
            .and_then(|v| v.first().copied())
            .ok_or_else(|| {
                Fault::Protocol(format!("{what}: worker {rank} sent no buffer length"))
            })?;
        if len as usize != expected {
            return Err(Fault::Count(format!(
                "{what}: worker {rank} posted a buffer of {len} elements, root uses {expected}"
            )));
        }
    }
    Ok(())
}

fn fold<T: Element>(contributions: Vec<Payload>, op: ReduceOp) -> std::result::Result<T, Fault> {
    let mut total: Option<T> = None;
    for (rank, payload) in contributions.into_iter().enumerate() {
        let value = payload
            .into_vec::<T>()
            .ok()
            .and_then(|v| v.first().copied())
            .ok_or_else(|| {
                Fault::Protocol(format!("reduce: worker {rank} sent no {:?} value", T::TAG))
            })?;
        total = Some(match total {
            Some(acc) => acc.combine(value, op),
            None => value,
        });
    }
    total.ok_or_else(|| Fault::Protocol("reduce over an empty group".into()))
}

fn copy_into<T: Element>(dest: &mut [T], payload: Payload) -> Result<()> {
    let data = payload.into_vec::<T>()?;
    if data.len() != dest.len() {
        return Err(Error::InvalidCount(format!(
            "received {} elements into a buffer of {}",
            data.len(),
            dest.len()
        )));
    }
    dest.copy_from_slice(&data);
    Ok(())
}
