//! Mailbox transport underneath the worker group collectives.
//!
//! Every worker owns one inbox and a sender into every peer's inbox. A
//! collective step is a two-phase rendezvous hubbed at the step's root:
//!
//! 1. the root announces itself to every peer with [`Message::Lead`], and
//!    every non-root posts an [`Message::Arrive`] carrying its contribution
//!    (or a failure notice) and blocks;
//! 2. the root waits until all `size - 1` peers have arrived, resolves the
//!    step, and posts one [`Message::Release`] to each peer.
//!
//! Because the root only releases after the last arrival, every collective is
//! a barrier. A `Lead` from any worker other than the expected root means two
//! workers disagree on the root, and the step fails on both sides.
//!
//! Peers are at most one step apart, so messages for a later step are held
//! until this worker reaches it, and messages for a finished step are
//! dropped. A worker that leaves the group posts [`Message::Departed`]; peers
//! that are still waiting on it fail instead of blocking forever.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::sync::mpsc::{channel, Receiver, Sender};

use crate::datatype::{DatatypeTag, Element};
use crate::error::{Error, Result};

/// A type-tagged, owned buffer moving between workers.
#[derive(Debug)]
pub(crate) struct Payload {
    tag: DatatypeTag,
    len: usize,
    data: Box<dyn Any + Send>,
}

impl Payload {
    pub(crate) fn from_vec<T: Element>(data: Vec<T>) -> Self {
        Payload {
            tag: T::TAG,
            len: data.len(),
            data: Box::new(data),
        }
    }

    pub(crate) fn empty() -> Self {
        Self::from_vec(Vec::<u8>::new())
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn into_vec<T: Element>(self) -> Result<Vec<T>> {
        if self.tag != T::TAG {
            return Err(Error::DatatypeMismatch {
                expected: T::TAG,
                found: self.tag,
            });
        }
        self.data
            .downcast::<Vec<T>>()
            .map(|boxed| *boxed)
            .map_err(|_| Error::Internal("payload tag does not match its contents".into()))
    }
}

/// The collective a worker believes it is executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Collective {
    Barrier,
    Broadcast,
    Scatter,
    Gather,
    Reduce,
    Confirm,
}

/// Why the root refused to complete a step.
#[derive(Debug, Clone)]
pub(crate) enum Fault {
    Peer { rank: usize, message: String },
    Count(String),
    Protocol(String),
}

impl Fault {
    pub(crate) fn into_error(self) -> Error {
        match self {
            Fault::Peer { rank, message } => Error::PeerFailed { rank, message },
            Fault::Count(message) => Error::InvalidCount(message),
            Fault::Protocol(message) => Error::ProtocolViolation(message),
        }
    }
}

pub(crate) enum Message {
    Lead {
        step: u64,
        op: Collective,
    },
    Arrive {
        step: u64,
        op: Collective,
        root: usize,
        body: std::result::Result<Payload, String>,
    },
    Release {
        step: u64,
        body: std::result::Result<Payload, Fault>,
    },
    Departed {
        reason: String,
    },
}

impl Message {
    fn step(&self) -> Option<u64> {
        match self {
            Message::Lead { step, .. }
            | Message::Arrive { step, .. }
            | Message::Release { step, .. } => Some(*step),
            Message::Departed { .. } => None,
        }
    }
}

struct Envelope {
    source: usize,
    message: Message,
}

/// One worker's connection to the rest of the group.
pub(crate) struct Endpoint {
    rank: usize,
    size: usize,
    inbox: Receiver<Envelope>,
    peers: Vec<Sender<Envelope>>,
    step: Cell<u64>,
    departed: RefCell<BTreeMap<usize, String>>,
    early: RefCell<VecDeque<Envelope>>,
    left: Cell<bool>,
}

/// Build a fully connected set of endpoints, one per rank.
pub(crate) fn mesh(size: usize) -> Vec<Endpoint> {
    let (senders, receivers): (Vec<_>, Vec<_>) = (0..size).map(|_| channel()).unzip();
    receivers
        .into_iter()
        .enumerate()
        .map(|(rank, inbox)| Endpoint {
            rank,
            size,
            inbox,
            peers: senders.clone(),
            step: Cell::new(0),
            departed: RefCell::new(BTreeMap::new()),
            early: RefCell::new(VecDeque::new()),
            left: Cell::new(false),
        })
        .collect()
}

impl Endpoint {
    pub(crate) fn rank(&self) -> usize {
        self.rank
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }

    /// Number of collective steps this endpoint has entered.
    pub(crate) fn steps(&self) -> u64 {
        self.step.get()
    }

    /// Run one collective step.
    ///
    /// `contribution` is this worker's input to the step. On the root,
    /// `resolve` receives every contribution in rank order and must return
    /// exactly one output per rank; the root keeps its own slot and releases
    /// the others. Non-roots never call `resolve`.
    pub(crate) fn exchange<F>(
        &self,
        op: Collective,
        root: usize,
        contribution: std::result::Result<Payload, String>,
        resolve: F,
    ) -> Result<Payload>
    where
        F: FnOnce(Vec<Payload>) -> std::result::Result<Vec<Payload>, Fault>,
    {
        if root >= self.size {
            return Err(Error::InvalidRank {
                rank: root,
                size: self.size,
            });
        }
        let step = self.step.get() + 1;
        self.step.set(step);
        self.early
            .borrow_mut()
            .retain(|envelope| envelope.message.step() >= Some(step));

        if self.rank == root {
            self.lead(step, op, contribution, resolve)
        } else {
            self.follow(step, op, root, contribution)
        }
    }

    fn lead<F>(
        &self,
        step: u64,
        op: Collective,
        own: std::result::Result<Payload, String>,
        resolve: F,
    ) -> Result<Payload>
    where
        F: FnOnce(Vec<Payload>) -> std::result::Result<Vec<Payload>, Fault>,
    {
        for rank in (0..self.size).filter(|&r| r != self.rank) {
            self.post(rank, Message::Lead { step, op });
        }

        let mut slots: Vec<Option<std::result::Result<Payload, Fault>>> =
            (0..self.size).map(|_| None).collect();
        slots[self.rank] = Some(own.map_err(|message| Fault::Peer {
            rank: self.rank,
            message,
        }));
        for (&rank, reason) in self.departed.borrow().iter() {
            slots[rank] = Some(Err(departure_fault(rank, reason)));
        }

        let mut pending = slots.iter().filter(|s| s.is_none()).count();
        while pending > 0 {
            let envelope = self.next_for(step)?;
            let source = envelope.source;
            let mut conflict = false;
            let outcome = match envelope.message {
                Message::Lead { op: their_op, .. } => {
                    conflict = true;
                    Err(Fault::Protocol(format!(
                        "workers {} and {source} both lead step {step} \
                         ({op:?} and {their_op:?})",
                        self.rank
                    )))
                }
                Message::Arrive {
                    op: their_op,
                    root: their_root,
                    body,
                    ..
                } => {
                    tracing::trace!(step, source, ?their_op, "arrival");
                    if their_op != op || their_root != self.rank {
                        Err(Fault::Protocol(format!(
                            "worker {source} called {their_op:?} with root {their_root}, \
                             worker {} called {op:?} with root {}",
                            self.rank, self.rank
                        )))
                    } else {
                        body.map_err(|message| Fault::Peer {
                            rank: source,
                            message,
                        })
                    }
                }
                Message::Release { .. } => Err(Fault::Protocol(format!(
                    "worker {source} acted as root of step {step}, expected worker {}",
                    self.rank
                ))),
                Message::Departed { reason } => {
                    let fault = departure_fault(source, &reason);
                    self.departed.borrow_mut().insert(source, reason);
                    Err(fault)
                }
            };
            if conflict {
                // The other leader never arrives here; fail the step now.
                slots[source] = Some(outcome);
                break;
            }
            if slots[source].is_none() {
                slots[source] = Some(outcome);
                pending -= 1;
            }
        }

        let mut contributions = Vec::with_capacity(self.size);
        let mut fault = None;
        for slot in slots.into_iter().flatten() {
            match slot {
                Ok(payload) => contributions.push(payload),
                Err(f) => {
                    fault.get_or_insert(f);
                }
            }
        }

        let resolved = match fault {
            Some(f) => Err(f),
            None => resolve(contributions).and_then(|outputs| {
                if outputs.len() == self.size {
                    Ok(outputs)
                } else {
                    Err(Fault::Protocol(format!(
                        "{op:?} resolved {} outputs for {} workers",
                        outputs.len(),
                        self.size
                    )))
                }
            }),
        };

        match resolved {
            Ok(outputs) => {
                tracing::debug!(step, ?op, root = self.rank, "collective complete");
                let mut own = None;
                for (rank, payload) in outputs.into_iter().enumerate() {
                    if rank == self.rank {
                        own = Some(payload);
                    } else {
                        self.post(
                            rank,
                            Message::Release {
                                step,
                                body: Ok(payload),
                            },
                        );
                    }
                }
                own.ok_or_else(|| Error::Internal("root output missing".into()))
            }
            Err(fault) => {
                tracing::debug!(step, ?op, ?fault, "collective failed");
                for rank in (0..self.size).filter(|&r| r != self.rank) {
                    self.post(
                        rank,
                        Message::Release {
                            step,
                            body: Err(fault.clone()),
                        },
                    );
                }
                Err(fault.into_error())
            }
        }
    }

    fn follow(
        &self,
        step: u64,
        op: Collective,
        root: usize,
        contribution: std::result::Result<Payload, String>,
    ) -> Result<Payload> {
        if let Some(reason) = self.departed.borrow().get(&root) {
            return Err(departure_fault(root, reason).into_error());
        }
        self.post(
            root,
            Message::Arrive {
                step,
                op,
                root,
                body: contribution,
            },
        );

        loop {
            let envelope = self.next_for(step)?;
            let source = envelope.source;
            match envelope.message {
                Message::Release { body, .. } if source == root => {
                    tracing::trace!(step, source, "release");
                    return body.map_err(Fault::into_error);
                }
                Message::Lead { .. } if source == root => {}
                Message::Lead { op: their_op, .. } => {
                    return Err(Error::ProtocolViolation(format!(
                        "worker {source} leads step {step} as root of {their_op:?}, \
                         but worker {} follows root {root}",
                        self.rank
                    )));
                }
                Message::Departed { reason } => {
                    let fault = departure_fault(source, &reason);
                    self.departed.borrow_mut().insert(source, reason);
                    if source == root {
                        return Err(fault.into_error());
                    }
                }
                Message::Arrive { op: their_op, .. } => {
                    return Err(Error::ProtocolViolation(format!(
                        "worker {source} treated worker {} as root of {their_op:?}, \
                         but worker {} is waiting on root {root}",
                        self.rank, self.rank
                    )));
                }
                Message::Release { .. } => {
                    return Err(Error::ProtocolViolation(format!(
                        "worker {source} released step {step}, expected root {root}"
                    )));
                }
            }
        }
    }

    /// Next message that belongs to `step`, or a departure notice.
    fn next_for(&self, step: u64) -> Result<Envelope> {
        {
            let mut early = self.early.borrow_mut();
            if let Some(at) = early.iter().position(|e| e.message.step() == Some(step)) {
                if let Some(envelope) = early.remove(at) {
                    return Ok(envelope);
                }
            }
        }
        loop {
            // Cannot disconnect while we hold our own sender.
            let envelope = self
                .inbox
                .recv()
                .map_err(|_| Error::Internal("worker inbox disconnected".into()))?;
            match envelope.message.step() {
                Some(theirs) if theirs > step => self.early.borrow_mut().push_back(envelope),
                Some(theirs) if theirs < step => {
                    let source = envelope.source;
                    tracing::trace!(step, theirs, source, "stale message dropped");
                }
                _ => return Ok(envelope),
            }
        }
    }

    fn post(&self, dest: usize, message: Message) {
        let envelope = Envelope {
            source: self.rank,
            message,
        };
        // A peer that already exited has dropped its inbox; nothing is waiting.
        if self.peers[dest].send(envelope).is_err() {
            tracing::trace!(dest, "peer inbox closed");
        }
    }

    /// Announce to every peer that this worker will not enter further steps.
    pub(crate) fn depart(&self, reason: &str) {
        if self.left.replace(true) {
            return;
        }
        tracing::trace!(rank = self.rank, reason, "departing");
        for rank in (0..self.size).filter(|&r| r != self.rank) {
            self.post(
                rank,
                Message::Departed {
                    reason: reason.to_owned(),
                },
            );
        }
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.depart("panicked");
        } else {
            self.depart("left the group");
        }
    }
}

fn departure_fault(rank: usize, reason: &str) -> Fault {
    Fault::Peer {
        rank,
        message: format!("left the group before this step ({reason})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_round_trip_checks_tag() {
        let payload = Payload::from_vec(vec![1.0f64, 2.0]);
        assert_eq!(payload.len(), 2);
        assert_eq!(payload.into_vec::<f64>().unwrap(), vec![1.0, 2.0]);

        let payload = Payload::from_vec(vec![1i32]);
        match payload.into_vec::<f64>() {
            Err(Error::DatatypeMismatch { expected, found }) => {
                assert_eq!(expected, DatatypeTag::F64);
                assert_eq!(found, DatatypeTag::I32);
            }
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn single_worker_resolves_locally() {
        let mut endpoints = mesh(1);
        let endpoint = endpoints.pop().unwrap();
        let out = endpoint
            .exchange(Collective::Barrier, 0, Ok(Payload::empty()), |c| Ok(c))
            .unwrap();
        assert_eq!(out.len(), 0);
        assert_eq!(endpoint.steps(), 1);
    }

    #[test]
    fn root_out_of_range_is_rejected_before_the_step() {
        let endpoints = mesh(2);
        let err = endpoints[0]
            .exchange(Collective::Barrier, 2, Ok(Payload::empty()), |c| Ok(c))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRank { rank: 2, size: 2 }));
        assert_eq!(endpoints[0].steps(), 0);
    }

    #[test]
    fn departed_peer_fails_the_root_instead_of_blocking() {
        let mut endpoints = mesh(2);
        let follower = endpoints.pop().unwrap();
        let root = endpoints.pop().unwrap();
        drop(follower);
        let err = root
            .exchange(Collective::Barrier, 0, Ok(Payload::empty()), |c| Ok(c))
            .unwrap_err();
        assert!(matches!(err, Error::PeerFailed { rank: 1, .. }));
    }

    #[test]
    fn two_leaders_of_one_step_both_fail() {
        let outcomes: Vec<Result<Payload>> = std::thread::scope(|scope| {
            let handles: Vec<_> = mesh(2)
                .into_iter()
                .map(|endpoint| {
                    scope.spawn(move || {
                        let rank = endpoint.rank();
                        endpoint.exchange(Collective::Broadcast, rank, Ok(Payload::empty()), |c| {
                            Ok(c)
                        })
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for outcome in outcomes {
            assert!(matches!(outcome, Err(Error::ProtocolViolation(_))));
        }
    }
}
