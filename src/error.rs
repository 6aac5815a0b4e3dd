//! Error types for ferromv

use std::path::PathBuf;

use thiserror::Error;

use crate::datatype::DatatypeTag;

/// Result type for worker group and kernel operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for worker group and kernel operations
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid rank specified
    #[error("Invalid rank: {rank} (group size {size})")]
    InvalidRank {
        /// The offending rank
        rank: usize,
        /// Size of the worker group
        size: usize,
    },

    /// Invalid element or worker count
    #[error("Invalid count: {0}")]
    InvalidCount(String),

    /// Dimension is zero or was never supplied by the coordinator
    #[error("Invalid dimension: {0}")]
    InvalidDimension(String),

    /// Dimension cannot be split evenly across the workers
    #[error("Dimension {dim} is not divisible by worker count {workers}")]
    NotDivisible {
        /// Agreed dimension
        dim: usize,
        /// Number of workers in the group
        workers: usize,
    },

    /// A payload carried a different element type than the receiver expected
    #[error("Datatype mismatch: expected {expected:?}, received {found:?}")]
    DatatypeMismatch {
        /// Element type of the receiving buffer
        expected: DatatypeTag,
        /// Element type of the payload
        found: DatatypeTag,
    },

    /// Workers disagreed on which collective to run in a step
    #[error("Collective protocol violation: {0}")]
    ProtocolViolation(String),

    /// Another worker failed or left the group
    #[error("Worker {rank} failed: {message}")]
    PeerFailed {
        /// Rank of the failing worker
        rank: usize,
        /// Diagnostic reported by that worker
        message: String,
    },

    /// A worker thread panicked
    #[error("Worker {rank} panicked: {message}")]
    WorkerPanicked {
        /// Rank of the panicking worker
        rank: usize,
        /// Panic payload, if it was a string
        message: String,
    },

    /// A worker-tagged failure reported by [`launch`](crate::launch)
    #[error("worker {rank}: {source}")]
    Worker {
        /// Rank that produced the error
        rank: usize,
        /// The underlying error
        #[source]
        source: Box<Error>,
    },

    /// Malformed numeric input
    #[error("Parse error on line {line}: invalid number {token:?}")]
    Parse {
        /// 1-based line number
        line: usize,
        /// The offending token
        token: String,
    },

    /// Filesystem failure
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        /// File being read or written
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns `true` if this error only relays a failure that happened on
    /// another worker.
    pub fn is_relayed(&self) -> bool {
        match self {
            Error::PeerFailed { .. } => true,
            Error::Worker { source, .. } => source.is_relayed(),
            _ => false,
        }
    }

    /// Attach the rank that observed this error.
    pub fn on_worker(self, rank: usize) -> Self {
        match self {
            Error::Worker { .. } | Error::WorkerPanicked { .. } => self,
            other => Error::Worker {
                rank,
                source: Box::new(other),
            },
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
