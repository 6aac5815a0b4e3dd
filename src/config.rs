//! Run configuration for the matrix-vector kernel.

use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;

use crate::env;
use crate::error::{Error, Result};

/// How a worker walks its own rows.
///
/// Both schedules accumulate each row in column order, so they produce
/// bit-identical results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Schedule {
    /// One row after another on the worker's own thread.
    #[default]
    Sequential,
    /// Rows spread over a `rayon` thread pool.
    Parallel,
}

impl FromStr for Schedule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" | "seq" => Ok(Schedule::Sequential),
            "parallel" | "par" => Ok(Schedule::Parallel),
            other => Err(Error::Config(format!(
                "unknown schedule {other:?} (expected \"sequential\" or \"parallel\")"
            ))),
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Sequential => f.write_str("sequential"),
            Schedule::Parallel => f.write_str("parallel"),
        }
    }
}

/// Settings shared by every worker of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelConfig {
    /// Number of workers in the group.
    pub workers: usize,
    /// Row schedule inside each worker.
    pub schedule: Schedule,
    /// Thread count for [`Schedule::Parallel`]; `None` uses rayon's global pool.
    pub local_threads: Option<usize>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        KernelConfig {
            workers: std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
            schedule: Schedule::Sequential,
            local_threads: None,
        }
    }
}

impl KernelConfig {
    /// Defaults overridden by any `FERROMV_*` variables that are set.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        KernelConfig {
            workers: env::workers().unwrap_or(defaults.workers),
            schedule: env::schedule().unwrap_or(defaults.schedule),
            local_threads: env::local_threads().or(defaults.local_threads),
        }
    }

    /// Check the values before any worker starts.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("worker count must be at least 1".into()));
        }
        if self.local_threads == Some(0) {
            return Err(Error::Config("local thread count must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_parses_case_insensitively() {
        assert_eq!("SEQUENTIAL".parse::<Schedule>().unwrap(), Schedule::Sequential);
        assert_eq!(" par ".parse::<Schedule>().unwrap(), Schedule::Parallel);
        assert!(matches!("dynamic".parse::<Schedule>(), Err(Error::Config(_))));
        assert_eq!(Schedule::Parallel.to_string(), "parallel");
    }

    #[test]
    fn validation() {
        let mut config = KernelConfig::default();
        assert!(config.workers >= 1);
        assert!(config.validate().is_ok());

        config.workers = 0;
        assert!(config.validate().is_err());

        config.workers = 2;
        config.local_threads = Some(0);
        assert!(config.validate().is_err());
    }
}
