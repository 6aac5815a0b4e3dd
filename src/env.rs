//! Environment variable helpers.
//!
//! These functions read the `FERROMV_*` variables that configure a run.
//! They return `None` if the variable is not set (or does not parse), so
//! callers can layer defaults and command-line values on top.
//!
//! # Environment Variables
//!
//! | Function | Variable | Description |
//! |----------|----------|-------------|
//! | `workers()` | `FERROMV_WORKERS` | Number of workers in the group |
//! | `schedule()` | `FERROMV_SCHEDULE` | Row schedule inside a worker (`sequential` or `parallel`) |
//! | `local_threads()` | `FERROMV_LOCAL_THREADS` | Threads per worker for the parallel schedule |
//! | `log_filter()` | `FERROMV_LOG` | Default log filter when `RUST_LOG` is unset |

use std::env;

use crate::config::Schedule;

/// Get the requested worker count.
pub fn workers() -> Option<usize> {
    env::var("FERROMV_WORKERS").ok().and_then(|s| s.trim().parse().ok())
}

/// Get the requested per-worker row schedule.
pub fn schedule() -> Option<Schedule> {
    let raw = env::var("FERROMV_SCHEDULE").ok()?;
    match raw.parse() {
        Ok(schedule) => Some(schedule),
        Err(err) => {
            tracing::warn!(%err, "ignoring FERROMV_SCHEDULE");
            None
        }
    }
}

/// Get the number of threads each worker may use for its rows.
pub fn local_threads() -> Option<usize> {
    env::var("FERROMV_LOCAL_THREADS")
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

/// Get the default log filter directive.
pub fn log_filter() -> Option<String> {
    env::var("FERROMV_LOG").ok().filter(|s| !s.trim().is_empty())
}
