//! Logging setup for binaries and demos.
//!
//! Worker threads log inside a `worker{rank=..}` span, so every event a
//! worker emits is tagged with its rank.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::env;
use crate::error::{Error, Result};

/// Install a stderr subscriber.
///
/// The filter comes from `RUST_LOG` if set, then `FERROMV_LOG`, then `level`.
pub fn init(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| match env::log_filter() {
            Some(directive) => EnvFilter::try_new(directive),
            None => EnvFilter::try_new(level),
        })
        .map_err(|err| Error::Config(format!("invalid log filter: {err}")))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_names(true),
        )
        .try_init()
        .map_err(|err| Error::Config(format!("failed to initialize logging: {err}")))?;
    Ok(())
}
