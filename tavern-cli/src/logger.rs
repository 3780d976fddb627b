//! Tracing initialisation: fmt layer to stderr, optionally teed to an append-mode log file.

use std::fs::OpenOptions;
use std::io;
use std::sync::Arc;

use tracing_subscriber::{
    fmt::writer::MakeWriterExt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
    Registry,
};

/// Installs the global subscriber. Level comes from `RUST_LOG` (default `info`),
/// so `.env` must be loaded before calling this.
///
/// Logs go to stderr so command output on stdout stays clean; with `log_file`
/// set, the same lines are appended to that file.
pub fn init_tracing(log_file: Option<&str>) -> anyhow::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let base = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false);

    let result = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let writer = io::stderr.and(Arc::new(file));
            Registry::default()
                .with(env_filter)
                .with(base.with_writer(writer))
                .try_init()
        }
        None => Registry::default()
            .with(env_filter)
            .with(base.with_writer(io::stderr))
            .try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("Failed to set global subscriber: {}", e))
}
