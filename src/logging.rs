//! Logging configuration.
//!
//! Structured logging with tracing. Debug mode raises the default level;
//! a configured log file gets a second plain-text layer while stdout
//! logging stays on.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initializes the global subscriber.
pub fn init(debug_mode: bool, log_file_path: &str) -> Result<()> {
    let level = if debug_mode { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("onionmux={level}")));

    let stdout_layer = fmt::layer().with_target(true);

    if log_file_path.is_empty() {
        tracing_subscriber::registry()
            .with(filter)
            .with(stdout_layer)
            .init();
        return Ok(());
    }

    let file = std::fs::File::options()
        .create(true)
        .append(true)
        .open(log_file_path)
        .with_context(|| format!("failed to open log file {log_file_path}"))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(fmt::layer().with_ansi(false).with_writer(Arc::new(file)))
        .init();

    Ok(())
}
