//! Logger

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log to stderr, filtered by `RUST_LOG` (default `info`), and optionally
/// to `log_file`, filtered by `RUST_LOG_FILE` (default `debug`).
pub fn init(log_file: Option<&Path>, append: bool) -> Result<(), anyhow::Error> {
    let term_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let term_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(term_filter);

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .append(append)
                .truncate(!append)
                .open(path)
                .with_context(|| format!("Unable to open log file {:?}", path))?;
            let file_filter =
                EnvFilter::try_from_env("RUST_LOG_FILE").unwrap_or_else(|_| EnvFilter::new("debug"));

            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(file_filter),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(term_layer)
        .with(file_layer)
        .try_init()
        .context("Unable to initialize logger")
}
