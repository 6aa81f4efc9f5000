//! Tracing setup: compact stdout output plus an append-only log file.
//!
//! `RUST_LOG` controls filtering (default `info`). The file target is
//! `DOCPIPE_LOG_FILE` when set, otherwise `logs/docpipe.log`. File writes go
//! through a non-blocking worker whose guard lives for the process.

use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static INIT: OnceLock<Option<WorkerGuard>> = OnceLock::new();

/// Install the global tracing subscriber.
///
/// Safe to call more than once; only the first call installs anything, so
/// library consumers and test harnesses can both invoke it unconditionally.
pub fn init_tracing() {
    INIT.get_or_init(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let stdout_layer = fmt::layer().with_target(false).compact();

        let (file_layer, guard) = match open_log_file() {
            Some(file) => {
                let (writer, guard) = tracing_appender::non_blocking(file);
                let layer = fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .compact();
                (Some(layer), Some(guard))
            }
            None => (None, None),
        };

        // try_init so a subscriber installed elsewhere is not an error.
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(stdout_layer)
            .with(file_layer)
            .try_init();
        guard
    });
}

fn open_log_file() -> Option<File> {
    let path = match std::env::var("DOCPIPE_LOG_FILE") {
        Ok(path) => PathBuf::from(path),
        Err(_) => {
            if let Err(error) = std::fs::create_dir_all("logs") {
                eprintln!("failed to create logs directory: {error}");
                return None;
            }
            PathBuf::from("logs/docpipe.log")
        }
    };
    match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => Some(file),
        Err(error) => {
            eprintln!("failed to open log file {}: {error}", path.display());
            None
        }
    }
}
