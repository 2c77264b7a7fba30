//! # Logging
//!
//! Installs the global `tracing` subscriber. Every event goes both to stderr
//! and to the configured log file, formatted as
//! `timestamp level target: message`.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;

/// Initialize logging to stderr and to `config.file`
///
/// `RUST_LOG` takes precedence over `config.level` when set.
///
/// # Errors
///
/// Fails if the log file cannot be opened (for example when the path names a
/// directory), the level is invalid, or a subscriber is already installed.
///
/// # Returns
///
/// * `WorkerGuard` - Must be held for the life of the process; dropping it
///   flushes and stops the background file writer.
pub fn init(config: &LoggingConfig) -> Result<WorkerGuard> {
    let (dir, file_name) = split_log_path(&config.file);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("creating log directory {}", dir.display()))?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(&file_name)
        .build(&dir)
        .with_context(|| format!("opening log file {}", config.file))?;
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .with_context(|| format!("invalid log level '{}'", config.level))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .try_init()
        .context("installing tracing subscriber")?;

    Ok(guard)
}

/// Split a log path into the directory and the file name
fn split_log_path(path: &str) -> (PathBuf, String) {
    let path = Path::new(path);
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "transmit.log".to_string());
    (dir, file_name)
}
