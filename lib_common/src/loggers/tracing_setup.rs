//! # Tracing Setup
//!
//! Installs the process-wide `tracing` subscriber used by every server binary:
//!
//! - an `EnvFilter` built from `RUST_LOG`, falling back to the configured level;
//! - a human-readable console layer;
//! - a JSON layer writing to a daily-rolling file through a non-blocking writer.
//!
//! The returned [`WorkerGuard`] flushes the file writer when dropped, so `main`
//! must hold it for the life of the process.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{Builder, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Rolled files kept on disk by [`setup_logging`].
pub const DEFAULT_RETAINED_LOGS: usize = 7;

/// Errors raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum LoggerError {
    /// The log directory could not be created or listed.
    #[error("log directory error: {0}")]
    Io(#[from] std::io::Error),
    /// The level string is not a valid filter directive.
    #[error("invalid log filter '{0}'")]
    Filter(String),
    /// The rolling file appender could not be built.
    #[error("failed to create log file appender: {0}")]
    Appender(String),
    /// A global subscriber is already installed.
    #[error("failed to install tracing subscriber: {0}")]
    Init(String),
}

/// # Setup Logging
///
/// Creates `log_dir` if needed, prunes old files for `app_name`, and installs the
/// global subscriber. Files are named `{app_name}.{date}.log`.
pub fn setup_logging(log_dir: &Path, level: &str, app_name: &str) -> Result<WorkerGuard, LoggerError> {
    fs::create_dir_all(log_dir)?;
    cleanup_old_logs(log_dir, app_name, DEFAULT_RETAINED_LOGS)?;

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).map_err(|_| LoggerError::Filter(level.to_string()))?,
    };

    let appender = Builder::new()
        .rotation(Rotation::DAILY)
        .filename_prefix(app_name)
        .filename_suffix("log")
        .build(log_dir)
        .map_err(|e| LoggerError::Appender(e.to_string()))?;
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .with(fmt::layer().json().with_ansi(false).with_writer(file_writer))
        .try_init()
        .map_err(|e| LoggerError::Init(e.to_string()))?;

    Ok(guard)
}

/// Deletes all but the `keep` newest `{app_name}.*.log` files in `log_dir`.
///
/// Returns how many files were removed. Files that cannot be deleted are skipped.
pub fn cleanup_old_logs(log_dir: &Path, app_name: &str, keep: usize) -> Result<usize, LoggerError> {
    let prefix = format!("{}.", app_name);

    let mut logs: Vec<(SystemTime, PathBuf)> = fs::read_dir(log_dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            name.starts_with(&prefix) && name.ends_with(".log")
        })
        .map(|entry| {
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, entry.path())
        })
        .collect();

    // Newest first; the date in the file name breaks mtime ties.
    logs.sort_by(|a, b| b.cmp(a));

    let mut removed = 0;
    for (_, path) in logs.iter().skip(keep) {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => eprintln!("Failed to delete old log file {}: {}", path.display(), e),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_the_newest_files_of_the_app() {
        let dir = tempfile::tempdir().unwrap();
        for day in 1..=5 {
            fs::write(dir.path().join(format!("server_ingest.2026-10-0{}.log", day)), "{}").unwrap();
        }
        fs::write(dir.path().join("server_relay.2026-10-01.log"), "{}").unwrap();
        fs::write(dir.path().join("notes.txt"), "keep me").unwrap();

        assert_eq!(cleanup_old_logs(dir.path(), "server_ingest", 2).unwrap(), 3);

        let mut left: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(
            left,
            [
                "notes.txt",
                "server_ingest.2026-10-04.log",
                "server_ingest.2026-10-05.log",
                "server_relay.2026-10-01.log",
            ]
        );
    }

    #[test]
    fn empty_directory_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(cleanup_old_logs(dir.path(), "server_ingest", 0).unwrap(), 0);
    }
}
