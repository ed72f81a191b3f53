//! provides logging helpers

use std::env;
use std::path::Path;
use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;

/// When set, logs are additionally written to a daily rolling file at this path.
pub const LOG_PATH_ENV_VAR: &str = "REAPER_LOG_PATH";

const DEFAULT_LOG_PREFIX: &str = "reaper.log";

fn env_filter() -> filter::EnvFilter {
    filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy()
}

/// initiate the global tracing subscriber
///
/// The returned guard flushes the file writer on drop; hold it for the life of
/// the process. It is `None` when no log file was requested.
pub fn init() -> Option<WorkerGuard> {
    let fmt_layer = layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(env_filter());

    let log_path = env::var(LOG_PATH_ENV_VAR).ok().map(PathBuf::from);
    let Some(log_path) = log_path else {
        registry().with(fmt_layer).init();
        return None;
    };

    let (dir, prefix) = log_file_parts(&log_path);
    match RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix.as_str())
        .max_log_files(3)
        .build(&dir)
    {
        Ok(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(env_filter());
            registry().with(fmt_layer).with(file_layer).init();
            Some(guard)
        }
        Err(err) => {
            registry().with(fmt_layer).init();
            tracing::error!(
                "failed to create rolling file appender at {}: {err}; logging to stderr only",
                dir.display()
            );
            None
        }
    }
}

/// Splits a log path into the directory to rotate in and the file prefix.
///
/// An existing directory gets the default prefix.
pub fn log_file_parts(path: &Path) -> (PathBuf, String) {
    if path.is_dir() {
        return (path.to_path_buf(), DEFAULT_LOG_PREFIX.to_string());
    }
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    let prefix = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(DEFAULT_LOG_PREFIX)
        .to_string();
    (dir, prefix)
}
