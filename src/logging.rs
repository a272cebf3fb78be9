//! Logging setup for the command-line programs.
//!
//! Installs a global tracing subscriber writing to stdout and to a per-invocation
//! log file under `<crossfold home>/logs`. Files are named after the program and
//! a local timestamp; each program keeps its own newest files.

use std::{
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
    sync::OnceLock,
    time::SystemTime,
};

use time::{OffsetDateTime, UtcOffset, format_description::FormatItem, macros::format_description};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*};

use crate::app_dirs;

/// Log files retained per program.
const MAX_LOG_FILES: usize = 10;
const DEFAULT_FILTER: &str = "info";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("No suitable base directory available for logs")]
    NoBaseDir,
    #[error("Failed to prepare log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to read log directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to remove old log file {path}: {source}")]
    RemoveFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to format log filename time: {0}")]
    FormatTime(time::error::Format),
    #[error("Failed to install global tracing subscriber: {0}")]
    SetGlobal(tracing::subscriber::SetGlobalDefaultError),
    #[error("Failed to create log file at {path}: {source}")]
    CreateLogFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Initialize tracing for `program` (e.g. `crossfold-train`).
///
/// `RUST_LOG` overrides the default `info` filter. Subsequent calls are no-ops.
pub fn init(program: &str) -> Result<PathBuf, LoggingError> {
    let log_dir = app_dirs::logs_dir().map_err(map_app_dir_error)?;
    let log_file_name = format_log_file_name(program, now_local_or_utc())?;
    let log_path = log_dir.join(&log_file_name);
    if LOG_GUARD.get().is_some() {
        return Ok(log_path);
    }
    ensure_file_exists(&log_path)?;

    let (file_writer, guard) =
        tracing_appender::non_blocking(rolling::never(&log_dir, &log_file_name));
    prune_old_logs(&log_dir, program, MAX_LOG_FILES)?;

    let timer = build_timer();
    let stdout_layer = fmt::layer()
        .with_target(false)
        .with_timer(timer.clone())
        .with_writer(std::io::stdout);
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_timer(timer)
        .with_writer(file_writer);

    let subscriber = Registry::default()
        .with(build_env_filter())
        .with(stdout_layer)
        .with(file_layer);
    tracing::subscriber::set_global_default(subscriber).map_err(LoggingError::SetGlobal)?;
    let _ = LOG_GUARD.set(guard);

    tracing::info!("{program} logging to {}", log_path.display());
    Ok(log_path)
}

fn ensure_file_exists(path: &Path) -> Result<(), LoggingError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map(|_| ())
        .map_err(|source| LoggingError::CreateLogFile {
            path: path.to_path_buf(),
            source,
        })
}

/// Remove the oldest `{program}_*.log` files beyond `max_files`.
fn prune_old_logs(dir: &Path, program: &str, max_files: usize) -> Result<(), LoggingError> {
    let prefix = format!("{program}_");
    let mut entries = fs::read_dir(dir)
        .map_err(|source| LoggingError::ReadDir {
            path: dir.to_path_buf(),
            source,
        })?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|ft| ft.is_file()).unwrap_or(false))
        .filter(|entry| {
            let path = entry.path();
            path.extension().and_then(|ext| ext.to_str()) == Some("log")
                && path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with(&prefix))
        })
        .map(|entry| {
            let modified = entry
                .metadata()
                .and_then(|meta| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, entry.path())
        })
        .collect::<Vec<_>>();

    entries.sort_by_key(|(modified, _)| *modified);
    let excess = entries.len().saturating_sub(max_files);
    for (_, path) in entries.into_iter().take(excess) {
        fs::remove_file(&path).map_err(|source| LoggingError::RemoveFile { path, source })?;
    }
    Ok(())
}

fn format_log_file_name(program: &str, now: OffsetDateTime) -> Result<String, LoggingError> {
    const NAME_FORMAT: &[FormatItem<'_>] =
        format_description!("[year]-[month]-[day]_[hour]-[minute]-[second]");
    let name = now.format(NAME_FORMAT).map_err(LoggingError::FormatTime)?;
    Ok(format!("{program}_{name}.log"))
}

fn build_timer() -> fmt::time::OffsetTime<time::format_description::BorrowedFormatItem<'static>> {
    const DISPLAY_FORMAT: &[FormatItem<'static>] =
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    fmt::time::OffsetTime::new(offset, DISPLAY_FORMAT.into())
}

fn now_local_or_utc() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

fn map_app_dir_error(error: app_dirs::AppDirError) -> LoggingError {
    match error {
        app_dirs::AppDirError::NoBaseDir => LoggingError::NoBaseDir,
        app_dirs::AppDirError::CreateDir { path, source } => {
            LoggingError::CreateDir { path, source }
        }
    }
}
