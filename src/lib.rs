//! PrivSh Privileged Shell Session Manager Library
//!
//! Manages a single long-lived privileged shell session: lazy channel
//! opening, liveness detection, FIFO command dispatch, and transparent
//! recovery when the channel dies.

pub mod cli;
pub mod config;
pub mod metrics;
pub mod session;
pub mod shell;

use std::path::Path;

use anyhow::{Context, Result};

/// Application result type for consistent error handling
pub type AppResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Initialize tracing subscribers for console and file logging.
///
/// The returned guard must be held for the lifetime of the process so the
/// non-blocking file writer flushes on exit.
pub fn init_logging(
    level: &str,
    log: &config::LogConfig,
) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let path = Path::new(&log.file_path);
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .unwrap_or_else(|| std::ffi::OsStr::new("privsh.log"));

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("privsh={}", level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    Ok(guard)
}
