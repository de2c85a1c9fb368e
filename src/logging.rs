//! Logging infrastructure for the host.
//!
//! Provides dual output to both stdout and log files with configurable levels.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Log directory name within the application data directory
const LOG_DIR_NAME: &str = "logs";

/// Default log level when RUST_LOG is not set
const DEFAULT_LOG_LEVEL: &str = "info";

/// Initializes the logging system with both stdout and file output.
///
/// # Arguments
///
/// * `log_dir` - Optional path to a custom log directory. If `None`, uses a default location.
///
/// # Returns
///
/// A `WorkerGuard` that must be kept alive for the duration of the program
/// to ensure logs are flushed. Use `mem::forget(guard)` if you don't need
/// explicit control over when logs are flushed.
pub fn init_logging(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));

    let log_dir = log_dir.unwrap_or_else(|| Path::new(LOG_DIR_NAME));

    std::fs::create_dir_all(log_dir).expect("failed to create log directory");

    let file_appender = tracing_appender::rolling::daily(log_dir, "repo-agent-host.log");
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(true)
        .with_filter(env_filter.clone());

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_filter(env_filter.clone());

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .init();

    tracing::info!(
        log_dir = %log_dir.display(),
        "logging system initialized"
    );

    Some(guard)
}

/// Resolves the platform-appropriate log directory and initializes logging.
///
/// Mirrors the teacher's desktop-app directory resolution, renamed to this
/// crate's product identity.
#[cfg(target_os = "macos")]
pub fn init_host_logging() -> Option<WorkerGuard> {
    let log_dir = dirs::home_dir().map(|p| p.join("Library").join("Logs").join("RepoAgentHost"));
    init_logging(log_dir.as_deref())
}

#[cfg(target_os = "windows")]
pub fn init_host_logging() -> Option<WorkerGuard> {
    let log_dir = dirs::data_local_dir().map(|p| p.join("RepoAgentHost").join("logs"));
    init_logging(log_dir.as_deref())
}

#[cfg(target_os = "linux")]
pub fn init_host_logging() -> Option<WorkerGuard> {
    let log_dir = dirs::state_dir().map(|p| p.join("repo-agent-host").join("logs"));
    init_logging(log_dir.as_deref())
}

#[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
pub fn init_host_logging() -> Option<WorkerGuard> {
    init_logging(None)
}
