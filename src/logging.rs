//! Tracing subscriber setup

use anyhow::Context;
use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Rotated log files kept next to the active one
pub const LOG_FILES_KEPT: usize = 5;

/// Initialize logging.
///
/// `RUST_LOG` takes precedence over `level`. With `log_file` set, output goes
/// to a daily-rotated file instead of stderr. The returned guard flushes the
/// background writer when dropped, so hold it until exit.
pub fn init_logging(
    level: &str,
    log_file: Option<&Path>,
) -> anyhow::Result<Option<WorkerGuard>> {
    let level = parse_log_level(level)?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_lowercase()));

    let registry = tracing_subscriber::registry().with(env_filter);

    if let Some(path) = log_file {
        let (writer, guard) = tracing_appender::non_blocking(file_appender(path)?);
        let layer = fmt::layer()
            .with_ansi(false)
            .with_thread_ids(true)
            .with_writer(writer);
        registry.with(layer).try_init()?;
        Ok(Some(guard))
    } else {
        registry
            .with(fmt::layer().with_thread_ids(true))
            .try_init()?;
        Ok(None)
    }
}

/// Daily-rotated appender writing `<path>.<date>`, keeping [`LOG_FILES_KEPT`]
/// files
pub fn file_appender(path: &Path) -> anyhow::Result<RollingFileAppender> {
    let prefix = path
        .file_name()
        .with_context(|| format!("log file {} has no file name", path.display()))?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix.to_string_lossy())
        .max_log_files(LOG_FILES_KEPT)
        .build(dir)
        .with_context(|| format!("opening log file {}", path.display()))
}

/// Parse a log level name
pub fn parse_log_level(level: &str) -> anyhow::Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(anyhow::anyhow!("Invalid log level: {level}")),
    }
}
