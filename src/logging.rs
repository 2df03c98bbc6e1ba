//! Tracing subscriber setup.
//!
//! - [`init_probe`]: plain-text `<title>.log` for one worker plus stderr. The
//!   supervisor reads the last line of that file as the stream status, so it
//!   carries no ANSI colour and no JSON.
//! - [`init_daemon`]: daily-rotated JSON file plus stderr, for the supervisor.
//! - [`init_cli`]: stderr only.
//!
//! All modes honor `RUST_LOG` and default to `info`.

use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Keeps the background log writer alive.
///
/// Dropping it flushes buffered lines, so hold it until the process exits.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Create `dir`, then open the appender built by `open` inside it.
fn file_writer(
    dir: &Path,
    open: impl FnOnce() -> RollingFileAppender,
) -> anyhow::Result<(NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create log directory {}", dir.display()))?;
    Ok(tracing_appender::non_blocking(open()))
}

/// Initialise logging for a probe worker writing `<log_dir>/<file_name>`.
///
/// # Errors
///
/// Returns an error if the log directory cannot be created.
pub fn init_probe(log_dir: &Path, file_name: &str) -> anyhow::Result<LoggingGuard> {
    let (writer, guard) = file_writer(log_dir, || {
        tracing_appender::rolling::never(log_dir, file_name)
    })?;

    tracing_subscriber::registry()
        .with(env_filter())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(writer),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(LoggingGuard { _guard: guard })
}

/// Initialise logging for the supervisor daemon.
///
/// JSON lines go to `{logs_dir}/{prefix}.YYYY-MM-DD`.
///
/// # Errors
///
/// Returns an error if the logs directory cannot be created.
pub fn init_daemon(logs_dir: &Path, prefix: &str) -> anyhow::Result<LoggingGuard> {
    let (writer, guard) = file_writer(logs_dir, || {
        tracing_appender::rolling::daily(logs_dir, prefix)
    })?;

    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(LoggingGuard { _guard: guard })
}

/// Initialise console-only logging for one-shot commands.
pub fn init_cli() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .init();
}
