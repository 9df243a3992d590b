use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

pub const LOG_ENV: &str = "CARELINK_LOG";
const DEFAULT_FILTER: &str = "carelink=info";
const LOG_FILE_PREFIX: &str = "carelink-backup.log";

fn env_filter() -> EnvFilter {
    EnvFilter::new(std::env::var(LOG_ENV).unwrap_or_else(|_| DEFAULT_FILTER.into()))
}

/// JSON lines on stderr, keeping stdout for command output. `log` records are
/// bridged by `try_init`. Calling it twice is harmless; the second call leaves
/// the first subscriber in place.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .json()
        .with_target(true)
        .with_timer(UtcTime::rfc_3339())
        .with_writer(std::io::stderr)
        .try_init();
}

/// Same as [`init_logging`] plus a daily rolling file under `dir`.
///
/// Keep the returned guard alive for as long as events should reach the
/// file; dropping it flushes the writer. Fails if a global subscriber is
/// already installed.
pub fn init_file_logging(dir: &Path) -> anyhow::Result<WorkerGuard> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create log directory {}", dir.display()))?;
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX));

    // `try_init` also installs the `log` bridge.
    Registry::default()
        .with(env_filter())
        .with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(std::io::stderr),
        )
        .with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_ansi(false)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(writer),
        )
        .try_init()
        .context("install file logging subscriber")?;
    Ok(guard)
}
