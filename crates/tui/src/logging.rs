use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Routes `tracing` output to `<data_dir>/blue/logs/blue.log`.
///
/// The terminal belongs to the UI, so nothing is written to stdout or stderr.
/// Filter directives come from `BLUE_LOG` (default `info`). Keep the returned
/// guard alive for the life of the process or buffered lines are lost.
pub fn init() -> Result<WorkerGuard> {
    let dir = crate::store::log_dir()?;
    std::fs::create_dir_all(&dir).with_context(|| format!("create log dir: {}", dir.display()))?;
    let file_appender = tracing_appender::rolling::never(&dir, "blue.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_env("BLUE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true),
        )
        .with(filter)
        .try_init()
        .context("install tracing subscriber")?;
    Ok(guard)
}
