use std::path::Path;

use anyhow::{anyhow, Context, Result};
use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static LOG_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

pub struct LogOptions<'a> {
    pub level: &'a str,
    pub debug: bool,
    pub json: bool,
    pub file: Option<&'a Path>,
}

/// Logs go to stderr (or `file`); stdout is reserved for command output.
pub fn init_logging(opts: &LogOptions<'_>) -> Result<()> {
    let level = if opts.debug {
        tracing::Level::DEBUG
    } else {
        opts.level.parse().context("Invalid log level")?
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let (writer, guard) = match opts.file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| anyhow!("log file path has no file name: {}", path.display()))?;
            tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name))
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };
    let _ = LOG_GUARD.set(guard);

    let registry = tracing_subscriber::registry().with(filter);
    let result = if opts.json {
        registry
            .with(fmt::layer().json().with_writer(writer))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_ansi(opts.file.is_none()).with_writer(writer))
            .try_init()
    };
    result.context("logging already initialised")
}
