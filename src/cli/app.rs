use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, error};

use super::context::CliContext;
use super::dispatch::dispatch;
use super::env::CliArgs;
use super::runtime::{init_logging, LogOptions};
use crate::config;

pub async fn run() -> Result<()> {
    let cli = CliArgs::parse();

    init_logging(&LogOptions {
        level: &cli.log_level,
        debug: cli.debug,
        json: cli.log_json,
        file: cli.log_file.as_deref(),
    })?;
    debug!("crm-autorefresh v{}", env!("CARGO_PKG_VERSION"));

    let loaded = config::load(cli.config.as_deref()).context("configuration rejected")?;
    match &loaded.source {
        Some(path) => debug!(path = %path.display(), "loaded configuration file"),
        None => debug!("no configuration file; using defaults and environment"),
    }
    let ctx = CliContext::new(loaded, cli.output);

    dispatch(&cli, &ctx).await.map_err(|err| {
        error!("command failed: {err:#}");
        err
    })
}
