use anyhow::Result;

use super::check_path::cmd_check_path;
use super::commands::Commands;
use super::config::cmd_config;
use super::context::CliContext;
use super::env::CliArgs;
use super::probe::cmd_probe;
use super::run::cmd_run;

pub async fn dispatch(cli: &CliArgs, ctx: &CliContext) -> Result<()> {
    match cli.command.clone() {
        Commands::Run(args) => cmd_run(args, ctx).await,
        Commands::Probe(args) => cmd_probe(args, ctx).await,
        Commands::CheckPath(args) => cmd_check_path(args, ctx),
        Commands::Config => cmd_config(ctx),
    }
}
