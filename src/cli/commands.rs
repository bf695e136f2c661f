use clap::Subcommand;

use super::check_path::CheckPathArgs;
use super::probe::ProbeArgs;
use super::run::RunArgs;

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Attach to the CRM tab and keep the Leads page refreshed until Ctrl-C
    Run(RunArgs),

    /// One dry-run locate pass against the current tab; nothing is clicked
    Probe(ProbeArgs),

    /// Report whether a path counts as the Leads page
    CheckPath(CheckPathArgs),

    /// Print the effective configuration
    Config,
}
