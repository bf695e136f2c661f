use anyhow::Result;
use clap::Args;
use serde::Serialize;

use super::context::CliContext;
use super::output::emit;

#[derive(Args, Clone, Debug)]
pub struct CheckPathArgs {
    /// Location path, e.g. `/crm/leads/view/list`
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct PathVerdict {
    pub path: String,
    pub target_page: bool,
    pub markers: Vec<String>,
}

pub fn cmd_check_path(args: CheckPathArgs, ctx: &CliContext) -> Result<()> {
    let target = ctx.config().target_page()?;
    let verdict = PathVerdict {
        target_page: target.is_target_page(&args.path),
        markers: target.path_markers().to_vec(),
        path: args.path,
    };
    emit(ctx.output(), &verdict, || {
        if verdict.target_page {
            format!("{}: Leads page", verdict.path)
        } else {
            format!("{}: not the Leads page", verdict.path)
        }
    })
}
