use action_locator::{ControlLocator, ControlResolver, LocateReport};
use anyhow::{Context, Result};
use autorefresh_core_types::RouteDescriptor;
use clap::Args;
use host_perceiver::{HostPort, Readiness};
use serde::Serialize;

use super::context::CliContext;
use super::output::emit;
use super::run::ConnectArgs;
use crate::session::BrowserSession;

#[derive(Args, Clone, Debug)]
pub struct ProbeArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
}

#[derive(Debug, Serialize)]
pub struct ProbeReport {
    pub path: String,
    pub target_page: bool,
    pub readiness: Readiness,
    pub route: Option<RouteDescriptor>,
    pub locate: LocateReport,
}

impl ProbeReport {
    fn render_human(&self) -> String {
        let mut out = format!(
            "path: {} ({})\n",
            self.path,
            if self.target_page {
                "Leads page"
            } else {
                "not the Leads page"
            }
        );
        out.push_str(&format!(
            "host ready: {} (app mounted: {}, router: {})\n",
            self.readiness.is_ready(),
            self.readiness.app_mounted,
            self.readiness.router_present
        ));
        if let Some(route) = &self.route {
            out.push_str(&format!("route: {route}\n"));
        }
        out.push_str(&format!(
            "snapshot #{}{}\n",
            self.locate.seq,
            if self.locate.truncated {
                " (truncated)"
            } else {
                ""
            }
        ));
        for outcome in &self.locate.outcomes {
            let verdict = match (&outcome.candidate, &outcome.error) {
                (Some(candidate), _) => format!(
                    "found {}{}",
                    candidate.target,
                    candidate
                        .label
                        .as_deref()
                        .map(|l| format!(" \"{l}\""))
                        .unwrap_or_default()
                ),
                (None, Some(err)) => format!("failed: {err}"),
                (None, None) => "nothing".to_string(),
            };
            out.push_str(&format!("  {:<14} {verdict}\n", outcome.strategy.name()));
        }
        match &self.locate.chosen {
            Some(candidate) => out.push_str(&format!(
                "would refresh via {} -> {}",
                candidate.strategy, candidate.target
            )),
            None => out.push_str("no refresh control found"),
        }
        out
    }
}

pub async fn cmd_probe(args: ProbeArgs, ctx: &CliContext) -> Result<()> {
    let mut config = ctx.config().clone();
    args.connect.apply(&mut config);
    config.validate().context("invalid probe options")?;

    let session = BrowserSession::connect(&config).await?;
    let report = probe(&session, &config).await;
    session.close().await;
    let report = report?;
    emit(ctx.output(), &report, || report.render_human())
}

async fn probe(session: &BrowserSession, config: &crate::AppConfig) -> Result<ProbeReport> {
    let host = session.host();
    let target = config.target_page()?;
    let path = host.current_path().await.context("could not read the tab path")?;
    let readiness = host.probe_readiness().await.unwrap_or_default();
    let route = host.current_route().await.ok().flatten();
    let locator = ControlLocator::new(host, &config.locator_config()?);
    let locate = locator.explain().await.context("snapshot failed")?;
    Ok(ProbeReport {
        target_page: target.is_target_page(&path),
        path,
        readiness,
        route,
        locate,
    })
}
