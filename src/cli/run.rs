use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use refresh_scheduler::{LifecycleEvent, SchedulerSnapshot, StopReason};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::context::CliContext;
use super::output::emit;
use crate::config::AppConfig;
use crate::metrics::{self, MetricsSummary};
use crate::session::{Agent, BrowserSession};

/// How to reach the browser; each flag overrides the `cdp` config section.
#[derive(Args, Clone, Debug, Default)]
pub struct ConnectArgs {
    /// DevTools browser websocket URL (ws://...)
    #[arg(long, value_name = "URL")]
    pub ws_url: Option<String>,

    /// DevTools HTTP endpoint used to discover the websocket URL
    #[arg(long, value_name = "URL")]
    pub http_endpoint: Option<String>,

    /// Attach to the first tab whose URL contains this text
    #[arg(long, value_name = "TEXT")]
    pub page_url: Option<String>,

    /// Launch a dedicated Chromium instead of attaching
    #[arg(long)]
    pub launch: bool,

    /// Run the launched Chromium headless
    #[arg(long, requires = "launch")]
    pub headless: bool,

    /// Open this URL when no tab matches
    #[arg(long, value_name = "URL")]
    pub start_url: Option<String>,
}

impl ConnectArgs {
    pub fn apply(&self, config: &mut AppConfig) {
        let cdp = &mut config.cdp;
        if let Some(ws) = &self.ws_url {
            cdp.websocket_url = Some(ws.clone());
        }
        if let Some(endpoint) = &self.http_endpoint {
            cdp.http_endpoint = endpoint.clone();
        }
        if let Some(filter) = &self.page_url {
            cdp.page_url_contains = Some(filter.clone());
        }
        if self.launch {
            cdp.launch = true;
            cdp.headless = self.headless;
        }
        if let Some(url) = &self.start_url {
            cdp.start_url = Some(url.clone());
        }
    }
}

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,

    /// Refresh interval, e.g. `30s` or `2m`
    #[arg(long, value_parser = humantime::parse_duration)]
    pub interval: Option<Duration>,
}

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub scheduler: SchedulerSnapshot,
    pub metrics: MetricsSummary,
}

impl RunSummary {
    fn render_human(&self) -> String {
        let elapsed = (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default();
        format!(
            "run {} finished after {}\n{}",
            self.run_id,
            humantime::format_duration(Duration::from_secs(elapsed.as_secs())),
            self.metrics.render_human()
        )
    }
}

pub async fn cmd_run(args: RunArgs, ctx: &CliContext) -> Result<()> {
    let mut config = ctx.config().clone();
    args.connect.apply(&mut config);
    if let Some(interval) = args.interval {
        config.timing.refresh_interval_ms = interval.as_millis() as u64;
    }
    config.validate().context("invalid run options")?;

    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    let span = info_span!("run", %run_id);
    let scheduler = async {
        let session = BrowserSession::connect(&config).await?;
        let agent = Agent::assemble(session.host(), &config)?;
        let scheduler = agent.scheduler.clone();
        let cancel = agent.watcher.cancel_token();
        let mut lifecycle = scheduler.subscribe();
        let mut watcher = agent.watcher.spawn();
        info!(
            interval = %humantime::format_duration(config.timing().refresh_interval),
            "watching for the Leads page; Ctrl-C to stop"
        );

        let finished = loop {
            tokio::select! {
                interrupted = tokio::signal::ctrl_c() => {
                    interrupted.context("failed to listen for Ctrl-C")?;
                    info!("interrupt received; shutting down");
                    break None;
                }
                joined = &mut watcher => break Some(joined),
                event = lifecycle.recv() => match event {
                    Ok(LifecycleEvent::Ticked { tick, outcome }) => {
                        debug!(%tick, outcome = ?outcome, "tick");
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break None,
                },
            }
        };

        cancel.cancel();
        let joined = match finished {
            Some(joined) => joined,
            None => watcher.await,
        };
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(%err, "watcher stopped"),
            Err(err) => warn!(%err, "watcher task failed"),
        }
        scheduler.stop(StopReason::Shutdown);
        session.close().await;
        anyhow::Ok(scheduler.snapshot())
    }
    .instrument(span)
    .await?;

    let summary = RunSummary {
        run_id,
        started_at,
        finished_at: Utc::now(),
        scheduler,
        metrics: metrics::summary(),
    };
    info!(
        %run_id,
        ticks = summary.scheduler.ticks,
        timers = summary.scheduler.timers_started,
        snapshots = summary.metrics.snapshots.total,
        "run finished"
    );
    emit(ctx.output(), &summary, || summary.render_human())
}
