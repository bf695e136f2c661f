//! Wiring from configuration to a live agent.

use std::sync::Arc;

use action_locator::ControlLocator;
use anyhow::{Context, Result};
use cdp_adapter::{event_bus, CdpAdapter};
use host_perceiver::{AdapterPort, HostPort};
use refresh_scheduler::{LocateAndInvoke, NavigationWatcher, RefreshScheduler};
use tool_refresh::ActionInvoker;
use tracing::info;

use crate::config::AppConfig;

/// A browser connection attached to the CRM tab.
pub struct BrowserSession {
    adapter: Arc<CdpAdapter>,
    port: Arc<AdapterPort<CdpAdapter>>,
}

impl BrowserSession {
    pub async fn connect(config: &AppConfig) -> Result<Self> {
        let (bus, _rx) = event_bus(512);
        let adapter = Arc::new(CdpAdapter::new(config.cdp.clone(), bus));
        adapter
            .clone()
            .start()
            .await
            .context("browser unreachable over CDP")?;
        let page = adapter
            .attach_page(config.cdp.page_url_contains.as_deref())
            .await
            .context("no CRM tab to attach to")?;
        let port = AdapterPort::connect(adapter.clone(), page, config.host_options())
            .await
            .context("failed to register the page binding")?;
        info!(page = %page.0, "attached to CRM tab");
        Ok(Self { adapter, port })
    }

    pub fn host(&self) -> Arc<dyn HostPort> {
        self.port.clone()
    }

    pub async fn close(self) {
        self.port.shutdown();
        self.adapter.shutdown().await;
    }
}

/// Locator, invoker, scheduler and watcher over one host.
pub struct Agent {
    pub locator: Arc<ControlLocator>,
    pub scheduler: Arc<RefreshScheduler>,
    pub watcher: NavigationWatcher,
}

impl Agent {
    pub fn assemble(host: Arc<dyn HostPort>, config: &AppConfig) -> Result<Self> {
        let locator_config = config.locator_config()?;
        let target = locator_config.target.clone();
        let locator = Arc::new(ControlLocator::new(host.clone(), &locator_config));
        let action = Arc::new(LocateAndInvoke::new(
            locator.clone(),
            ActionInvoker::new(host.clone()),
        ));
        let timing = config.timing();
        let scheduler = Arc::new(RefreshScheduler::new(
            host.clone(),
            action,
            target,
            timing.refresh_interval,
        ));
        let watcher = NavigationWatcher::new(host, scheduler.clone(), timing);
        Ok(Self {
            locator,
            scheduler,
            watcher,
        })
    }
}
