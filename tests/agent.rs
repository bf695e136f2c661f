use std::sync::Arc;
use std::time::Duration;

use autorefresh_core_types::{HostSignal, NavigationEvent, NavigationSource, RouteDescriptor};
use crm_autorefresh::{Agent, AppConfig};
use host_perceiver::fake::{FakeHost, SnapshotBuilder};
use refresh_scheduler::SchedulerState;

fn fast_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.timing.refresh_interval_ms = 50;
    config.timing.route_settle_ms = 80;
    config.timing.history_settle_ms = 40;
    config.timing.boot_poll_ms = 5;
    config.timing.boot_timeout_ms = 100;
    config.timing.boot_retry_delay_ms = 20;
    config
}

#[tokio::test]
async fn assembled_agent_refreshes_only_while_on_leads() {
    let host = Arc::new(FakeHost::new("/crm/deals"));
    let mut b = SnapshotBuilder::new("/crm/leads");
    let toolbar = b.element(None, "div");
    b.element(Some(toolbar), "button");
    let refresh = b.element(Some(toolbar), "button");
    b.attr(refresh, "aria-label", "Refresh");
    host.set_snapshot(b.build());

    let agent = Agent::assemble(host.clone(), &fast_config()).unwrap();
    let scheduler = agent.scheduler.clone();
    let cancel = agent.watcher.cancel_token();
    let task = agent.watcher.spawn();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(scheduler.state(), SchedulerState::Idle);

    host.set_path("/crm/leads");
    host.emit(HostSignal::RouteChanged(NavigationEvent::new(
        RouteDescriptor::named("Leads", "/crm/leads"),
        NavigationSource::Router,
    )));
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(scheduler.state(), SchedulerState::Running);
    assert!(!host.activations().is_empty());

    host.set_path("/crm/deals");
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(scheduler.state(), SchedulerState::Idle);
    let count = host.activations().len();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(host.activations().len(), count);

    cancel.cancel();
    task.await.unwrap().unwrap();
}

#[test]
fn assemble_rejects_an_invalid_target() {
    let host = Arc::new(FakeHost::new("/crm/leads"));
    let mut config = AppConfig::default();
    config.target.path_markers.clear();
    assert!(Agent::assemble(host, &config).is_err());
}
