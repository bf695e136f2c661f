//! Navigation watcher: the one task that decides when the refresh timer runs.
//!
//! Boot readiness runs to completion before signals are read; signals that arrive in the
//! meantime wait in the broadcast buffer. At most one settle delay is pending and a newer
//! navigation replaces it.

use std::sync::Arc;

use autorefresh_core_types::{HostSignal, NavigationEvent, NavigationSource, TargetPage};
use host_perceiver::{HostPort, PerceiverError, Readiness};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SchedulerError;
use crate::metrics;
use crate::model::{StopReason, Timing};
use crate::readiness::{wait_for_host, BootReadiness};
use crate::scheduler::RefreshScheduler;

#[derive(Clone, Debug)]
enum Pending {
    Route(NavigationEvent),
    History,
}

#[derive(Debug)]
enum BootAttempt {
    Hooked,
    HookFailed(PerceiverError),
    NotReady {
        probes: u32,
        last: Readiness,
        error: Option<String>,
    },
}

impl BootAttempt {
    fn describe(&self) -> &'static str {
        match self {
            BootAttempt::Hooked => "hooked",
            BootAttempt::HookFailed(_) => "navigation hook failed",
            BootAttempt::NotReady { .. } => "host not ready",
        }
    }
}

#[derive(Debug)]
struct Settle {
    at: Instant,
    pending: Pending,
}

pub struct NavigationWatcher {
    host: Arc<dyn HostPort>,
    scheduler: Arc<RefreshScheduler>,
    target: TargetPage,
    timing: Timing,
    signals: broadcast::Receiver<HostSignal>,
    cancel: CancellationToken,
}

impl NavigationWatcher {
    /// Subscribes to host signals immediately, so nothing emitted after this call is lost.
    pub fn new(host: Arc<dyn HostPort>, scheduler: Arc<RefreshScheduler>, timing: Timing) -> Self {
        let signals = host.signals();
        let target = scheduler.target().clone();
        Self {
            host,
            scheduler,
            target,
            timing,
            signals,
            cancel: CancellationToken::new(),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn spawn(self) -> JoinHandle<Result<(), SchedulerError>> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) -> Result<(), SchedulerError> {
        let mut settle = self.boot().await;
        loop {
            let deadline = settle
                .as_ref()
                .map(|s| s.at)
                .unwrap_or_else(|| Instant::now() + self.timing.refresh_interval);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    self.scheduler.stop(StopReason::Shutdown);
                    return Ok(());
                }
                _ = time::sleep_until(deadline), if settle.is_some() => {
                    if let Some(s) = settle.take() {
                        self.apply(s.pending).await;
                    }
                }
                received = self.signals.recv() => match received {
                    Ok(signal) => {
                        metrics::record_signal();
                        settle = self.handle(signal, settle).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(target: "scheduler", skipped, "host signals lagged; re-checking path");
                        settle = Some(self.settle(Pending::History));
                    }
                    Err(RecvError::Closed) => {
                        self.scheduler.stop(StopReason::Teardown);
                        return Err(SchedulerError::SignalsClosed);
                    }
                },
            }
        }
    }

    fn settle(&self, pending: Pending) -> Settle {
        let delay = match pending {
            Pending::Route(_) => self.timing.route_settle,
            Pending::History => self.timing.history_settle,
        };
        Settle {
            at: Instant::now() + delay,
            pending,
        }
    }

    async fn handle(&self, signal: HostSignal, current: Option<Settle>) -> Option<Settle> {
        match signal {
            HostSignal::RouteChanged(event) => {
                debug!(target: "scheduler", event = "route", route = %event.route, "navigation");
                if current.is_some() {
                    debug!(target: "scheduler", "pending settle replaced");
                }
                Some(self.settle(Pending::Route(event)))
            }
            HostSignal::HistoryNavigated { path } => {
                debug!(target: "scheduler", event = "history", %path, "navigation");
                Some(self.settle(Pending::History))
            }
            HostSignal::Teardown => {
                info!(target: "scheduler", event = "teardown", "page teardown");
                self.scheduler.stop(StopReason::Teardown);
                None
            }
            HostSignal::DocumentReplaced { url } => {
                info!(target: "scheduler", event = "document", %url, "document replaced; rebooting");
                self.scheduler.stop(StopReason::DocumentReplaced);
                self.boot().await
            }
        }
    }

    /// History hook, readiness wait and router hook install, retried once if either falls
    /// short; then one look at the current route.
    async fn boot(&self) -> Option<Settle> {
        let mut attempt = self.attempt_boot().await;
        if !matches!(attempt, BootAttempt::Hooked) {
            info!(
                target: "scheduler",
                retry_ms = self.timing.boot_retry_delay.as_millis() as u64,
                reason = attempt.describe(),
                "boot incomplete; retrying"
            );
            tokio::select! {
                _ = self.cancel.cancelled() => return None,
                _ = time::sleep(self.timing.boot_retry_delay) => {}
            }
            attempt = self.attempt_boot().await;
        }
        metrics::record_boot(!matches!(attempt, BootAttempt::NotReady { .. }));
        match attempt {
            BootAttempt::Hooked => {}
            BootAttempt::HookFailed(err) => {
                warn!(target: "scheduler", %err, "navigation hook not installed; relying on document events");
            }
            BootAttempt::NotReady { probes, last, error } => {
                warn!(
                    target: "scheduler",
                    probes,
                    app_mounted = last.app_mounted,
                    router_present = last.router_present,
                    error = error.as_deref().unwrap_or(""),
                    "host never became ready"
                );
                return None;
            }
        }

        match self.host.current_route().await {
            Ok(Some(route)) if self.target.matches_route(&route) => {
                info!(target: "scheduler", event = "boot", %route, "booted on target page");
                Some(self.settle(Pending::Route(NavigationEvent::new(
                    route,
                    NavigationSource::Boot,
                ))))
            }
            Ok(route) => {
                debug!(target: "scheduler", event = "boot", route = ?route, "booted elsewhere");
                self.scheduler.stop(StopReason::Navigation);
                None
            }
            Err(err) => {
                debug!(target: "scheduler", %err, "current route unreadable");
                None
            }
        }
    }

    async fn attempt_boot(&self) -> BootAttempt {
        if let Err(err) = self.host.install_history_hook().await {
            debug!(target: "scheduler", %err, "history hook not installed");
        }
        if let BootReadiness::NotReady { probes, last, error } = self.wait().await {
            return BootAttempt::NotReady { probes, last, error };
        }
        match self.host.install_navigation_hook().await {
            Ok(()) => BootAttempt::Hooked,
            Err(err) => BootAttempt::HookFailed(err),
        }
    }

    async fn wait(&self) -> BootReadiness {
        wait_for_host(
            self.host.as_ref(),
            self.timing.boot_poll,
            self.timing.boot_timeout,
            &self.cancel,
        )
        .await
    }

    /// A settled navigation starts the timer only if the destination and the live path
    /// both point at the target page.
    async fn apply(&self, pending: Pending) {
        if let Pending::Route(event) = &pending {
            if !self.target.matches_route(&event.route) {
                self.scheduler.stop(StopReason::Navigation);
                return;
            }
        }
        match self.host.current_path().await {
            Ok(path) if self.target.is_target_page(&path) => {
                self.scheduler.start();
            }
            Ok(path) => {
                debug!(target: "scheduler", %path, "settled off target page");
                self.scheduler.stop(StopReason::Navigation);
            }
            Err(err) => {
                debug!(target: "scheduler", %err, "path unreadable after settle");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::RefreshAction;
    use crate::model::{SchedulerState, TickOutcome};
    use async_trait::async_trait;
    use autorefresh_core_types::RouteDescriptor;
    use host_perceiver::fake::FakeHost;
    use std::time::Duration;

    struct NoopAction;

    #[async_trait]
    impl RefreshAction for NoopAction {
        async fn refresh(&self) -> Result<TickOutcome, SchedulerError> {
            Ok(TickOutcome::NoControl)
        }
    }

    fn timing() -> Timing {
        Timing {
            refresh_interval: Duration::from_secs(30),
            route_settle: Duration::from_millis(150),
            history_settle: Duration::from_millis(80),
            boot_poll: Duration::from_millis(5),
            boot_timeout: Duration::ZERO,
            boot_retry_delay: Duration::from_millis(20),
        }
    }

    fn setup(path: &str) -> (Arc<FakeHost>, Arc<RefreshScheduler>, NavigationWatcher) {
        let host = Arc::new(FakeHost::new(path));
        let scheduler = Arc::new(RefreshScheduler::new(
            host.clone(),
            Arc::new(NoopAction),
            TargetPage::default(),
            Duration::from_secs(30),
        ));
        let watcher = NavigationWatcher::new(host.clone(), scheduler.clone(), timing());
        (host, scheduler, watcher)
    }

    fn route(name: &str, path: &str) -> HostSignal {
        HostSignal::RouteChanged(NavigationEvent::new(
            RouteDescriptor::named(name, path),
            NavigationSource::Router,
        ))
    }

    async fn sleep_ms(ms: u64) {
        time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test]
    async fn boot_on_target_page_starts_after_settle() {
        let (host, scheduler, watcher) = setup("/crm/leads");
        let cancel = watcher.cancel_token();
        let task = watcher.spawn();

        sleep_ms(40).await;
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(host.hook_installs(), 1);
        sleep_ms(250).await;
        assert_eq!(scheduler.state(), SchedulerState::Running);

        cancel.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test]
    async fn boot_retries_once_then_gives_up() {
        let (host, scheduler, watcher) = setup("/crm/leads");
        host.set_readiness(vec![Readiness::default()]);
        let cancel = watcher.cancel_token();
        let task = watcher.spawn();

        sleep_ms(200).await;
        assert_eq!(host.readiness_probes(), 2);
        assert_eq!(host.hook_installs(), 0);
        assert_eq!(host.history_hook_installs(), 2);
        assert_eq!(scheduler.state(), SchedulerState::Idle);

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn boot_succeeds_on_the_retry() {
        let (host, _scheduler, watcher) = setup("/crm/deals");
        host.set_readiness(vec![
            Readiness::default(),
            Readiness {
                app_mounted: true,
                router_present: true,
            },
        ]);
        let cancel = watcher.cancel_token();
        let task = watcher.spawn();

        sleep_ms(100).await;
        assert_eq!(host.readiness_probes(), 2);
        assert_eq!(host.hook_installs(), 1);

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn failed_hook_install_is_retried_after_the_delay() {
        let (host, scheduler, watcher) = setup("/crm/leads");
        host.fail_hook_installs(1);
        let cancel = watcher.cancel_token();
        let task = watcher.spawn();

        sleep_ms(10).await;
        assert_eq!(host.hook_installs(), 0);
        sleep_ms(60).await;
        assert_eq!(host.readiness_probes(), 2);
        assert_eq!(host.hook_installs(), 1);
        sleep_ms(250).await;
        assert_eq!(scheduler.state(), SchedulerState::Running);

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn hook_failing_twice_still_checks_the_current_route() {
        let (host, scheduler, watcher) = setup("/crm/leads");
        host.fail_hook_installs(2);
        let cancel = watcher.cancel_token();
        let task = watcher.spawn();

        sleep_ms(300).await;
        assert_eq!(host.hook_installs(), 0);
        assert_eq!(scheduler.state(), SchedulerState::Running);

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn navigation_round_trip_installs_one_timer_then_clears_it() {
        let (host, scheduler, watcher) = setup("/crm/deals");
        let cancel = watcher.cancel_token();
        let task = watcher.spawn();

        sleep_ms(40).await;
        assert_eq!(scheduler.state(), SchedulerState::Idle);

        host.set_path("/crm/leads");
        host.emit(route("Leads", "/crm/leads"));
        sleep_ms(30).await;
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        sleep_ms(250).await;
        let snap = scheduler.snapshot();
        assert_eq!(snap.state, SchedulerState::Running);
        assert_eq!(snap.timers_started, 1);
        assert!(snap.timer.is_some());

        host.set_path("/crm/deals");
        host.emit(route("Deals", "/crm/deals"));
        sleep_ms(300).await;
        let snap = scheduler.snapshot();
        assert_eq!(snap.state, SchedulerState::Idle);
        assert_eq!(snap.timer, None);
        assert_eq!(snap.ticks, 0);

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn newer_navigation_replaces_pending_settle() {
        let (host, scheduler, watcher) = setup("/crm/deals");
        let cancel = watcher.cancel_token();
        let task = watcher.spawn();
        sleep_ms(40).await;

        host.emit(route("Leads", "/crm/leads"));
        host.emit(route("Deals", "/crm/deals"));
        sleep_ms(300).await;
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(scheduler.snapshot().timers_started, 0);

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn history_navigation_rechecks_the_live_path() {
        let (host, scheduler, watcher) = setup("/crm/deals");
        let cancel = watcher.cancel_token();
        let task = watcher.spawn();
        sleep_ms(40).await;

        host.set_path("/leads");
        host.emit(HostSignal::HistoryNavigated {
            path: "/leads".into(),
        });
        sleep_ms(200).await;
        assert_eq!(scheduler.state(), SchedulerState::Running);

        host.set_path("/crm/deals");
        host.emit(HostSignal::HistoryNavigated {
            path: "/crm/deals".into(),
        });
        sleep_ms(200).await;
        assert_eq!(scheduler.state(), SchedulerState::Idle);

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn teardown_stops_and_document_replacement_reboots() {
        let (host, scheduler, watcher) = setup("/crm/leads");
        let cancel = watcher.cancel_token();
        let task = watcher.spawn();
        sleep_ms(250).await;
        assert_eq!(scheduler.state(), SchedulerState::Running);

        host.emit(HostSignal::Teardown);
        sleep_ms(30).await;
        assert_eq!(scheduler.state(), SchedulerState::Idle);

        host.emit(HostSignal::DocumentReplaced {
            url: "https://crm.example/crm/leads".into(),
        });
        sleep_ms(30).await;
        assert_eq!(host.hook_installs(), 2);
        sleep_ms(250).await;
        assert_eq!(scheduler.state(), SchedulerState::Running);

        cancel.cancel();
        task.await.unwrap().unwrap();
    }
}
