//! Periodic refresh timer with an explicit Idle/Running state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use autorefresh_core_types::{TargetPage, TickId};
use host_perceiver::HostPort;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::action::RefreshAction;
use crate::events::{lifecycle_channel, LifecycleEvent, LifecycleReceiver, LifecycleSender};
use crate::metrics;
use crate::model::{SchedulerSnapshot, SchedulerState, StopReason, TickOutcome};

struct TimerHandle {
    id: u64,
    cancel: CancellationToken,
    _task: JoinHandle<()>,
}

struct Shared {
    host: Arc<dyn HostPort>,
    action: Arc<dyn RefreshAction>,
    target: TargetPage,
    interval: Duration,
    timer: Mutex<Option<TimerHandle>>,
    next_timer: AtomicU64,
    timers_started: AtomicU64,
    ticks: AtomicU64,
    events: LifecycleSender,
}

impl Shared {
    /// Clear the live timer. With `only`, a newer timer is left alone.
    fn clear(&self, only: Option<u64>, reason: StopReason) -> bool {
        let handle = {
            let mut guard = self.timer.lock();
            match (guard.as_ref(), only) {
                (Some(h), Some(id)) if h.id != id => None,
                _ => guard.take(),
            }
        };
        let Some(handle) = handle else {
            return false;
        };
        handle.cancel.cancel();
        metrics::record_stop();
        info!(target: "scheduler", timer = handle.id, %reason, state = "idle", "auto-refresh stopped");
        let _ = self.events.send(LifecycleEvent::Stopped {
            timer: handle.id,
            reason,
        });
        true
    }

    async fn tick(&self) -> TickOutcome {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        metrics::record_tick();
        let outcome = match self.host.current_path().await {
            Err(err) => TickOutcome::Failed {
                error: err.to_string(),
            },
            Ok(path) if !self.target.is_target_page(&path) => {
                debug!(target: "scheduler", %path, "tick off target page");
                TickOutcome::OffTarget
            }
            Ok(_) => match self.action.refresh().await {
                Ok(outcome) => outcome,
                Err(err) => TickOutcome::Failed {
                    error: err.to_string(),
                },
            },
        };
        match &outcome {
            TickOutcome::Performed { .. } => metrics::record_performed(),
            TickOutcome::OffTarget => metrics::record_off_target(),
            TickOutcome::Failed { error } => {
                metrics::record_tick_failure();
                warn!(target: "scheduler", %error, "tick failed");
            }
            _ => {}
        }
        outcome
    }
}

/// Owns at most one refresh timer. Independent instances do not share state.
pub struct RefreshScheduler {
    shared: Arc<Shared>,
}

impl RefreshScheduler {
    pub fn new(
        host: Arc<dyn HostPort>,
        action: Arc<dyn RefreshAction>,
        target: TargetPage,
        interval: Duration,
    ) -> Self {
        let (events, _) = lifecycle_channel(64);
        Self {
            shared: Arc::new(Shared {
                host,
                action,
                target,
                interval,
                timer: Mutex::new(None),
                next_timer: AtomicU64::new(1),
                timers_started: AtomicU64::new(0),
                ticks: AtomicU64::new(0),
                events,
            }),
        }
    }

    /// Install the timer. Returns false when already running.
    pub fn start(&self) -> bool {
        let mut guard = self.shared.timer.lock();
        if guard.is_some() {
            return false;
        }
        let id = self.shared.next_timer.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_timer(self.shared.clone(), id, cancel.clone()));
        *guard = Some(TimerHandle {
            id,
            cancel,
            _task: task,
        });
        drop(guard);

        self.shared.timers_started.fetch_add(1, Ordering::Relaxed);
        metrics::record_start();
        info!(
            target: "scheduler",
            timer = id,
            interval_ms = self.shared.interval.as_millis() as u64,
            state = "running",
            "auto-refresh started"
        );
        let _ = self.shared.events.send(LifecycleEvent::Started { timer: id });
        true
    }

    /// Clear the timer if present. Returns false when already idle.
    pub fn stop(&self, reason: StopReason) -> bool {
        self.shared.clear(None, reason)
    }

    pub fn state(&self) -> SchedulerState {
        if self.shared.timer.lock().is_some() {
            SchedulerState::Running
        } else {
            SchedulerState::Idle
        }
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        let timer = self.shared.timer.lock().as_ref().map(|h| h.id);
        SchedulerSnapshot {
            state: if timer.is_some() {
                SchedulerState::Running
            } else {
                SchedulerState::Idle
            },
            interval_ms: self.shared.interval.as_millis() as u64,
            timer,
            timers_started: self.shared.timers_started.load(Ordering::Relaxed),
            ticks: self.shared.ticks.load(Ordering::Relaxed),
        }
    }

    pub fn target(&self) -> &TargetPage {
        &self.shared.target
    }

    pub fn subscribe(&self) -> LifecycleReceiver {
        self.shared.events.subscribe()
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.shared.timer.lock().take() {
            handle.cancel.cancel();
        }
    }
}

async fn run_timer(shared: Arc<Shared>, id: u64, cancel: CancellationToken) {
    let mut interval = time::interval_at(Instant::now() + shared.interval, shared.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }
        let tick = TickId::new();
        let outcome = shared
            .tick()
            .instrument(info_span!("tick", timer = id, tick = %tick))
            .await;
        let off_target = outcome == TickOutcome::OffTarget;
        let _ = shared.events.send(LifecycleEvent::Ticked { tick, outcome });
        if off_target {
            shared.clear(Some(id), StopReason::OffTarget);
            break;
        }
        if cancel.is_cancelled() {
            break;
        }
    }
    debug!(target: "scheduler", timer = id, "timer task finished");
}
