use std::fmt;
use std::time::Duration;

use action_locator::LocatorStrategy;
use serde::Serialize;
use tool_refresh::RefusalReason;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Running,
}

impl SchedulerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Running => "running",
        }
    }
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the timer was cleared.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// A tick found the live path off the target page.
    OffTarget,
    /// A navigation settled on another page.
    Navigation,
    Teardown,
    DocumentReplaced,
    Shutdown,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::OffTarget => "off_target",
            StopReason::Navigation => "navigation",
            StopReason::Teardown => "teardown",
            StopReason::DocumentReplaced => "document_replaced",
            StopReason::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one tick did.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    Performed { strategy: LocatorStrategy },
    Refused { strategy: LocatorStrategy, reason: RefusalReason },
    NoControl,
    OffTarget,
    Failed { error: String },
}

impl TickOutcome {
    pub fn performed(&self) -> bool {
        matches!(self, TickOutcome::Performed { .. })
    }
}

/// Durations driving the timer and the watcher.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Timing {
    pub refresh_interval: Duration,
    pub route_settle: Duration,
    pub history_settle: Duration,
    pub boot_poll: Duration,
    pub boot_timeout: Duration,
    pub boot_retry_delay: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(30),
            route_settle: Duration::from_millis(1500),
            history_settle: Duration::from_millis(500),
            boot_poll: Duration::from_millis(100),
            boot_timeout: Duration::from_secs(15),
            boot_retry_delay: Duration::from_millis(2000),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SchedulerSnapshot {
    pub state: SchedulerState,
    pub interval_ms: u64,
    /// Id of the live timer, if any.
    pub timer: Option<u64>,
    /// Timers this scheduler has installed so far.
    pub timers_started: u64,
    pub ticks: u64,
}
