use std::fmt;

use action_locator::LocatorStrategy;
use chrono::{DateTime, Utc};
use host_perceiver::{ActionTarget, LiveState};
use serde::Serialize;

/// Why a located control was not activated.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefusalReason {
    Gone,
    Disabled,
    Busy,
}

impl RefusalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefusalReason::Gone => "gone",
            RefusalReason::Disabled => "disabled",
            RefusalReason::Busy => "busy",
        }
    }

    /// First blocking condition in the live state, if any.
    pub fn from_live(live: &LiveState) -> Option<Self> {
        if !live.present {
            Some(RefusalReason::Gone)
        } else if live.disabled {
            Some(RefusalReason::Disabled)
        } else if live.busy {
            Some(RefusalReason::Busy)
        } else {
            None
        }
    }
}

impl fmt::Display for RefusalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum InvokeOutcome {
    Performed,
    Refused(RefusalReason),
}

impl InvokeOutcome {
    pub fn performed(&self) -> bool {
        matches!(self, InvokeOutcome::Performed)
    }
}

/// Live state read right before acting.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct PrecheckSnapshot {
    pub live: LiveState,
    pub refusal: Option<RefusalReason>,
}

#[derive(Clone, Debug, Serialize)]
pub struct InvokeReport {
    pub strategy: LocatorStrategy,
    pub target: ActionTarget,
    pub outcome: InvokeOutcome,
    pub precheck: PrecheckSnapshot,
    pub at: DateTime<Utc>,
    pub latency_ms: u64,
}

impl InvokeReport {
    pub fn performed(&self) -> bool {
        self.outcome.performed()
    }
}
