use autorefresh_core_types::TickId;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::model::{StopReason, TickOutcome};

/// Scheduler lifecycle, for whoever wants to watch it.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Started { timer: u64 },
    Stopped { timer: u64, reason: StopReason },
    Ticked { tick: TickId, outcome: TickOutcome },
}

pub type LifecycleSender = broadcast::Sender<LifecycleEvent>;
pub type LifecycleReceiver = broadcast::Receiver<LifecycleEvent>;

pub fn lifecycle_channel(buffer: usize) -> (LifecycleSender, LifecycleReceiver) {
    broadcast::channel(buffer.max(1))
}
