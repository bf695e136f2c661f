//! Refresh lifecycle: the periodic timer, the boot readiness wait, and the navigation
//! watcher that starts and stops the timer.

pub mod action;
pub mod error;
pub mod events;
pub mod metrics;
pub mod model;
pub mod readiness;
pub mod scheduler;
pub mod watcher;

pub use action::{LocateAndInvoke, RefreshAction};
pub use error::SchedulerError;
pub use events::{lifecycle_channel, LifecycleEvent, LifecycleReceiver};
pub use model::{SchedulerSnapshot, SchedulerState, StopReason, TickOutcome, Timing};
pub use readiness::{wait_for_host, BootReadiness};
pub use scheduler::RefreshScheduler;
pub use watcher::NavigationWatcher;
