//! Refresh action invoker.
//!
//! Takes a [`ControlCandidate`](action_locator::ControlCandidate), re-reads the
//! control's live state and activates it once when it is still present, enabled and
//! idle. There is no retry; the next tick locates again.

pub mod errors;
pub mod metrics;
pub mod model;

mod precheck;
mod runner;

pub use errors::InvokeError;
pub use model::{InvokeOutcome, InvokeReport, PrecheckSnapshot, RefusalReason};
pub use precheck::run_precheck;
pub use runner::ActionInvoker;
