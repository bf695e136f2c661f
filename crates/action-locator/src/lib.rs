//! Refresh-control locator
//!
//! Finds a live, actionable refresh control on the host page with three strategies of
//! decreasing confidence:
//! - Tooltip attribute match on buttons (primary strategy)
//! - Icon-shape heuristic on header buttons
//! - Component introspection (exposed reload capability)
//!
//! Every pass works on one fresh snapshot; nothing is cached between ticks.

pub mod errors;
pub mod resolver;
pub mod strategies;
pub mod types;

pub use errors::*;
pub use resolver::*;
pub use strategies::*;
pub use types::*;
