//! CRM auto-refresh agent
//!
//! Attaches to the CRM tab over CDP and keeps the Leads page fresh: a watcher follows
//! navigation, a scheduler ticks while the Leads page is shown, and each tick locates the
//! refresh control and activates it once.

pub mod cli;
pub mod config;
pub mod metrics;
pub mod session;

pub use config::{AppConfig, ConfigError, LoadedConfig};
pub use session::{Agent, BrowserSession};
