//! Error types for locator system

use host_perceiver::PerceiverError;
use thiserror::Error;

/// Locator error enumeration
#[derive(Debug, Error, Clone)]
pub enum LocatorError {
    /// The page could not be observed at all
    #[error("Snapshot failed: {0}")]
    Snapshot(String),

    /// Strategy execution failed
    #[error("Strategy '{strategy}' failed: {reason}")]
    StrategyFailed { strategy: String, reason: String },
}

impl LocatorError {
    /// Check if error is retryable on the next tick
    pub fn is_retryable(&self) -> bool {
        matches!(self, LocatorError::Snapshot(_))
    }
}

impl From<PerceiverError> for LocatorError {
    fn from(err: PerceiverError) -> Self {
        LocatorError::Snapshot(err.to_string())
    }
}
