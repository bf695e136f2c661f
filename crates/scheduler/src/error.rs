use action_locator::LocatorError;
use host_perceiver::PerceiverError;
use thiserror::Error;
use tool_refresh::InvokeError;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("host unavailable: {0}")]
    Host(String),
    #[error("locate failed: {0}")]
    Locate(String),
    #[error("invoke failed: {0}")]
    Invoke(String),
    #[error("host signal stream closed")]
    SignalsClosed,
}

impl From<PerceiverError> for SchedulerError {
    fn from(err: PerceiverError) -> Self {
        SchedulerError::Host(err.to_string())
    }
}

impl From<LocatorError> for SchedulerError {
    fn from(err: LocatorError) -> Self {
        SchedulerError::Locate(err.to_string())
    }
}

impl From<InvokeError> for SchedulerError {
    fn from(err: InvokeError) -> Self {
        SchedulerError::Invoke(err.to_string())
    }
}
