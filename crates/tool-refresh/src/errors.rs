use host_perceiver::PerceiverError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("precheck failed: {0}")]
    Precheck(String),
    #[error("activation failed: {0}")]
    Activate(String),
}

impl InvokeError {
    pub(crate) fn precheck(err: PerceiverError) -> Self {
        InvokeError::Precheck(err.to_string())
    }

    pub(crate) fn activate(err: PerceiverError) -> Self {
        InvokeError::Activate(err.to_string())
    }
}
