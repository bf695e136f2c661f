use cdp_adapter::AdapterError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PerceiverError {
    #[error("cdp transport: {0}")]
    Transport(String),
    #[error("page script failed: {0}")]
    Script(String),
    #[error("unexpected script result: {0}")]
    Decode(String),
    #[error("handle from snapshot #{handle} is stale (page holds #{current})")]
    StaleHandle { handle: u64, current: u64 },
}

impl From<AdapterError> for PerceiverError {
    fn from(err: AdapterError) -> Self {
        match err.kind {
            cdp_adapter::AdapterErrorKind::ScriptException => {
                let detail = err
                    .data
                    .as_ref()
                    .and_then(|d| d.pointer("/exception/description").or_else(|| d.get("text")))
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| err.to_string());
                PerceiverError::Script(detail)
            }
            _ => PerceiverError::Transport(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for PerceiverError {
    fn from(err: serde_json::Error) -> Self {
        PerceiverError::Decode(err.to_string())
    }
}
