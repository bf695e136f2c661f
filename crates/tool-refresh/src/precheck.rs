use host_perceiver::{ActionTarget, HostPort};
use tracing::debug;

use crate::errors::InvokeError;
use crate::model::{PrecheckSnapshot, RefusalReason};

/// Re-read the target's live state; the located state may already be out of date.
pub async fn run_precheck(
    host: &dyn HostPort,
    target: &ActionTarget,
) -> Result<PrecheckSnapshot, InvokeError> {
    let live = host
        .control_state(target)
        .await
        .map_err(InvokeError::precheck)?;
    let refusal = RefusalReason::from_live(&live);
    if let Some(reason) = refusal {
        debug!(target: "tool-refresh", %target, %reason, "precheck refused");
    }
    Ok(PrecheckSnapshot { live, refusal })
}
