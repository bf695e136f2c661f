use std::sync::Arc;

use action_locator::{ControlLocator, ControlResolver};
use async_trait::async_trait;
use tool_refresh::{ActionInvoker, InvokeOutcome};

use crate::error::SchedulerError;
use crate::model::TickOutcome;

/// The work a tick does once the page check passed.
#[async_trait]
pub trait RefreshAction: Send + Sync {
    async fn refresh(&self) -> Result<TickOutcome, SchedulerError>;
}

/// Locate with the fallback chain, then invoke the first candidate.
pub struct LocateAndInvoke {
    locator: Arc<ControlLocator>,
    invoker: ActionInvoker,
}

impl LocateAndInvoke {
    pub fn new(locator: Arc<ControlLocator>, invoker: ActionInvoker) -> Self {
        Self { locator, invoker }
    }
}

#[async_trait]
impl RefreshAction for LocateAndInvoke {
    async fn refresh(&self) -> Result<TickOutcome, SchedulerError> {
        let Some(candidate) = self.locator.locate().await? else {
            return Ok(TickOutcome::NoControl);
        };
        let report = self.invoker.invoke(&candidate).await?;
        Ok(match report.outcome {
            InvokeOutcome::Performed => TickOutcome::Performed {
                strategy: report.strategy,
            },
            InvokeOutcome::Refused(reason) => TickOutcome::Refused {
                strategy: report.strategy,
                reason,
            },
        })
    }
}
