use std::sync::Arc;
use std::time::Instant;

use action_locator::ControlCandidate;
use chrono::Utc;
use host_perceiver::{Activation, HostPort};
use tracing::{info, instrument, warn};

use crate::errors::InvokeError;
use crate::metrics;
use crate::model::{InvokeOutcome, InvokeReport, RefusalReason};
use crate::precheck;

/// Activates a located refresh control, at most once per call.
#[derive(Clone)]
pub struct ActionInvoker {
    host: Arc<dyn HostPort>,
}

impl ActionInvoker {
    pub fn new(host: Arc<dyn HostPort>) -> Self {
        Self { host }
    }

    /// Re-check, then activate. A refused candidate is not an error.
    #[instrument(skip_all, fields(strategy = %candidate.strategy, target = %candidate.target))]
    pub async fn invoke(&self, candidate: &ControlCandidate) -> Result<InvokeReport, InvokeError> {
        let started = Instant::now();
        let precheck = match precheck::run_precheck(self.host.as_ref(), &candidate.target).await {
            Ok(p) => p,
            Err(err) => {
                metrics::record_failed(candidate.strategy);
                return Err(err);
            }
        };

        let outcome = match precheck.refusal {
            Some(reason) => refused(candidate, reason, "refresh skipped"),
            None => match self.host.activate(&candidate.target).await {
                Ok(Activation::Performed) => {
                    metrics::record_performed(candidate.strategy);
                    info!(target: "tool-refresh", "refresh performed");
                    InvokeOutcome::Performed
                }
                Ok(Activation::Declined(live)) => {
                    let reason = RefusalReason::from_live(&live).unwrap_or(RefusalReason::Gone);
                    refused(candidate, reason, "control changed before activation; refresh skipped")
                }
                Err(err) => {
                    metrics::record_failed(candidate.strategy);
                    warn!(target: "tool-refresh", %err, "refresh activation failed");
                    return Err(InvokeError::activate(err));
                }
            },
        };

        Ok(InvokeReport {
            strategy: candidate.strategy,
            target: candidate.target.clone(),
            outcome,
            precheck,
            at: Utc::now(),
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }
}

fn refused(candidate: &ControlCandidate, reason: RefusalReason, message: &str) -> InvokeOutcome {
    metrics::record_refused(candidate.strategy);
    info!(target: "tool-refresh", %reason, "{message}");
    InvokeOutcome::Refused(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use action_locator::LocatorStrategy;
    use host_perceiver::fake::FakeHost;
    use host_perceiver::{ActionTarget, ComponentUid, ElementHandle, LiveState, NodeId, ReloadHandle};

    fn element(node: usize) -> ActionTarget {
        ActionTarget::Element(ElementHandle {
            seq: 1,
            node: NodeId(node),
        })
    }

    #[tokio::test]
    async fn activates_actionable_control_once() {
        let host = Arc::new(FakeHost::new("/crm/leads"));
        let invoker = ActionInvoker::new(host.clone());
        let candidate = ControlCandidate::new(LocatorStrategy::Tooltip, element(3));

        let before = metrics::counts(LocatorStrategy::Tooltip).performed;
        let report = invoker.invoke(&candidate).await.unwrap();
        assert!(report.performed());
        assert_eq!(host.activations(), vec![element(3)]);
        assert!(metrics::counts(LocatorStrategy::Tooltip).performed > before);
    }

    #[tokio::test]
    async fn refuses_when_control_became_busy() {
        let host = Arc::new(FakeHost::new("/crm/leads"));
        let target = element(5);
        host.set_live_state(
            target.clone(),
            LiveState {
                busy: true,
                ..LiveState::actionable()
            },
        );
        let invoker = ActionInvoker::new(host.clone());
        let report = invoker
            .invoke(&ControlCandidate::new(LocatorStrategy::IconShape, target))
            .await
            .unwrap();
        assert_eq!(report.outcome, InvokeOutcome::Refused(RefusalReason::Busy));
        assert!(host.activations().is_empty());
    }

    #[tokio::test]
    async fn refuses_control_that_turns_busy_after_the_precheck() {
        let host = Arc::new(FakeHost::new("/crm/leads"));
        let target = element(7);
        host.change_after_check(
            target.clone(),
            LiveState {
                busy: true,
                ..LiveState::actionable()
            },
        );
        let invoker = ActionInvoker::new(host.clone());

        let before = metrics::counts(LocatorStrategy::Tooltip).refused;
        let report = invoker
            .invoke(&ControlCandidate::new(LocatorStrategy::Tooltip, target))
            .await
            .unwrap();
        assert_eq!(report.precheck.refusal, None);
        assert_eq!(report.outcome, InvokeOutcome::Refused(RefusalReason::Busy));
        assert!(host.activations().is_empty());
        assert!(metrics::counts(LocatorStrategy::Tooltip).refused > before);
    }

    #[tokio::test]
    async fn refuses_control_disabled_after_the_precheck() {
        let host = Arc::new(FakeHost::new("/crm/leads"));
        let target = element(8);
        host.change_after_check(
            target.clone(),
            LiveState {
                disabled: true,
                ..LiveState::actionable()
            },
        );
        let report = ActionInvoker::new(host.clone())
            .invoke(&ControlCandidate::new(LocatorStrategy::IconShape, target))
            .await
            .unwrap();
        assert_eq!(report.outcome, InvokeOutcome::Refused(RefusalReason::Disabled));
        assert!(host.activations().is_empty());
    }

    #[tokio::test]
    async fn refuses_disabled_and_gone_controls() {
        let host = Arc::new(FakeHost::new("/crm/leads"));
        host.set_live_state(
            element(1),
            LiveState {
                disabled: true,
                ..LiveState::actionable()
            },
        );
        host.set_live_state(element(2), LiveState::gone());
        let invoker = ActionInvoker::new(host.clone());

        let disabled = invoker
            .invoke(&ControlCandidate::new(LocatorStrategy::Tooltip, element(1)))
            .await
            .unwrap();
        let gone = invoker
            .invoke(&ControlCandidate::new(LocatorStrategy::Tooltip, element(2)))
            .await
            .unwrap();
        assert_eq!(disabled.outcome, InvokeOutcome::Refused(RefusalReason::Disabled));
        assert_eq!(gone.outcome, InvokeOutcome::Refused(RefusalReason::Gone));
        assert!(host.activations().is_empty());
    }

    #[tokio::test]
    async fn reload_target_is_invoked_through_the_host() {
        let host = Arc::new(FakeHost::new("/leads"));
        let target = ActionTarget::Reload(ReloadHandle {
            seq: 2,
            component: ComponentUid(9),
            field: "leads".into(),
        });
        let invoker = ActionInvoker::new(host.clone());
        let report = invoker
            .invoke(&ControlCandidate::new(LocatorStrategy::Introspection, target.clone()))
            .await
            .unwrap();
        assert!(report.performed());
        assert_eq!(host.activations(), vec![target]);
    }

    #[test]
    fn refusal_order_prefers_gone() {
        let live = LiveState {
            present: false,
            disabled: true,
            busy: true,
            visible: false,
        };
        assert_eq!(RefusalReason::from_live(&live), Some(RefusalReason::Gone));
        assert_eq!(RefusalReason::from_live(&LiveState::actionable()), None);
    }
}
