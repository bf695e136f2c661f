//! Control locator with fallback chain orchestration

use crate::{errors::LocatorError, strategies::*, types::*};
use async_trait::async_trait;
use host_perceiver::{DocumentSnapshot, HostPort};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Control resolver trait
#[async_trait]
pub trait ControlResolver: Send + Sync {
    /// Take one snapshot and run the fallback chain over it
    async fn locate(&self) -> Result<Option<ControlCandidate>, LocatorError>;

    /// Run every strategy over one snapshot without short-circuiting
    async fn explain(&self) -> Result<LocateReport, LocatorError>;
}

/// What each strategy made of one snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct LocateReport {
    pub path: String,
    pub seq: u64,
    pub truncated: bool,
    pub outcomes: Vec<StrategyOutcome>,
    /// The candidate `locate` would return.
    pub chosen: Option<ControlCandidate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StrategyOutcome {
    pub strategy: LocatorStrategy,
    pub candidate: Option<ControlCandidate>,
    pub error: Option<String>,
}

/// Ordered, short-circuiting chain of [`LocateStrategy`] implementations
pub struct ControlLocator {
    host: Arc<dyn HostPort>,
    strategies: Vec<Box<dyn LocateStrategy>>,
}

impl ControlLocator {
    /// Create a locator with the default three-strategy chain
    pub fn new(host: Arc<dyn HostPort>, config: &LocatorConfig) -> Self {
        let strategies = LocatorStrategy::fallback_chain()
            .into_iter()
            .map(|kind| -> Box<dyn LocateStrategy> {
                match kind {
                    LocatorStrategy::Tooltip => Box::new(TooltipStrategy::from_config(config)),
                    LocatorStrategy::IconShape => {
                        Box::new(IconShapeStrategy::new(config.icon_min_path_len))
                    }
                    LocatorStrategy::Introspection => {
                        Box::new(IntrospectionStrategy::from_config(config))
                    }
                }
            })
            .collect();
        Self::with_strategies(host, strategies)
    }

    pub fn with_strategies(
        host: Arc<dyn HostPort>,
        strategies: Vec<Box<dyn LocateStrategy>>,
    ) -> Self {
        Self { host, strategies }
    }

    pub fn strategies(&self) -> impl Iterator<Item = LocatorStrategy> + '_ {
        self.strategies.iter().map(|s| s.strategy_type())
    }

    /// First success wins; failures degrade to absence.
    pub fn locate_in(&self, snapshot: &DocumentSnapshot) -> Option<ControlCandidate> {
        for strategy in &self.strategies {
            match strategy.try_locate(snapshot) {
                Ok(Some(candidate)) => {
                    info!(
                        target: "action-locator",
                        strategy = strategy.name(),
                        target_handle = %candidate.target,
                        label = candidate.label.as_deref().unwrap_or(""),
                        "refresh control located"
                    );
                    return Some(candidate);
                }
                Ok(None) => {
                    debug!(target: "action-locator", strategy = strategy.name(), "no candidate");
                }
                Err(err) => {
                    debug!(target: "action-locator", strategy = strategy.name(), %err, "strategy failed");
                }
            }
        }
        debug!(target: "action-locator", path = %snapshot.path, seq = snapshot.seq, "all strategies exhausted");
        None
    }

    pub fn explain_in(&self, snapshot: &DocumentSnapshot) -> LocateReport {
        let outcomes = self
            .strategies
            .iter()
            .map(|strategy| match strategy.try_locate(snapshot) {
                Ok(candidate) => StrategyOutcome {
                    strategy: strategy.strategy_type(),
                    candidate,
                    error: None,
                },
                Err(err) => StrategyOutcome {
                    strategy: strategy.strategy_type(),
                    candidate: None,
                    error: Some(err.to_string()),
                },
            })
            .collect::<Vec<_>>();
        let chosen = outcomes.iter().find_map(|o| o.candidate.clone());
        LocateReport {
            path: snapshot.path.clone(),
            seq: snapshot.seq,
            truncated: snapshot.truncated,
            outcomes,
            chosen,
        }
    }
}

#[async_trait]
impl ControlResolver for ControlLocator {
    async fn locate(&self) -> Result<Option<ControlCandidate>, LocatorError> {
        let snapshot = self.host.snapshot().await?;
        Ok(self.locate_in(&snapshot))
    }

    async fn explain(&self) -> Result<LocateReport, LocatorError> {
        let snapshot = self.host.snapshot().await?;
        Ok(self.explain_in(&snapshot))
    }
}
