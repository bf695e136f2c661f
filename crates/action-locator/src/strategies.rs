//! Refresh-control discovery strategies
//!
//! Three strategies in fallback order:
//! 1. Tooltip - buttons whose tooltip attribute mentions "refresh"
//! 2. IconShape - header buttons carrying a line-drawing svg icon
//! 3. Introspection - the exposed reload capability of the named component

use crate::{errors::LocatorError, types::*};
use autorefresh_core_types::TargetPage;
use host_perceiver::{
    find_named_component, ActionTarget, DocumentSnapshot, ElementHandle, NodeId, ReloadHandle,
};
use tracing::trace;

/// Strategy trait for refresh-control discovery
///
/// Strategies are pure over one snapshot. `Ok(None)` is plain absence; `Err` is an
/// unexpected failure the locator logs and treats as absence.
pub trait LocateStrategy: Send + Sync {
    fn try_locate(
        &self,
        snapshot: &DocumentSnapshot,
    ) -> Result<Option<ControlCandidate>, LocatorError>;

    /// Get strategy type
    fn strategy_type(&self) -> LocatorStrategy;

    /// Get strategy name
    fn name(&self) -> &'static str {
        self.strategy_type().name()
    }
}

fn element_candidate(
    strategy: LocatorStrategy,
    snapshot: &DocumentSnapshot,
    node: NodeId,
) -> ControlCandidate {
    ControlCandidate::new(
        strategy,
        ActionTarget::Element(ElementHandle {
            seq: snapshot.seq,
            node,
        }),
    )
}

/// Tooltip attribute strategy
pub struct TooltipStrategy {
    attributes: Vec<String>,
    keyword: String,
}

impl TooltipStrategy {
    pub fn new(attributes: Vec<String>, keyword: &str) -> Self {
        Self {
            attributes,
            keyword: keyword.to_lowercase(),
        }
    }

    pub fn from_config(config: &LocatorConfig) -> Self {
        Self::new(config.tooltip_attributes.clone(), &config.tooltip_keyword)
    }
}

impl LocateStrategy for TooltipStrategy {
    fn try_locate(
        &self,
        snapshot: &DocumentSnapshot,
    ) -> Result<Option<ControlCandidate>, LocatorError> {
        for (id, node) in snapshot.iter().filter(|(_, n)| n.is_tag("button")) {
            let tooltip = self
                .attributes
                .iter()
                .filter_map(|attr| node.attr(attr))
                .find(|value| !value.is_empty());
            let Some(tooltip) = tooltip else {
                continue;
            };
            if !tooltip.to_lowercase().contains(&self.keyword) || node.disabled {
                continue;
            }
            if !node.is_visible() || snapshot.is_busy(id) {
                trace!(target: "action-locator", node = id.0, tooltip, "tooltip match not actionable");
                continue;
            }
            return Ok(Some(
                element_candidate(self.strategy_type(), snapshot, id).with_label(tooltip),
            ));
        }
        Ok(None)
    }

    fn strategy_type(&self) -> LocatorStrategy {
        LocatorStrategy::Tooltip
    }
}

/// Icon-shape strategy
///
/// A weak proxy: any path with move and line commands longer than the threshold passes.
pub struct IconShapeStrategy {
    min_path_len: usize,
}

impl IconShapeStrategy {
    pub fn new(min_path_len: usize) -> Self {
        Self { min_path_len }
    }

    fn is_header_like(snapshot: &DocumentSnapshot, node: NodeId) -> bool {
        let is_header = |n: &host_perceiver::DomNode| {
            n.is_tag("header") || n.class_contains("header") || n.class_contains("Header")
        };
        snapshot.node(node).map(is_header).unwrap_or(false)
            || snapshot.ancestors(node).any(|(_, n)| is_header(n))
    }
}

impl LocateStrategy for IconShapeStrategy {
    fn try_locate(
        &self,
        snapshot: &DocumentSnapshot,
    ) -> Result<Option<ControlCandidate>, LocatorError> {
        for (svg, _) in snapshot.iter().filter(|(_, n)| n.is_tag("svg")) {
            let Some((button, control)) = snapshot
                .ancestors(svg)
                .find(|(_, n)| n.is_tag("button"))
            else {
                continue;
            };
            let first_path = snapshot
                .descendants(svg)
                .into_iter()
                .find(|id| snapshot.node(*id).map(|n| n.is_tag("path")).unwrap_or(false));
            let Some(path) = first_path.and_then(|id| snapshot.node(id)) else {
                continue;
            };
            let d = path.attr("d").unwrap_or_default();
            if !(d.contains('M') && d.contains('L') && d.len() > self.min_path_len) {
                continue;
            }
            if control.disabled || !control.is_visible() {
                continue;
            }
            if !Self::is_header_like(snapshot, button) {
                continue;
            }
            return Ok(Some(element_candidate(
                self.strategy_type(),
                snapshot,
                button,
            )));
        }
        Ok(None)
    }

    fn strategy_type(&self) -> LocatorStrategy {
        LocatorStrategy::IconShape
    }
}

/// Component introspection strategy
pub struct IntrospectionStrategy {
    target: TargetPage,
    component_name: String,
    collection_field: String,
}

impl IntrospectionStrategy {
    pub fn new(target: TargetPage, component_name: &str, collection_field: &str) -> Self {
        Self {
            target,
            component_name: component_name.to_string(),
            collection_field: collection_field.to_string(),
        }
    }

    pub fn from_config(config: &LocatorConfig) -> Self {
        Self::new(
            config.target.clone(),
            &config.component_name,
            &config.collection_field,
        )
    }
}

impl LocateStrategy for IntrospectionStrategy {
    fn try_locate(
        &self,
        snapshot: &DocumentSnapshot,
    ) -> Result<Option<ControlCandidate>, LocatorError> {
        let Some(app) = snapshot.app.as_ref() else {
            if let Some(err) = &snapshot.introspection_error {
                return Err(LocatorError::StrategyFailed {
                    strategy: self.name().to_string(),
                    reason: err.clone(),
                });
            }
            return Ok(None);
        };
        let Some(root) = app.node else {
            return Ok(None);
        };
        if !app.router_present {
            return Ok(None);
        }
        match app.current_route.as_ref() {
            Some(route) if self.target.matches_route(route) => {}
            _ => return Ok(None),
        }

        let Some(component) = find_named_component(snapshot, root, &self.component_name) else {
            return Ok(None);
        };
        let Some(collection) = component.collection(&self.collection_field) else {
            return Ok(None);
        };
        if !collection.reload_exposed || collection.loading {
            return Ok(None);
        }

        let target = ActionTarget::Reload(ReloadHandle {
            seq: snapshot.seq,
            component: component.uid(),
            field: self.collection_field.clone(),
        });
        Ok(Some(
            ControlCandidate::new(self.strategy_type(), target)
                .with_label(format!("{}.{}", self.component_name, self.collection_field)),
        ))
    }

    fn strategy_type(&self) -> LocatorStrategy {
        LocatorStrategy::Introspection
    }
}
