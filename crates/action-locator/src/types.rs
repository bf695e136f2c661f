//! Core types for the locator

use autorefresh_core_types::TargetPage;
use host_perceiver::ActionTarget;
use serde::{Deserialize, Serialize};

/// Locator strategy enumeration
///
/// Defines the three strategies, in decreasing confidence:
/// - Tooltip: a button whose tooltip-like attribute mentions the keyword
/// - IconShape: a header button whose svg icon has a long line-drawing path
/// - Introspection: the exposed reload capability of the named component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LocatorStrategy {
    Tooltip,
    IconShape,
    Introspection,
}

impl LocatorStrategy {
    /// Get strategy name as string
    pub fn name(&self) -> &'static str {
        match self {
            LocatorStrategy::Tooltip => "tooltip",
            LocatorStrategy::IconShape => "icon-shape",
            LocatorStrategy::Introspection => "introspection",
        }
    }

    /// Get all strategies in fallback order
    pub fn fallback_chain() -> Vec<LocatorStrategy> {
        vec![
            LocatorStrategy::Tooltip,
            LocatorStrategy::IconShape,
            LocatorStrategy::Introspection,
        ]
    }
}

impl std::fmt::Display for LocatorStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A usable refresh handle, re-derived every tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlCandidate {
    /// Strategy that produced this candidate
    pub strategy: LocatorStrategy,

    pub target: ActionTarget,

    pub visible: bool,
    pub disabled: bool,
    pub busy: bool,

    /// Human-readable hint for logs (tooltip text, component name)
    pub label: Option<String>,
}

impl ControlCandidate {
    pub fn new(strategy: LocatorStrategy, target: ActionTarget) -> Self {
        Self {
            strategy,
            target,
            visible: true,
            disabled: false,
            busy: false,
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn is_actionable(&self) -> bool {
        self.visible && !self.disabled && !self.busy
    }
}

/// Knobs for the three strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocatorConfig {
    /// Tooltip-like attributes, checked in order; the first non-empty one wins.
    pub tooltip_attributes: Vec<String>,
    pub tooltip_keyword: String,
    /// Icon path data must be strictly longer than this.
    pub icon_min_path_len: usize,
    pub target: TargetPage,
    pub component_name: String,
    pub collection_field: String,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            tooltip_attributes: vec![
                "data-tooltip".into(),
                "aria-label".into(),
                "title".into(),
                "data-original-title".into(),
            ],
            tooltip_keyword: "refresh".into(),
            icon_min_path_len: 50,
            target: TargetPage::default(),
            component_name: "Leads".into(),
            collection_field: "leads".into(),
        }
    }
}
