//! Shared primitives for the CRM auto-refresh agent.
//!
//! Everything here is plain data: the target-page predicate, route descriptors, and the
//! navigation signals that flow from the host page to the lifecycle owner.

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_PATH_MARKERS: [&str; 2] = ["/crm/leads", "/leads"];
pub const DEFAULT_ROUTE_NAME: &str = "Leads";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TargetPageError {
    #[error("at least one path marker is required")]
    NoMarkers,
    #[error("path marker #{0} is empty")]
    EmptyMarker(usize),
}

/// Identifies the one page of the host application that gets refreshed.
///
/// Path matching is a case-sensitive substring test against every marker; a route
/// descriptor additionally matches on its symbolic name.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde-full", serde(try_from = "TargetPageFields"))]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TargetPage {
    path_markers: Vec<String>,
    route_name: Option<String>,
}

/// Wire shape of [`TargetPage`]; deserialized values go through [`TargetPage::new`].
#[cfg(feature = "serde-full")]
#[derive(serde::Deserialize)]
struct TargetPageFields {
    path_markers: Vec<String>,
    #[serde(default)]
    route_name: Option<String>,
}

#[cfg(feature = "serde-full")]
impl TryFrom<TargetPageFields> for TargetPage {
    type Error = TargetPageError;

    fn try_from(fields: TargetPageFields) -> Result<Self, Self::Error> {
        Self::new(fields.path_markers, fields.route_name)
    }
}

impl TargetPage {
    pub fn new<I, S>(markers: I, route_name: Option<String>) -> Result<Self, TargetPageError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let path_markers: Vec<String> = markers.into_iter().map(Into::into).collect();
        if path_markers.is_empty() {
            return Err(TargetPageError::NoMarkers);
        }
        if let Some(idx) = path_markers.iter().position(|m| m.is_empty()) {
            return Err(TargetPageError::EmptyMarker(idx));
        }
        let route_name = route_name.filter(|name| !name.trim().is_empty());
        Ok(Self {
            path_markers,
            route_name,
        })
    }

    pub fn path_markers(&self) -> &[String] {
        &self.path_markers
    }

    pub fn route_name(&self) -> Option<&str> {
        self.route_name.as_deref()
    }

    pub fn is_target_page(&self, current_path: &str) -> bool {
        self.path_markers
            .iter()
            .any(|marker| current_path.contains(marker.as_str()))
    }

    pub fn matches_route(&self, route: &RouteDescriptor) -> bool {
        let by_name = match (self.route_name.as_deref(), route.name.as_deref()) {
            (Some(expected), Some(actual)) => expected == actual,
            _ => false,
        };
        by_name
            || route
                .path
                .as_deref()
                .map(|path| self.is_target_page(path))
                .unwrap_or(false)
    }
}

impl Default for TargetPage {
    fn default() -> Self {
        Self {
            path_markers: DEFAULT_PATH_MARKERS.iter().map(|m| m.to_string()).collect(),
            route_name: Some(DEFAULT_ROUTE_NAME.to_string()),
        }
    }
}

/// The host router's idea of where the user is.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RouteDescriptor {
    pub name: Option<String>,
    pub path: Option<String>,
}

impl RouteDescriptor {
    pub fn from_path(path: impl Into<String>) -> Self {
        Self {
            name: None,
            path: Some(path.into()),
        }
    }

    pub fn named(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            path: Some(path.into()),
        }
    }
}

impl fmt::Display for RouteDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.name, &self.path) {
            (Some(name), Some(path)) => write!(f, "{name} ({path})"),
            (Some(name), None) => write!(f, "{name}"),
            (None, Some(path)) => write!(f, "{path}"),
            (None, None) => write!(f, "<unknown route>"),
        }
    }
}

#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde-full", serde(rename_all = "snake_case"))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NavigationSource {
    /// The host router's post-navigation hook fired.
    Router,
    /// Browser back/forward.
    History,
    /// Inferred from the route that was current when the host finished booting.
    Boot,
}

impl NavigationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            NavigationSource::Router => "router",
            NavigationSource::History => "history",
            NavigationSource::Boot => "boot",
        }
    }
}

/// A just-completed navigation, consumed once by the watcher.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NavigationEvent {
    pub route: RouteDescriptor,
    pub source: NavigationSource,
}

impl NavigationEvent {
    pub fn new(route: RouteDescriptor, source: NavigationSource) -> Self {
        Self { route, source }
    }
}

/// Signals surfaced by the host port.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum HostSignal {
    RouteChanged(NavigationEvent),
    HistoryNavigated { path: String },
    Teardown,
    /// The tab loaded a new document; in-page hooks are gone.
    DocumentReplaced { url: String },
}

#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TickId(pub String);

impl TickId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for TickId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TickId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_markers_match_leads_paths() {
        let page = TargetPage::default();
        assert!(page.is_target_page("/crm/leads/view"));
        assert!(page.is_target_page("/crm/leads"));
        assert!(page.is_target_page("/leads"));
        assert!(!page.is_target_page("/crm/deals"));
        assert!(!page.is_target_page(""));
    }

    #[test]
    fn matching_is_case_sensitive() {
        let page = TargetPage::default();
        assert!(!page.is_target_page("/CRM/LEADS"));
        assert!(!page.is_target_page("/Leads"));
    }

    #[test]
    fn substring_anywhere_in_path_matches() {
        let page = TargetPage::default();
        assert!(page.is_target_page("/app/old-leads-archive/leads"));
        assert!(page.is_target_page("/x/leadsboard"));
    }

    #[test]
    fn custom_markers() {
        let page = TargetPage::new(["/crm/deals", "/pipeline"], None).unwrap();
        assert!(page.is_target_page("/crm/deals/1"));
        assert!(page.is_target_page("/pipeline"));
        assert!(!page.is_target_page("/crm/leads"));
    }

    #[test]
    fn rejects_empty_marker_lists() {
        let err = TargetPage::new(Vec::<String>::new(), None).unwrap_err();
        assert_eq!(err, TargetPageError::NoMarkers);
        let err = TargetPage::new(["/leads", ""], None).unwrap_err();
        assert_eq!(err, TargetPageError::EmptyMarker(1));
    }

    #[test]
    fn route_matches_by_name_or_path() {
        let page = TargetPage::default();
        assert!(page.matches_route(&RouteDescriptor::named("Leads", "/anything")));
        assert!(page.matches_route(&RouteDescriptor::named("Other", "/crm/leads")));
        assert!(!page.matches_route(&RouteDescriptor::named("Deals", "/crm/deals")));
        assert!(!page.matches_route(&RouteDescriptor::default()));
    }

    #[test]
    fn blank_route_name_is_ignored() {
        let page = TargetPage::new(["/leads"], Some("  ".into())).unwrap();
        assert_eq!(page.route_name(), None);
        let route = RouteDescriptor {
            name: Some("  ".into()),
            path: Some("/deals".into()),
        };
        assert!(!page.matches_route(&route));
    }

    #[cfg(feature = "serde-full")]
    #[test]
    fn deserializing_validates_markers() {
        let page: TargetPage =
            serde_json::from_str(r#"{"path_markers":["/prospects"],"route_name":"Prospects"}"#)
                .unwrap();
        assert!(page.is_target_page("/prospects/7"));
        assert_eq!(page.route_name(), Some("Prospects"));

        assert!(serde_json::from_str::<TargetPage>(r#"{"path_markers":[]}"#).is_err());
        assert!(serde_json::from_str::<TargetPage>(r#"{"path_markers":["/leads",""]}"#).is_err());

        let json = serde_json::to_string(&TargetPage::default()).unwrap();
        assert_eq!(serde_json::from_str::<TargetPage>(&json).unwrap(), TargetPage::default());
    }

    #[test]
    fn route_display() {
        assert_eq!(
            RouteDescriptor::named("Leads", "/crm/leads").to_string(),
            "Leads (/crm/leads)"
        );
        assert_eq!(RouteDescriptor::default().to_string(), "<unknown route>");
    }
}
