use std::collections::BTreeMap;
use std::fmt;

use autorefresh_core_types::RouteDescriptor;
use serde::{Deserialize, Serialize};

use crate::components::{CollectionState, ComponentGraph, ComponentRecord, ComponentUid};

/// Index of an element inside one [`DocumentSnapshot`], in document order.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct NodeId(pub usize);

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DomNode {
    /// Lower-cased tag name.
    pub tag: String,
    pub attributes: BTreeMap<String, String>,
    pub classes: Vec<String>,
    pub disabled: bool,
    pub width: f64,
    pub height: f64,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Instance pointer (`__vueParentComponent`) of the element, if any.
    pub component: Option<ComponentUid>,
}

impl DomNode {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }

    pub fn class_contains(&self, needle: &str) -> bool {
        self.classes.iter().any(|c| c.contains(needle))
    }

    pub fn is_visible(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }

    pub fn is_tag(&self, tag: &str) -> bool {
        self.tag == tag
    }
}

/// The host application's mount point.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AppRoot {
    pub node: Option<NodeId>,
    pub router_present: bool,
    pub current_route: Option<RouteDescriptor>,
    pub root_instance: Option<ComponentUid>,
}

/// One observation of the page, taken at the start of a locate pass.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub seq: u64,
    pub path: String,
    pub nodes: Vec<DomNode>,
    pub components: ComponentGraph,
    pub app: Option<AppRoot>,
    /// The page held more elements than the capture limit.
    pub truncated: bool,
    /// Instance-graph capture threw; DOM data is still usable.
    pub introspection_error: Option<String>,
}

impl DocumentSnapshot {
    pub fn node(&self, id: NodeId) -> Option<&DomNode> {
        self.nodes.get(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &DomNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(idx, node)| (NodeId(idx), node))
    }

    /// Strict ancestors, nearest first.
    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors {
            snapshot: self,
            next: self.node(id).and_then(|n| n.parent),
        }
    }

    /// Strict descendants in document order.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = match self.node(id) {
            Some(node) => node.children.iter().rev().copied().collect(),
            None => return out,
        };
        while let Some(next) = stack.pop() {
            out.push(next);
            if let Some(node) = self.node(next) {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    /// Busy: `aria-busy="true"`, a `loading` class, or a spinner/loading descendant.
    pub fn is_busy(&self, id: NodeId) -> bool {
        let Some(node) = self.node(id) else {
            return false;
        };
        if node.attr("aria-busy") == Some("true") || node.has_class("loading") {
            return true;
        }
        self.descendants(id).into_iter().any(|child| {
            self.node(child)
                .map(|n| n.class_contains("spinner") || n.class_contains("loading"))
                .unwrap_or(false)
        })
    }

    pub(crate) fn from_raw(seq: u64, raw: RawSnapshot) -> Self {
        let mut nodes: Vec<DomNode> = Vec::with_capacity(raw.nodes.len());
        for (idx, raw_node) in raw.nodes.into_iter().enumerate() {
            // Document order puts parents first; anything else is a broken link.
            let parent = raw_node.parent.filter(|p| *p < idx).map(NodeId);
            if let Some(NodeId(p)) = parent {
                nodes[p].children.push(NodeId(idx));
            }
            nodes.push(DomNode {
                tag: raw_node.tag.to_ascii_lowercase(),
                attributes: raw_node.attrs,
                classes: raw_node
                    .class
                    .split_whitespace()
                    .map(str::to_string)
                    .collect(),
                disabled: raw_node.disabled,
                width: raw_node.w,
                height: raw_node.h,
                parent,
                children: Vec::new(),
                component: raw_node.component.map(ComponentUid),
            });
        }

        let mut components = ComponentGraph::new();
        for raw_component in raw.components {
            components.insert(ComponentRecord {
                uid: ComponentUid(raw_component.uid),
                name: raw_component.name.filter(|n| !n.is_empty()),
                setup_name: raw_component.setup_name.filter(|n| !n.is_empty()),
                parent: raw_component.parent.map(ComponentUid),
                collections: raw_component
                    .collections
                    .into_iter()
                    .map(|(field, c)| {
                        (
                            field,
                            CollectionState {
                                loading: c.loading,
                                reload_exposed: c.reload,
                            },
                        )
                    })
                    .collect(),
            });
        }

        let node_count = nodes.len();
        let app = raw.app.map(|app| AppRoot {
            node: app.node.filter(|n| *n < node_count).map(NodeId),
            router_present: app.router,
            current_route: app.route.map(|r| RouteDescriptor {
                name: r.name.filter(|n| !n.is_empty()),
                path: r.path,
            }),
            root_instance: app.root.map(ComponentUid),
        });

        Self {
            seq,
            path: raw.path,
            nodes,
            components,
            app,
            truncated: raw.truncated,
            introspection_error: raw.error,
        }
    }
}

pub struct Ancestors<'s> {
    snapshot: &'s DocumentSnapshot,
    next: Option<NodeId>,
}

impl<'s> Iterator for Ancestors<'s> {
    type Item = (NodeId, &'s DomNode);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        let node = self.snapshot.node(id)?;
        self.next = node.parent;
        Some((id, node))
    }
}

/// Element from a specific snapshot.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ElementHandle {
    pub seq: u64,
    pub node: NodeId,
}

/// Exposed reload capability of a component's collection field.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ReloadHandle {
    pub seq: u64,
    pub component: ComponentUid,
    pub field: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionTarget {
    Element(ElementHandle),
    Reload(ReloadHandle),
}

impl ActionTarget {
    pub fn seq(&self) -> u64 {
        match self {
            ActionTarget::Element(handle) => handle.seq,
            ActionTarget::Reload(handle) => handle.seq,
        }
    }
}

impl fmt::Display for ActionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionTarget::Element(h) => write!(f, "element {} @snapshot {}", h.node.0, h.seq),
            ActionTarget::Reload(h) => {
                write!(f, "{}.reload() on {} @snapshot {}", h.field, h.component, h.seq)
            }
        }
    }
}

/// State of a target re-read right before acting on it.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct LiveState {
    pub present: bool,
    pub disabled: bool,
    pub busy: bool,
    pub visible: bool,
}

impl LiveState {
    pub fn actionable() -> Self {
        Self {
            present: true,
            disabled: false,
            busy: false,
            visible: true,
        }
    }

    pub fn gone() -> Self {
        Self::default()
    }
}

/// What the page did with an activation request.
///
/// The page re-reads the target in the same turn it acts in, so a target that turned
/// disabled or busy after the precheck comes back as `Declined` with the state it saw.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Activation {
    Performed,
    Declined(LiveState),
}

/// Whether the host application finished booting.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Readiness {
    pub app_mounted: bool,
    pub router_present: bool,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        self.app_mounted && self.router_present
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawSnapshot {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default)]
    pub nodes: Vec<RawNode>,
    #[serde(default)]
    pub components: Vec<RawComponent>,
    #[serde(default)]
    pub app: Option<RawApp>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawNode {
    pub tag: String,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
    #[serde(default)]
    pub class: String,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub w: f64,
    #[serde(default)]
    pub h: f64,
    #[serde(default)]
    pub parent: Option<usize>,
    #[serde(default)]
    pub component: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawComponent {
    pub uid: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub setup_name: Option<String>,
    #[serde(default)]
    pub parent: Option<u64>,
    #[serde(default)]
    pub collections: BTreeMap<String, RawCollection>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawCollection {
    #[serde(default)]
    pub loading: bool,
    #[serde(default)]
    pub reload: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawApp {
    #[serde(default)]
    pub node: Option<usize>,
    #[serde(default)]
    pub router: bool,
    #[serde(default)]
    pub route: Option<RawRoute>,
    #[serde(default)]
    pub root: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawRoute {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: serde_json::Value) -> RawSnapshot {
        serde_json::from_value(value).expect("raw snapshot")
    }

    #[test]
    fn builds_tree_from_parent_indices() {
        let snapshot = DocumentSnapshot::from_raw(
            3,
            raw(json!({
                "path": "/crm/leads",
                "nodes": [
                    { "tag": "HTML" },
                    { "tag": "BODY", "parent": 0 },
                    { "tag": "BUTTON", "parent": 1, "class": "btn  loading", "w": 10.0, "h": 10.0 },
                    { "tag": "SPAN", "parent": 2, "class": "icon" },
                    { "tag": "DIV", "parent": 9 }
                ]
            })),
        );
        assert_eq!(snapshot.seq, 3);
        assert_eq!(snapshot.nodes[2].tag, "button");
        assert_eq!(snapshot.nodes[2].classes, vec!["btn", "loading"]);
        assert_eq!(snapshot.nodes[1].children, vec![NodeId(2)]);
        assert_eq!(snapshot.nodes[4].parent, None);
        assert_eq!(snapshot.descendants(NodeId(0)), vec![NodeId(1), NodeId(2), NodeId(3)]);
        let ancestors: Vec<NodeId> = snapshot.ancestors(NodeId(3)).map(|(id, _)| id).collect();
        assert_eq!(ancestors, vec![NodeId(2), NodeId(1), NodeId(0)]);
    }

    #[test]
    fn busy_detection() {
        let snapshot = DocumentSnapshot::from_raw(
            1,
            raw(json!({
                "nodes": [
                    { "tag": "button", "attrs": { "aria-busy": "true" } },
                    { "tag": "button", "class": "loading" },
                    { "tag": "button" },
                    { "tag": "i", "parent": 2, "class": "el-icon-spinner2" },
                    { "tag": "button" },
                    { "tag": "i", "parent": 4, "class": "is-loaded" },
                    { "tag": "button", "attrs": { "aria-busy": "false" } }
                ]
            })),
        );
        assert!(snapshot.is_busy(NodeId(0)));
        assert!(snapshot.is_busy(NodeId(1)));
        assert!(snapshot.is_busy(NodeId(2)));
        assert!(!snapshot.is_busy(NodeId(4)));
        assert!(!snapshot.is_busy(NodeId(6)));
        assert!(!snapshot.is_busy(NodeId(42)));
    }

    #[test]
    fn app_root_and_components() {
        let snapshot = DocumentSnapshot::from_raw(
            1,
            raw(json!({
                "path": "/crm/leads",
                "nodes": [{ "tag": "div", "attrs": { "id": "app" } }],
                "components": [
                    { "uid": 0, "name": "App" },
                    { "uid": 4, "setupName": "Leads", "parent": 0,
                      "collections": { "leads": { "loading": false, "reload": true } } }
                ],
                "app": { "node": 0, "router": true, "root": 0,
                         "route": { "name": "Leads", "path": "/crm/leads" } }
            })),
        );
        let app = snapshot.app.as_ref().unwrap();
        assert_eq!(app.node, Some(NodeId(0)));
        assert_eq!(
            app.current_route,
            Some(RouteDescriptor::named("Leads", "/crm/leads"))
        );
        let leads = snapshot.components.get(ComponentUid(4)).unwrap();
        assert_eq!(leads.display_name(), Some("Leads"));
        assert_eq!(
            leads.collection("leads"),
            Some(CollectionState::idle_with_reload())
        );
        assert_eq!(leads.parent().map(|p| p.uid()), Some(ComponentUid(0)));
    }
}
