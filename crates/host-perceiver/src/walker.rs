//! Depth-first search for a named component in a snapshot's instance graph.

use std::collections::HashSet;

use tracing::trace;

use crate::components::{ComponentRef, ComponentUid};
use crate::model::{DocumentSnapshot, NodeId};

/// Find the first component declaring `name` (as `name` or `__name`).
///
/// Search order: the parent chain of `root`'s own instance, then every descendant element of
/// `root` in document order, checking each element's instance and its parent chain. An
/// element without an instance pointer falls back to the application root instance when it
/// is the mount point. Missing data and cycles read as "no match".
pub fn find_named_component<'s>(
    snapshot: &'s DocumentSnapshot,
    root: NodeId,
    name: &str,
) -> Option<ComponentRef<'s>> {
    snapshot.node(root)?;

    if let Some(found) = instance_of(snapshot, root).and_then(|uid| match_chain(snapshot, uid, name))
    {
        return Some(found);
    }

    for child in snapshot.descendants(root) {
        if let Some(found) =
            instance_of(snapshot, child).and_then(|uid| match_chain(snapshot, uid, name))
        {
            trace!(target: "host-perceiver", node = child.0, uid = found.uid().0, "component matched");
            return Some(found);
        }
    }
    None
}

fn instance_of(snapshot: &DocumentSnapshot, node: NodeId) -> Option<ComponentUid> {
    let own = snapshot.node(node).and_then(|n| n.component);
    own.or_else(|| {
        snapshot
            .app
            .as_ref()
            .filter(|app| app.node == Some(node))
            .and_then(|app| app.root_instance)
    })
}

fn match_chain<'s>(
    snapshot: &'s DocumentSnapshot,
    start: ComponentUid,
    name: &str,
) -> Option<ComponentRef<'s>> {
    let mut seen = HashSet::new();
    let mut cursor = snapshot.components.get(start);
    while let Some(current) = cursor {
        if !seen.insert(current.uid()) || seen.len() > snapshot.components.len() {
            return None;
        }
        if current.record().declares_name(name) {
            return Some(current);
        }
        cursor = current.parent();
    }
    None
}
