//! The host's component-instance graph as captured in one snapshot.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ComponentUid(pub u64);

impl fmt::Display for ComponentUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Read-only capability surface of one exposed collection (e.g. `leads`).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct CollectionState {
    pub loading: bool,
    pub reload_exposed: bool,
}

impl CollectionState {
    pub fn idle_with_reload() -> Self {
        Self {
            loading: false,
            reload_exposed: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComponentRecord {
    pub uid: ComponentUid,
    /// Declared `name` option.
    pub name: Option<String>,
    /// Compiler-inferred `__name` for `<script setup>` components.
    pub setup_name: Option<String>,
    pub parent: Option<ComponentUid>,
    pub collections: BTreeMap<String, CollectionState>,
}

impl ComponentRecord {
    pub fn new(uid: u64) -> Self {
        Self {
            uid: ComponentUid(uid),
            name: None,
            setup_name: None,
            parent: None,
            collections: BTreeMap::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn setup_named(mut self, name: impl Into<String>) -> Self {
        self.setup_name = Some(name.into());
        self
    }

    pub fn child_of(mut self, parent: u64) -> Self {
        self.parent = Some(ComponentUid(parent));
        self
    }

    pub fn with_collection(mut self, field: impl Into<String>, state: CollectionState) -> Self {
        self.collections.insert(field.into(), state);
        self
    }

    pub fn declares_name(&self, wanted: &str) -> bool {
        self.name.as_deref() == Some(wanted) || self.setup_name.as_deref() == Some(wanted)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentGraph {
    records: HashMap<ComponentUid, ComponentRecord>,
}

impl ComponentGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: ComponentRecord) {
        self.records.insert(record.uid, record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, uid: ComponentUid) -> Option<ComponentRef<'_>> {
        self.records
            .get(&uid)
            .map(|record| ComponentRef { graph: self, record })
    }
}

/// Non-owning handle into a [`ComponentGraph`]; it cannot outlive the snapshot it came from.
#[derive(Clone, Copy)]
pub struct ComponentRef<'g> {
    graph: &'g ComponentGraph,
    record: &'g ComponentRecord,
}

impl<'g> ComponentRef<'g> {
    pub fn uid(&self) -> ComponentUid {
        self.record.uid
    }

    pub fn record(&self) -> &'g ComponentRecord {
        self.record
    }

    pub fn display_name(&self) -> Option<&'g str> {
        self.record
            .name
            .as_deref()
            .or(self.record.setup_name.as_deref())
    }

    /// Dangling parent links read as "no parent".
    pub fn parent(&self) -> Option<ComponentRef<'g>> {
        self.record.parent.and_then(|uid| self.graph.get(uid))
    }

    pub fn collection(&self, field: &str) -> Option<CollectionState> {
        self.record.collections.get(field).copied()
    }
}

impl fmt::Debug for ComponentRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRef")
            .field("uid", &self.record.uid)
            .field("name", &self.display_name())
            .finish()
    }
}
