//! In-memory [`HostPort`] and snapshot builder for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use autorefresh_core_types::{HostSignal, RouteDescriptor};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::components::{ComponentGraph, ComponentRecord};
use crate::errors::PerceiverError;
use crate::model::{
    ActionTarget, Activation, AppRoot, DocumentSnapshot, DomNode, LiveState, NodeId, Readiness,
};
use crate::ports::HostPort;

/// Builds a [`DocumentSnapshot`] node by node, parents before children.
pub struct SnapshotBuilder {
    snapshot: DocumentSnapshot,
}

impl SnapshotBuilder {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            snapshot: DocumentSnapshot {
                seq: 1,
                path: path.into(),
                ..DocumentSnapshot::default()
            },
        }
    }

    pub fn seq(mut self, seq: u64) -> Self {
        self.snapshot.seq = seq;
        self
    }

    /// Append an element; visible (24x24) unless resized.
    pub fn element(&mut self, parent: Option<NodeId>, tag: &str) -> NodeId {
        let id = NodeId(self.snapshot.nodes.len());
        self.snapshot.nodes.push(DomNode {
            tag: tag.to_ascii_lowercase(),
            width: 24.0,
            height: 24.0,
            parent,
            ..DomNode::default()
        });
        if let Some(p) = parent {
            self.snapshot.nodes[p.0].children.push(id);
        }
        id
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut DomNode {
        &mut self.snapshot.nodes[id.0]
    }

    pub fn attr(&mut self, id: NodeId, name: &str, value: &str) -> &mut Self {
        self.node_mut(id)
            .attributes
            .insert(name.to_string(), value.to_string());
        self
    }

    pub fn class(&mut self, id: NodeId, class: &str) -> &mut Self {
        self.node_mut(id).classes.push(class.to_string());
        self
    }

    pub fn component(&mut self, record: ComponentRecord) -> &mut Self {
        self.snapshot.components.insert(record);
        self
    }

    pub fn app(&mut self, app: AppRoot) -> &mut Self {
        self.snapshot.app = Some(app);
        self
    }

    pub fn build(self) -> DocumentSnapshot {
        self.snapshot
    }

    pub fn graph(&self) -> &ComponentGraph {
        &self.snapshot.components
    }
}

#[derive(Default)]
struct FakeState {
    path: String,
    snapshot: Option<DocumentSnapshot>,
    snapshot_error: Option<String>,
    live: HashMap<ActionTarget, LiveState>,
    /// Applied once the precheck has read the target.
    live_after_check: HashMap<ActionTarget, LiveState>,
    readiness: Vec<Readiness>,
    route: Option<RouteDescriptor>,
    activations: Vec<ActionTarget>,
    hook_installs: usize,
    hook_failures: usize,
    history_hook_installs: usize,
    probes: usize,
    path_reads: usize,
}

/// Host double: scripted path, snapshot, live states and signals.
pub struct FakeHost {
    state: Mutex<FakeState>,
    signals: broadcast::Sender<HostSignal>,
    snapshots: AtomicU64,
}

impl FakeHost {
    pub fn new(path: impl Into<String>) -> Self {
        let (signals, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(FakeState {
                path: path.into(),
                readiness: vec![Readiness {
                    app_mounted: true,
                    router_present: true,
                }],
                ..FakeState::default()
            }),
            signals,
            snapshots: AtomicU64::new(0),
        }
    }

    pub fn set_path(&self, path: impl Into<String>) {
        self.state.lock().path = path.into();
    }

    pub fn set_route(&self, route: Option<RouteDescriptor>) {
        self.state.lock().route = route;
    }

    pub fn set_snapshot(&self, snapshot: DocumentSnapshot) {
        let mut state = self.state.lock();
        state.snapshot = Some(snapshot);
        state.snapshot_error = None;
    }

    pub fn fail_snapshots(&self, message: impl Into<String>) {
        self.state.lock().snapshot_error = Some(message.into());
    }

    pub fn set_live_state(&self, target: ActionTarget, live: LiveState) {
        self.state.lock().live.insert(target, live);
    }

    /// The target reads as `live` only after the next `control_state` call.
    pub fn change_after_check(&self, target: ActionTarget, live: LiveState) {
        self.state.lock().live_after_check.insert(target, live);
    }

    /// The next `count` hook installs fail.
    pub fn fail_hook_installs(&self, count: usize) {
        self.state.lock().hook_failures = count;
    }

    /// Readiness answers in order; the last one repeats.
    pub fn set_readiness(&self, answers: Vec<Readiness>) {
        self.state.lock().readiness = answers;
    }

    pub fn emit(&self, signal: HostSignal) {
        let _ = self.signals.send(signal);
    }

    pub fn activations(&self) -> Vec<ActionTarget> {
        self.state.lock().activations.clone()
    }

    pub fn hook_installs(&self) -> usize {
        self.state.lock().hook_installs
    }

    pub fn history_hook_installs(&self) -> usize {
        self.state.lock().history_hook_installs
    }

    pub fn readiness_probes(&self) -> usize {
        self.state.lock().probes
    }

    pub fn path_reads(&self) -> usize {
        self.state.lock().path_reads
    }

    pub fn snapshots_taken(&self) -> u64 {
        self.snapshots.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HostPort for FakeHost {
    async fn current_path(&self) -> Result<String, PerceiverError> {
        let mut state = self.state.lock();
        state.path_reads += 1;
        Ok(state.path.clone())
    }

    async fn snapshot(&self) -> Result<DocumentSnapshot, PerceiverError> {
        self.snapshots.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock();
        if let Some(err) = &state.snapshot_error {
            return Err(PerceiverError::Transport(err.clone()));
        }
        let mut snapshot = state.snapshot.clone().unwrap_or_default();
        snapshot.path = state.path.clone();
        Ok(snapshot)
    }

    async fn control_state(&self, target: &ActionTarget) -> Result<LiveState, PerceiverError> {
        let mut state = self.state.lock();
        let live = state
            .live
            .get(target)
            .copied()
            .unwrap_or_else(LiveState::actionable);
        if let Some(next) = state.live_after_check.remove(target) {
            state.live.insert(target.clone(), next);
        }
        Ok(live)
    }

    async fn activate(&self, target: &ActionTarget) -> Result<Activation, PerceiverError> {
        let mut state = self.state.lock();
        let live = state
            .live
            .get(target)
            .copied()
            .unwrap_or_else(LiveState::actionable);
        if !live.present || live.disabled || live.busy {
            return Ok(Activation::Declined(live));
        }
        state.activations.push(target.clone());
        Ok(Activation::Performed)
    }

    async fn probe_readiness(&self) -> Result<Readiness, PerceiverError> {
        let mut state = self.state.lock();
        let idx = state.probes.min(state.readiness.len().saturating_sub(1));
        state.probes += 1;
        Ok(state.readiness.get(idx).copied().unwrap_or_default())
    }

    async fn install_history_hook(&self) -> Result<(), PerceiverError> {
        self.state.lock().history_hook_installs += 1;
        Ok(())
    }

    async fn install_navigation_hook(&self) -> Result<(), PerceiverError> {
        let mut state = self.state.lock();
        if state.hook_failures > 0 {
            state.hook_failures -= 1;
            return Err(PerceiverError::Script(
                "router not reachable; navigation hook not installed".into(),
            ));
        }
        state.hook_installs += 1;
        Ok(())
    }

    async fn current_route(&self) -> Result<Option<RouteDescriptor>, PerceiverError> {
        let state = self.state.lock();
        Ok(state
            .route
            .clone()
            .or_else(|| Some(RouteDescriptor::from_path(state.path.clone()))))
    }

    fn signals(&self) -> broadcast::Receiver<HostSignal> {
        self.signals.subscribe()
    }
}
