use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use autorefresh_core_types::{HostSignal, RouteDescriptor};
use cdp_adapter::{Cdp, PageId};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::PerceiverError;
use crate::metrics;
use crate::model::{
    ActionTarget, Activation, DocumentSnapshot, LiveState, RawSnapshot, Readiness,
};
use crate::scripts::{self, SnapshotScript};
use crate::signals::translate;

pub const DEFAULT_BINDING_NAME: &str = "__crmAutoRefreshSignal";

/// Everything the agent needs from the host page.
#[async_trait]
pub trait HostPort: Send + Sync {
    async fn current_path(&self) -> Result<String, PerceiverError>;

    async fn snapshot(&self) -> Result<DocumentSnapshot, PerceiverError>;

    async fn control_state(&self, target: &ActionTarget) -> Result<LiveState, PerceiverError>;

    /// Click the element, or call the exposed reload capability, at most once. The target is
    /// re-checked in the same page turn and declined if it is gone, disabled, or busy.
    async fn activate(&self, target: &ActionTarget) -> Result<Activation, PerceiverError>;

    async fn probe_readiness(&self) -> Result<Readiness, PerceiverError>;

    /// History and unload listeners; independent of the router.
    async fn install_history_hook(&self) -> Result<(), PerceiverError>;

    async fn install_navigation_hook(&self) -> Result<(), PerceiverError>;

    async fn current_route(&self) -> Result<Option<RouteDescriptor>, PerceiverError>;

    fn signals(&self) -> broadcast::Receiver<HostSignal>;
}

#[derive(Clone, Debug)]
pub struct HostOptions {
    pub app_selector: String,
    pub binding_name: String,
    /// Attributes copied into each snapshot node.
    pub capture_attributes: Vec<String>,
    pub max_nodes: usize,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            app_selector: "#app".to_string(),
            binding_name: DEFAULT_BINDING_NAME.to_string(),
            capture_attributes: [
                "id",
                "data-tooltip",
                "aria-label",
                "title",
                "data-original-title",
                "aria-busy",
                "d",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            max_nodes: 20_000,
        }
    }
}

/// [`HostPort`] backed by script evaluation in one attached tab.
pub struct AdapterPort<C>
where
    C: Cdp + Send + Sync,
{
    adapter: Arc<C>,
    page: PageId,
    options: HostOptions,
    seq: AtomicU64,
    signals: broadcast::Sender<HostSignal>,
    pump: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl<C> AdapterPort<C>
where
    C: Cdp + Send + Sync + 'static,
{
    pub fn new(adapter: Arc<C>, page: PageId, options: HostOptions) -> Self {
        let (signals, _) = broadcast::channel(64);
        Self {
            adapter,
            page,
            options,
            seq: AtomicU64::new(0),
            signals,
            pump: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Register the page binding and start forwarding adapter events as host signals.
    pub async fn connect(
        adapter: Arc<C>,
        page: PageId,
        options: HostOptions,
    ) -> Result<Arc<Self>, PerceiverError> {
        adapter.add_binding(page, &options.binding_name).await?;
        let port = Arc::new(Self::new(adapter, page, options));
        port.spawn_signal_pump();
        Ok(port)
    }

    pub fn page(&self) -> PageId {
        self.page
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.pump.lock().take() {
            handle.abort();
        }
    }

    fn spawn_signal_pump(&self) {
        let mut events = self.adapter.subscribe();
        let sender = self.signals.clone();
        let cancel = self.cancel.clone();
        let page = self.page;
        let binding = self.options.binding_name.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Ok(event) if event.page() == Some(page) => {
                            if let Some(signal) = translate(&event, &binding) {
                                debug!(target: "host-perceiver", ?signal, "host signal");
                                let _ = sender.send(signal);
                            }
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(target: "host-perceiver", skipped, "adapter events dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });
        *self.pump.lock() = Some(handle);
    }

    async fn eval<T: for<'de> Deserialize<'de>>(&self, script: &str) -> Result<T, PerceiverError> {
        let value = self.adapter.evaluate_script(self.page, script).await?;
        serde_json::from_value(value).map_err(PerceiverError::from)
    }
}

impl<C> Drop for AdapterPort<C>
where
    C: Cdp + Send + Sync,
{
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[derive(Deserialize)]
struct ControlStateReply {
    #[serde(default)]
    present: bool,
    #[serde(default)]
    disabled: bool,
    #[serde(default)]
    busy: bool,
    #[serde(default)]
    visible: bool,
    #[serde(default)]
    stale: bool,
}

impl ControlStateReply {
    fn live(&self) -> LiveState {
        LiveState {
            present: self.present,
            disabled: self.disabled,
            busy: self.busy,
            visible: self.visible,
        }
    }
}

#[derive(Deserialize)]
struct ActivateReply {
    ok: bool,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    current: Option<u64>,
    #[serde(default)]
    state: Option<ControlStateReply>,
}

#[async_trait]
impl<C> HostPort for AdapterPort<C>
where
    C: Cdp + Send + Sync + 'static,
{
    async fn current_path(&self) -> Result<String, PerceiverError> {
        self.eval(scripts::current_path()).await
    }

    async fn snapshot(&self) -> Result<DocumentSnapshot, PerceiverError> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let script = SnapshotScript {
            seq,
            app_selector: &self.options.app_selector,
            attributes: &self.options.capture_attributes,
            max_nodes: self.options.max_nodes,
        }
        .render();

        let started = Instant::now();
        let raw: RawSnapshot = match self.eval(&script).await {
            Ok(raw) => raw,
            Err(err) => {
                metrics::record_snapshot_failure();
                return Err(err);
            }
        };
        let snapshot = DocumentSnapshot::from_raw(seq, raw);
        metrics::record_snapshot(started.elapsed());
        debug!(
            target: "host-perceiver",
            seq,
            nodes = snapshot.nodes.len(),
            components = snapshot.components.len(),
            truncated = snapshot.truncated,
            path = %snapshot.path,
            "snapshot captured"
        );
        if let Some(err) = &snapshot.introspection_error {
            debug!(target: "host-perceiver", seq, error = %err, "instance graph capture threw");
        }
        Ok(snapshot)
    }

    async fn control_state(&self, target: &ActionTarget) -> Result<LiveState, PerceiverError> {
        let reply: ControlStateReply = self.eval(&scripts::control_state(target)).await?;
        if reply.stale {
            debug!(target: "host-perceiver", %target, "handle outlived its snapshot");
            return Ok(LiveState::gone());
        }
        Ok(reply.live())
    }

    async fn activate(&self, target: &ActionTarget) -> Result<Activation, PerceiverError> {
        let reply: ActivateReply = self.eval(&scripts::activate(target)).await?;
        if reply.ok {
            return Ok(Activation::Performed);
        }
        match (reply.reason.as_deref(), reply.current, reply.state) {
            (Some("stale"), Some(current), _) => Err(PerceiverError::StaleHandle {
                handle: target.seq(),
                current,
            }),
            (Some("gone"), _, _) => Ok(Activation::Declined(LiveState::gone())),
            (Some("disabled" | "busy"), _, Some(state)) => {
                debug!(target: "host-perceiver", %target, "target changed after precheck");
                Ok(Activation::Declined(state.live()))
            }
            (reason, _, _) => Err(PerceiverError::Script(format!(
                "target {target} not activatable: {}",
                reason.unwrap_or("unknown")
            ))),
        }
    }

    async fn probe_readiness(&self) -> Result<Readiness, PerceiverError> {
        self.eval(&scripts::readiness(&self.options.app_selector))
            .await
    }

    async fn install_history_hook(&self) -> Result<(), PerceiverError> {
        let _: bool = self
            .eval(&scripts::history_hook(&self.options.binding_name))
            .await?;
        Ok(())
    }

    async fn install_navigation_hook(&self) -> Result<(), PerceiverError> {
        let installed: bool = self
            .eval(&scripts::navigation_hook(
                &self.options.app_selector,
                &self.options.binding_name,
            ))
            .await?;
        if installed {
            Ok(())
        } else {
            Err(PerceiverError::Script(
                "router not reachable; navigation hook not installed".into(),
            ))
        }
    }

    async fn current_route(&self) -> Result<Option<RouteDescriptor>, PerceiverError> {
        #[derive(Deserialize)]
        struct RouteReply {
            name: Option<String>,
            path: Option<String>,
        }
        let value: Value = self
            .adapter
            .evaluate_script(self.page, &scripts::current_route(&self.options.app_selector))
            .await?;
        if value.is_null() {
            return Ok(None);
        }
        let reply: RouteReply = serde_json::from_value(value)?;
        Ok(Some(RouteDescriptor {
            name: reply.name.filter(|n| !n.is_empty()),
            path: reply.path,
        }))
    }

    fn signals(&self) -> broadcast::Receiver<HostSignal> {
        self.signals.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autorefresh_core_types::{NavigationEvent, NavigationSource};
    use cdp_adapter::{AdapterError, RawEvent};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::time::Duration;
    use tokio::time::timeout;

    struct ScriptedCdp {
        replies: Mutex<VecDeque<Value>>,
        scripts: Mutex<Vec<String>>,
        bindings: Mutex<Vec<String>>,
        bus: broadcast::Sender<RawEvent>,
    }

    impl ScriptedCdp {
        fn new() -> Arc<Self> {
            let (bus, _) = broadcast::channel(16);
            Arc::new(Self {
                replies: Mutex::new(VecDeque::new()),
                scripts: Mutex::new(Vec::new()),
                bindings: Mutex::new(Vec::new()),
                bus,
            })
        }

        fn reply(&self, value: Value) {
            self.replies.lock().push_back(value);
        }
    }

    #[async_trait]
    impl Cdp for ScriptedCdp {
        async fn evaluate_script(
            &self,
            _page: PageId,
            expression: &str,
        ) -> Result<Value, AdapterError> {
            self.scripts.lock().push(expression.to_string());
            Ok(self.replies.lock().pop_front().unwrap_or(Value::Null))
        }

        async fn add_binding(&self, _page: PageId, name: &str) -> Result<(), AdapterError> {
            self.bindings.lock().push(name.to_string());
            Ok(())
        }

        fn subscribe(&self) -> broadcast::Receiver<RawEvent> {
            self.bus.subscribe()
        }
    }

    #[tokio::test]
    async fn snapshots_get_increasing_sequence_numbers() {
        let cdp = ScriptedCdp::new();
        let port = AdapterPort::new(cdp.clone(), PageId::new(), HostOptions::default());
        cdp.reply(json!({ "path": "/crm/leads", "nodes": [] }));
        cdp.reply(json!({ "path": "/crm/leads", "nodes": [] }));
        let first = port.snapshot().await.unwrap();
        let second = port.snapshot().await.unwrap();
        assert_eq!(first.seq, 1);
        assert_eq!(second.seq, 2);
        assert!(cdp.scripts.lock()[1].contains(r#""seq":2"#));
    }

    #[tokio::test]
    async fn stale_handles_read_as_gone() {
        let cdp = ScriptedCdp::new();
        let port = AdapterPort::new(cdp.clone(), PageId::new(), HostOptions::default());
        let target = ActionTarget::Element(crate::model::ElementHandle {
            seq: 1,
            node: crate::model::NodeId(4),
        });
        cdp.reply(json!({ "present": false, "stale": true }));
        assert_eq!(port.control_state(&target).await.unwrap(), LiveState::gone());

        cdp.reply(json!({ "ok": false, "reason": "stale", "current": 3 }));
        let err = port.activate(&target).await.unwrap_err();
        assert!(matches!(
            err,
            PerceiverError::StaleHandle {
                handle: 1,
                current: 3
            }
        ));
    }

    #[tokio::test]
    async fn activation_declined_by_the_page_is_not_an_error() {
        let cdp = ScriptedCdp::new();
        let port = AdapterPort::new(cdp.clone(), PageId::new(), HostOptions::default());
        let target = ActionTarget::Element(crate::model::ElementHandle {
            seq: 1,
            node: crate::model::NodeId(4),
        });

        cdp.reply(json!({
            "ok": false,
            "reason": "busy",
            "state": { "present": true, "disabled": false, "busy": true, "visible": true }
        }));
        assert_eq!(
            port.activate(&target).await.unwrap(),
            Activation::Declined(LiveState {
                busy: true,
                ..LiveState::actionable()
            })
        );

        cdp.reply(json!({ "ok": false, "reason": "gone" }));
        assert_eq!(
            port.activate(&target).await.unwrap(),
            Activation::Declined(LiveState::gone())
        );

        cdp.reply(json!({ "ok": true }));
        assert_eq!(port.activate(&target).await.unwrap(), Activation::Performed);
    }

    #[tokio::test]
    async fn hook_install_requires_router() {
        let cdp = ScriptedCdp::new();
        let port = AdapterPort::new(cdp.clone(), PageId::new(), HostOptions::default());
        cdp.reply(json!(false));
        assert!(port.install_navigation_hook().await.is_err());
        cdp.reply(json!(true));
        assert!(port.install_navigation_hook().await.is_ok());
    }

    #[tokio::test]
    async fn history_hook_installs_without_router() {
        let cdp = ScriptedCdp::new();
        let port = AdapterPort::new(cdp.clone(), PageId::new(), HostOptions::default());
        cdp.reply(json!(true));
        port.install_history_hook().await.unwrap();
        let script = cdp.scripts.lock().last().cloned().unwrap();
        assert!(script.contains("popstate"));
        assert!(!script.contains("$router"));
    }

    #[tokio::test]
    async fn current_route_handles_null() {
        let cdp = ScriptedCdp::new();
        let port = AdapterPort::new(cdp.clone(), PageId::new(), HostOptions::default());
        cdp.reply(Value::Null);
        assert_eq!(port.current_route().await.unwrap(), None);
        cdp.reply(json!({ "name": "Leads", "path": "/crm/leads" }));
        assert_eq!(
            port.current_route().await.unwrap(),
            Some(RouteDescriptor::named("Leads", "/crm/leads"))
        );
    }

    #[tokio::test]
    async fn connect_registers_binding_and_forwards_own_page_only() {
        let cdp = ScriptedCdp::new();
        let page = PageId::new();
        let port = AdapterPort::connect(cdp.clone(), page, HostOptions::default())
            .await
            .unwrap();
        assert_eq!(cdp.bindings.lock().as_slice(), [DEFAULT_BINDING_NAME]);
        let mut signals = port.signals();

        cdp.bus
            .send(RawEvent::BindingCalled {
                page: PageId::new(),
                name: DEFAULT_BINDING_NAME.into(),
                payload: r#"{"kind":"teardown"}"#.into(),
            })
            .unwrap();
        cdp.bus
            .send(RawEvent::BindingCalled {
                page,
                name: DEFAULT_BINDING_NAME.into(),
                payload: r#"{"kind":"route","name":"Leads","path":"/crm/leads"}"#.into(),
            })
            .unwrap();

        let signal = timeout(Duration::from_secs(1), signals.recv())
            .await
            .expect("signal in time")
            .expect("signal");
        assert_eq!(
            signal,
            HostSignal::RouteChanged(NavigationEvent::new(
                RouteDescriptor::named("Leads", "/crm/leads"),
                NavigationSource::Router
            ))
        );
        port.shutdown();
    }
}
