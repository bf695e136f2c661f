//! Chromium DevTools Protocol adapter.
//!
//! Connects to a running Chromium (or launches one), attaches to the single page target the
//! agent watches, evaluates scripts in it, and republishes the few page events the agent
//! cares about on a broadcast bus.

use std::{env, path::PathBuf};

use tokio::sync::broadcast;
use which::which;

pub mod metrics;
pub mod protocol;
pub mod registry;
pub mod transport;
pub mod util;

pub mod ids {
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    /// Unique identifier for an attached page/tab.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
    pub struct PageId(pub Uuid);

    /// Logical session the page was attached under.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
    pub struct SessionId(pub Uuid);

    impl PageId {
        pub fn new() -> Self {
            Self(Uuid::new_v4())
        }
    }

    impl Default for PageId {
        fn default() -> Self {
            Self::new()
        }
    }

    impl SessionId {
        pub fn new() -> Self {
            Self(Uuid::new_v4())
        }
    }

    impl Default for SessionId {
        fn default() -> Self {
            Self::new()
        }
    }
}

pub mod error {
    use serde::{Deserialize, Serialize};
    use std::fmt;
    use thiserror::Error;

    /// High-level error categories surfaced by the adapter.
    #[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
    pub enum AdapterErrorKind {
        #[error("command timed out")]
        Timeout,
        #[error("cdp i/o failure")]
        CdpIo,
        #[error("page target not found")]
        TargetNotFound,
        #[error("script raised an exception")]
        ScriptException,
        #[error("internal error")]
        Internal,
    }

    /// Enriched error metadata passed back to higher layers.
    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub struct AdapterError {
        pub kind: AdapterErrorKind,
        pub hint: Option<String>,
        pub retriable: bool,
        pub data: Option<serde_json::Value>,
    }

    impl fmt::Display for AdapterError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.kind)?;
            if let Some(hint) = &self.hint {
                write!(f, ": {}", hint)?;
            }
            Ok(())
        }
    }

    impl std::error::Error for AdapterError {}

    impl AdapterError {
        pub fn new(kind: AdapterErrorKind) -> Self {
            Self {
                kind,
                hint: None,
                retriable: false,
                data: None,
            }
        }

        pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
            self.hint = Some(hint.into());
            self
        }

        pub fn retriable(mut self, flag: bool) -> Self {
            self.retriable = flag;
            self
        }

        pub fn with_data(mut self, data: serde_json::Value) -> Self {
            self.data = Some(data);
            self
        }

        pub(crate) fn decode(err: serde_json::Error) -> Self {
            Self::new(AdapterErrorKind::Internal).with_hint(format!("decode failed: {err}"))
        }
    }
}

pub mod events {
    use super::ids::PageId;
    use serde::{Deserialize, Serialize};

    /// Page events republished by the adapter.
    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub enum RawEvent {
        /// A `Runtime.addBinding` function was called from page script.
        BindingCalled {
            page: PageId,
            name: String,
            payload: String,
        },
        /// The main frame committed a new document.
        PageNavigated { page: PageId, url: String, ts: u64 },
        /// History API / fragment navigation inside the same document.
        SameDocumentNavigated { page: PageId, url: String, ts: u64 },
        /// The target went away or the session was detached.
        PageClosed { page: PageId, reason: String },
        /// A detached page was attached again under the same id; `url` is the new document.
        PageReattached { page: PageId, url: String },
        Error {
            page: Option<PageId>,
            message: String,
        },
    }

    impl RawEvent {
        pub fn page(&self) -> Option<PageId> {
            match self {
                RawEvent::BindingCalled { page, .. }
                | RawEvent::PageNavigated { page, .. }
                | RawEvent::SameDocumentNavigated { page, .. }
                | RawEvent::PageClosed { page, .. }
                | RawEvent::PageReattached { page, .. } => Some(*page),
                RawEvent::Error { page, .. } => *page,
            }
        }
    }
}

pub mod config {
    use crate::detect_chrome_executable;
    use serde::{Deserialize, Serialize};
    use std::path::PathBuf;

    pub const DEFAULT_HTTP_ENDPOINT: &str = "http://127.0.0.1:9222";

    /// How to reach the browser and which tab to attach to.
    #[derive(Clone, Debug, Serialize, Deserialize)]
    #[serde(default)]
    pub struct CdpConfig {
        /// Explicit `ws://.../devtools/browser/...` URL; wins over everything else.
        pub websocket_url: Option<String>,
        /// DevTools HTTP endpoint used to discover the websocket URL.
        pub http_endpoint: String,
        /// Attach to the first page whose URL contains this string.
        pub page_url_contains: Option<String>,
        /// Launch a dedicated Chromium instead of attaching to a running one.
        pub launch: bool,
        pub executable: PathBuf,
        pub user_data_dir: PathBuf,
        pub headless: bool,
        /// Opened in a new tab when no existing page matches.
        pub start_url: Option<String>,
        pub default_deadline_ms: u64,
        pub heartbeat_interval_ms: u64,
    }

    impl Default for CdpConfig {
        fn default() -> Self {
            Self {
                websocket_url: None,
                http_endpoint: DEFAULT_HTTP_ENDPOINT.to_string(),
                page_url_contains: None,
                launch: false,
                executable: detect_chrome_executable().unwrap_or_default(),
                user_data_dir: PathBuf::from("./.crm-autorefresh-profile"),
                headless: false,
                start_url: None,
                default_deadline_ms: 10_000,
                heartbeat_interval_ms: 15_000,
            }
        }
    }
}

pub(crate) fn detect_chrome_executable() -> Option<PathBuf> {
    if let Ok(raw) = env::var("CRM_AUTOREFRESH_CHROME") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            let candidate = PathBuf::from(trimmed);
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    chrome_executable_names()
        .iter()
        .find_map(|name| which(name).ok())
}

fn chrome_executable_names() -> &'static [&'static str] {
    #[cfg(target_os = "windows")]
    {
        &["chrome.exe", "chromium.exe", "msedge.exe"]
    }

    #[cfg(not(target_os = "windows"))]
    {
        &[
            "google-chrome-stable",
            "google-chrome",
            "chromium",
            "chromium-browser",
        ]
    }
}

pub mod adapter {
    use super::config::CdpConfig;
    use super::error::{AdapterError, AdapterErrorKind};
    use super::events::RawEvent;
    use super::ids::PageId;
    use super::metrics;
    use super::protocol::{
        select_page_target, AttachToTargetResult, BindingCalledParams, CreateTargetResult,
        DetachedFromTargetParams, FrameNavigatedParams, GetTargetsResult,
        NavigatedWithinDocumentParams, TargetDestroyedParams,
    };
    use super::registry::Registry;
    use super::transport::{CdpTransport, ChromiumTransport, CommandTarget, TransportEvent};
    use async_trait::async_trait;
    use dashmap::DashMap;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
    use tokio::sync::{broadcast, Mutex, Notify};
    use tokio::task::JoinHandle;
    use tokio::time::sleep;
    use tokio::{select, spawn};
    use tokio_util::sync::CancellationToken;
    use tracing::{debug, info, warn};

    /// Shared event bus type alias used by the adapter.
    pub type EventBus = broadcast::Sender<RawEvent>;

    /// Minimal CDP capability surface required by upper layers.
    #[async_trait]
    pub trait Cdp: Send + Sync {
        /// Evaluate `expression` in the page's main world and return the result by value.
        async fn evaluate_script(&self, page: PageId, expression: &str)
            -> Result<Value, AdapterError>;

        /// Expose `window[name](payload)` to page script; calls arrive as
        /// [`RawEvent::BindingCalled`].
        async fn add_binding(&self, page: PageId, name: &str) -> Result<(), AdapterError>;

        fn subscribe(&self) -> broadcast::Receiver<RawEvent>;
    }

    pub struct CdpAdapter {
        pub cfg: CdpConfig,
        bus: EventBus,
        registry: Arc<Registry>,
        shutdown: CancellationToken,
        tasks: Mutex<Vec<JoinHandle<()>>>,
        transport: Arc<dyn CdpTransport>,
        sessions: DashMap<String, PageId>,
        reattach: Notify,
    }

    struct AttachedTarget {
        target_id: String,
        session: String,
        url: String,
    }

    impl CdpAdapter {
        pub fn new(cfg: CdpConfig, bus: EventBus) -> Self {
            let transport: Arc<dyn CdpTransport> = Arc::new(ChromiumTransport::new(cfg.clone()));
            Self::with_transport(cfg, bus, transport)
        }

        pub fn with_transport(
            cfg: CdpConfig,
            bus: EventBus,
            transport: Arc<dyn CdpTransport>,
        ) -> Self {
            Self {
                cfg,
                bus,
                registry: Arc::new(Registry::new()),
                shutdown: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
                transport,
                sessions: DashMap::new(),
                reattach: Notify::new(),
            }
        }

        pub fn registry(&self) -> Arc<Registry> {
            Arc::clone(&self.registry)
        }

        pub async fn start(self: Arc<Self>) -> Result<(), AdapterError> {
            let mut guard = self.tasks.lock().await;
            if !guard.is_empty() {
                return Ok(());
            }
            self.transport.start().await?;
            guard.push(spawn(Self::run_events(Arc::clone(&self))));
            guard.push(spawn(Self::run_reattach(Arc::clone(&self))));
            info!(target: "cdp-adapter", "forwarding page events");
            Ok(())
        }

        pub async fn shutdown(&self) {
            self.shutdown.cancel();
            let mut handles = self.tasks.lock().await;
            while let Some(handle) = handles.pop() {
                let _ = handle.await;
            }
        }

        /// Attach to the first page target whose URL contains `url_contains`, opening
        /// `cfg.start_url` in a new tab when nothing matches.
        pub async fn attach_page(&self, url_contains: Option<&str>) -> Result<PageId, AdapterError> {
            let attached = self.attach_target(url_contains).await?;
            let page = PageId::new();
            self.registry.insert_page(
                page,
                attached.target_id,
                attached.session.clone(),
                url_contains.map(str::to_string),
            );
            self.sessions.insert(attached.session, page);
            self.enable_domains(page).await?;
            Ok(page)
        }

        async fn attach_target(
            &self,
            url_contains: Option<&str>,
        ) -> Result<AttachedTarget, AdapterError> {
            let targets: GetTargetsResult = decode(
                self.send_browser_command("Target.getTargets", json!({}))
                    .await?,
            )?;

            let (target_id, url) = match select_page_target(&targets.target_infos, url_contains) {
                Some(info) => {
                    info!(target: "cdp-adapter", url = %info.url, "attaching to existing page");
                    (info.target_id.clone(), info.url.clone())
                }
                None => match self.cfg.start_url.as_deref() {
                    Some(url) => {
                        info!(target: "cdp-adapter", url, "no matching page; opening a new tab");
                        let created: CreateTargetResult = decode(
                            self.send_browser_command("Target.createTarget", json!({ "url": url }))
                                .await?,
                        )?;
                        (created.target_id, url.to_string())
                    }
                    None => {
                        return Err(AdapterError::new(AdapterErrorKind::TargetNotFound)
                            .with_hint(match url_contains {
                                Some(filter) => format!("no page url contains {filter:?}"),
                                None => "browser has no page targets".to_string(),
                            }));
                    }
                },
            };

            let attached: AttachToTargetResult = decode(
                self.send_browser_command(
                    "Target.attachToTarget",
                    json!({ "targetId": target_id, "flatten": true }),
                )
                .await?,
            )?;
            Ok(AttachedTarget {
                target_id,
                session: attached.session_id,
                url,
            })
        }

        async fn enable_domains(&self, page: PageId) -> Result<(), AdapterError> {
            self.send_page_command(page, "Page.enable", json!({}))
                .await?;
            self.send_page_command(page, "Runtime.enable", json!({}))
                .await?;
            Ok(())
        }

        /// Attach a detached page to a fresh target and restore its bindings.
        async fn reattach_page(&self, page: PageId) -> Result<String, AdapterError> {
            let ctx = self.registry.get(&page).ok_or_else(|| {
                AdapterError::new(AdapterErrorKind::TargetNotFound)
                    .with_hint(format!("unknown page {page:?}"))
            })?;
            let attached = self.attach_target(ctx.url_filter.as_deref()).await?;
            self.registry
                .reattach(&page, attached.target_id, attached.session.clone());
            self.sessions.insert(attached.session, page);

            let restored = async {
                self.enable_domains(page).await?;
                for name in &ctx.bindings {
                    self.send_page_command(page, "Runtime.addBinding", json!({ "name": name }))
                        .await?;
                }
                Ok::<_, AdapterError>(())
            };
            if let Err(err) = restored.await {
                self.forget_session(page);
                return Err(err);
            }
            Ok(attached.url)
        }

        async fn run_reattach(self: Arc<Self>) {
            const RETRY: Duration = Duration::from_secs(1);
            loop {
                select! {
                    _ = self.shutdown.cancelled() => return,
                    _ = self.reattach.notified() => {}
                    _ = sleep(RETRY) => {}
                }
                for page in self.registry.detached() {
                    match self.reattach_page(page).await {
                        Ok(url) => {
                            info!(target: "cdp-adapter", ?page, %url, "page re-attached");
                            self.emit(RawEvent::PageReattached { page, url });
                        }
                        Err(err) => {
                            debug!(target: "cdp-adapter", ?page, %err, "re-attach failed; retrying");
                        }
                    }
                }
            }
        }

        async fn run_events(self: Arc<Self>) {
            const STEP: Duration = Duration::from_millis(100);
            const CEILING: Duration = Duration::from_secs(5);
            let mut delay = STEP;

            loop {
                let next = select! {
                    _ = self.shutdown.cancelled() => return,
                    next = self.transport.next_event() => next,
                };
                let Some(event) = next else {
                    if self.shutdown.is_cancelled() {
                        return;
                    }
                    self.detach_all_pages("transport disconnected");
                    self.reconnect().await;
                    self.reattach.notify_one();
                    sleep(delay).await;
                    delay = (delay + STEP).min(CEILING);
                    continue;
                };
                delay = STEP;
                if let Err(err) = self.process_event(event) {
                    self.emit(RawEvent::Error {
                        page: None,
                        message: format!("cdp event handling error: {err}"),
                    });
                }
            }
        }

        async fn reconnect(&self) {
            warn!(target: "cdp-adapter", "event stream ended; reconnecting");
            match self.transport.start().await {
                Ok(()) => info!(target: "cdp-adapter", "transport back; re-attaching pages"),
                Err(err) => warn!(target: "cdp-adapter", %err, "reconnect failed"),
            }
        }

        /// Sessions do not survive a reconnect.
        fn detach_all_pages(&self, reason: &str) {
            for (page, _) in self.registry.iter() {
                if self.forget_session(page) {
                    self.emit(RawEvent::PageClosed {
                        page,
                        reason: reason.to_string(),
                    });
                }
            }
            self.sessions.clear();
        }

        fn process_event(&self, event: TransportEvent) -> Result<(), AdapterError> {
            metrics::record_event();
            match event.method.as_str() {
                "Runtime.bindingCalled" => {
                    let Some(page) = self.page_from_session(event.session_id.as_ref()) else {
                        return Ok(());
                    };
                    let payload: BindingCalledParams =
                        serde_json::from_value(event.params).map_err(AdapterError::decode)?;
                    metrics::record_binding();
                    self.emit(RawEvent::BindingCalled {
                        page,
                        name: payload.name,
                        payload: payload.payload,
                    });
                }
                "Page.frameNavigated" => {
                    let Some(page) = self.page_from_session(event.session_id.as_ref()) else {
                        return Ok(());
                    };
                    let payload: FrameNavigatedParams =
                        serde_json::from_value(event.params).map_err(AdapterError::decode)?;
                    if payload.frame.parent_id.is_some() {
                        return Ok(());
                    }
                    self.registry.set_main_frame(&page, payload.frame.id);
                    self.emit(RawEvent::PageNavigated {
                        page,
                        url: payload.frame.url,
                        ts: timestamp_now(),
                    });
                }
                "Page.navigatedWithinDocument" => {
                    let Some(page) = self.page_from_session(event.session_id.as_ref()) else {
                        return Ok(());
                    };
                    let payload: NavigatedWithinDocumentParams =
                        serde_json::from_value(event.params).map_err(AdapterError::decode)?;
                    if !self.registry.is_main_frame(&page, &payload.frame_id) {
                        return Ok(());
                    }
                    self.emit(RawEvent::SameDocumentNavigated {
                        page,
                        url: payload.url,
                        ts: timestamp_now(),
                    });
                }
                "Target.targetDestroyed" => {
                    let payload: TargetDestroyedParams =
                        serde_json::from_value(event.params).map_err(AdapterError::decode)?;
                    if let Some(page) = self.registry.page_for_target(&payload.target_id) {
                        self.detach_page(page, "target destroyed");
                    }
                }
                "Target.detachedFromTarget" => {
                    let payload: DetachedFromTargetParams =
                        serde_json::from_value(event.params).map_err(AdapterError::decode)?;
                    if let Some(page) = self.page_from_session(Some(&payload.session_id)) {
                        self.detach_page(page, "session detached");
                    }
                }
                "Inspector.detached" => {
                    if let Some(page) = self.page_from_session(event.session_id.as_ref()) {
                        self.detach_page(page, "inspector detached");
                    }
                }
                "Runtime.exceptionThrown" => {
                    debug!(target: "cdp-adapter", params = %event.params, "page exception");
                }
                _ => {
                    debug!(target: "cdp-adapter", method = %event.method, "unhandled cdp event");
                }
            }
            Ok(())
        }

        /// The page id survives; [`Self::run_reattach`] looks for a new target.
        fn detach_page(&self, page: PageId, reason: &str) {
            if self.forget_session(page) {
                self.emit(RawEvent::PageClosed {
                    page,
                    reason: reason.to_string(),
                });
                self.reattach.notify_one();
            }
        }

        fn forget_session(&self, page: PageId) -> bool {
            self.sessions.retain(|_, v| *v != page);
            self.registry.detach(&page)
        }

        fn emit(&self, event: RawEvent) {
            // No subscribers is not an error.
            let _ = self.bus.send(event);
        }

        fn page_from_session(&self, session: Option<&String>) -> Option<PageId> {
            session.and_then(|id| self.sessions.get(id).map(|entry| *entry.value()))
        }

        async fn send_browser_command(
            &self,
            method: &str,
            params: Value,
        ) -> Result<Value, AdapterError> {
            self.send_tracked(CommandTarget::Browser, method, params)
                .await
        }

        async fn send_page_command(
            &self,
            page: PageId,
            method: &str,
            params: Value,
        ) -> Result<Value, AdapterError> {
            let session = self.registry.get_cdp_session(&page).ok_or_else(|| {
                AdapterError::new(AdapterErrorKind::TargetNotFound)
                    .with_hint(format!("missing cdp session for page {page:?}"))
            })?;
            self.send_tracked(CommandTarget::Session(session), method, params)
                .await
        }

        async fn send_tracked(
            &self,
            target: CommandTarget,
            method: &str,
            params: Value,
        ) -> Result<Value, AdapterError> {
            let start = Instant::now();
            metrics::record_command();
            match self.transport.send_command(target, method, params).await {
                Ok(value) => {
                    metrics::record_command_success(start.elapsed());
                    Ok(value)
                }
                Err(err) => {
                    metrics::record_command_failure();
                    Err(err)
                }
            }
        }
    }

    #[async_trait]
    impl Cdp for CdpAdapter {
        async fn evaluate_script(
            &self,
            page: PageId,
            expression: &str,
        ) -> Result<Value, AdapterError> {
            let response = self
                .send_page_command(
                    page,
                    "Runtime.evaluate",
                    json!({
                        "expression": expression,
                        "awaitPromise": true,
                        "returnByValue": true,
                        "userGesture": true,
                    }),
                )
                .await?;

            if let Some(details) = response.get("exceptionDetails") {
                return Err(AdapterError::new(AdapterErrorKind::ScriptException)
                    .with_hint("evaluate_script raised exception")
                    .with_data(details.clone()));
            }

            Ok(response
                .get("result")
                .and_then(|res| res.get("value"))
                .cloned()
                .unwrap_or(Value::Null))
        }

        async fn add_binding(&self, page: PageId, name: &str) -> Result<(), AdapterError> {
            self.send_page_command(page, "Runtime.addBinding", json!({ "name": name }))
                .await?;
            self.registry.remember_binding(&page, name);
            Ok(())
        }

        fn subscribe(&self) -> broadcast::Receiver<RawEvent> {
            self.bus.subscribe()
        }
    }

    fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, AdapterError> {
        serde_json::from_value(value).map_err(AdapterError::decode)
    }

    fn timestamp_now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

}

pub use adapter::{Cdp, CdpAdapter, EventBus};
pub use config::CdpConfig;
pub use error::{AdapterError, AdapterErrorKind};
pub use events::RawEvent;
pub use ids::PageId;

pub fn event_bus(buffer: usize) -> (EventBus, broadcast::Receiver<RawEvent>) {
    broadcast::channel(buffer.max(1))
}
