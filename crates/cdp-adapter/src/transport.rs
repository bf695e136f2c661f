//! Websocket link to Chromium.
//!
//! A [`Link`] owns one DevTools connection: a pump task multiplexes outbound commands
//! and inbound frames, and an optional keepalive pings the browser. [`ChromiumTransport`]
//! hands out the current link and dials a fresh one once the old one is closed.

use std::collections::HashMap;
use std::convert::TryInto;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::async_process::Child;
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::cdp::browser_protocol::target::SessionId as CdpSessionId;
use chromiumoxide::cdp::events::CdpEventMessage;
use chromiumoxide::conn::Connection;
use chromiumoxide::error::CdpError;
use chromiumoxide_types::{CallId, CdpJsonEventMessage, Message, MethodId, Response};
use futures::{future::BoxFuture, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::CdpConfig;
use crate::error::{AdapterError, AdapterErrorKind};
use crate::metrics;
use crate::util::{discover_ws_url, extract_ws_url};

/// One CDP event frame, still untyped.
#[derive(Clone, Debug)]
pub struct TransportEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

/// Where a command is routed: the browser endpoint or a flattened page session.
#[derive(Clone, Debug)]
pub enum CommandTarget {
    Browser,
    Session(String),
}

#[async_trait]
pub trait CdpTransport: Send + Sync {
    async fn start(&self) -> Result<(), AdapterError>;
    async fn next_event(&self) -> Option<TransportEvent>;
    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError>;
}

type Reply = oneshot::Sender<Result<Value, AdapterError>>;

type Dialer =
    Arc<dyn Fn(CdpConfig) -> BoxFuture<'static, Result<Link, AdapterError>> + Send + Sync>;

const KEEPALIVE_DEADLINE_CAP: Duration = Duration::from_secs(5);
const LAUNCH_TIMEOUT: Duration = Duration::from_secs(20);

pub struct ChromiumTransport {
    cfg: CdpConfig,
    current: Mutex<Option<Arc<Link>>>,
    dial: Dialer,
}

impl ChromiumTransport {
    pub fn new(cfg: CdpConfig) -> Self {
        let dial: Dialer = Arc::new(|cfg: CdpConfig| Box::pin(Link::open(cfg)));
        Self::with_dialer(cfg, dial)
    }

    fn with_dialer(cfg: CdpConfig, dial: Dialer) -> Self {
        Self {
            cfg,
            current: Mutex::new(None),
            dial,
        }
    }

    fn deadline(&self) -> Duration {
        Duration::from_millis(self.cfg.default_deadline_ms)
    }

    async fn link(&self) -> Result<Arc<Link>, AdapterError> {
        let mut slot = self.current.lock().await;
        if let Some(link) = slot.as_ref().filter(|link| link.is_open()) {
            return Ok(Arc::clone(link));
        }
        if slot.is_some() {
            metrics::record_reconnect();
            info!(target: "cdp-transport", "previous link closed; dialing again");
        }
        let fresh = Arc::new((self.dial)(self.cfg.clone()).await?);
        *slot = Some(Arc::clone(&fresh));
        Ok(fresh)
    }
}

#[async_trait]
impl CdpTransport for ChromiumTransport {
    async fn start(&self) -> Result<(), AdapterError> {
        let link = self.link().await?;
        // Target.targetDestroyed only arrives with discovery on.
        link.call(
            CommandTarget::Browser,
            "Target.setDiscoverTargets",
            json!({ "discover": true }),
            self.deadline(),
        )
        .await
        .map(drop)
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        let link = match self.link().await {
            Ok(link) => link,
            Err(err) => {
                warn!(target: "cdp-transport", %err, "no link to read events from");
                return None;
            }
        };
        link.next_event().await
    }

    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        self.link()
            .await?
            .call(target, method, params, self.deadline())
            .await
    }
}

struct Outbound {
    target: CommandTarget,
    method: String,
    params: Value,
    reply: Reply,
}

/// A live connection. Dropping it stops its tasks and kills a launched browser.
struct Link {
    outbound: mpsc::Sender<Outbound>,
    inbound: Mutex<mpsc::Receiver<TransportEvent>>,
    open: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
    browser: Option<Child>,
}

impl Link {
    async fn open(cfg: CdpConfig) -> Result<Self, AdapterError> {
        let (browser, ws_url) = resolve_endpoint(&cfg).await?;
        let conn = Connection::<CdpEventMessage>::connect(&ws_url)
            .await
            .map_err(|err| io_error(err.to_string()).retriable(true))?;
        info!(target: "cdp-transport", url = %ws_url, launched = browser.is_some(), "devtools link open");

        let (outbound, commands) = mpsc::channel(128);
        let (events, inbound) = mpsc::channel(512);
        let open = Arc::new(AtomicBool::new(true));

        let mut tasks = Vec::with_capacity(2);
        let pump_open = Arc::clone(&open);
        tasks.push(tokio::spawn(async move {
            let pump = Pump {
                conn,
                inflight: HashMap::new(),
                events,
            };
            if let Err(err) = pump.run(commands).await {
                warn!(target: "cdp-transport", %err, "pump stopped");
            }
            pump_open.store(false, Ordering::Relaxed);
        }));

        let every = Duration::from_millis(cfg.heartbeat_interval_ms);
        if !every.is_zero() {
            let deadline = Duration::from_millis(cfg.default_deadline_ms).min(KEEPALIVE_DEADLINE_CAP);
            tasks.push(tokio::spawn(keepalive(
                outbound.clone(),
                Arc::clone(&open),
                every,
                deadline,
            )));
        }

        Ok(Self {
            outbound,
            inbound: Mutex::new(inbound),
            open,
            tasks,
            browser,
        })
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }

    async fn call(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, AdapterError> {
        roundtrip(&self.outbound, target, method, params, deadline).await
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        self.inbound.lock().await.recv().await
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.open.store(false, Ordering::Relaxed);
        for task in &self.tasks {
            task.abort();
        }
        let Some(mut browser) = self.browser.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = browser.kill().await {
                        warn!(target: "cdp-transport", %err, "could not kill launched chromium");
                    }
                });
            }
            Err(_) => debug!(target: "cdp-transport", "no runtime left to reap chromium"),
        }
    }
}

async fn roundtrip(
    outbound: &mpsc::Sender<Outbound>,
    target: CommandTarget,
    method: &str,
    params: Value,
    deadline: Duration,
) -> Result<Value, AdapterError> {
    let (reply, answer) = oneshot::channel();
    outbound
        .send(Outbound {
            target,
            method: method.to_string(),
            params,
            reply,
        })
        .await
        .map_err(|_| io_error("link closed before send"))?;

    match tokio::time::timeout(deadline, answer).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(io_error(format!("{method}: link closed before reply"))),
        Err(_) => Err(AdapterError::new(AdapterErrorKind::Timeout)
            .with_hint(format!("{method} exceeded {}ms", deadline.as_millis()))
            .retriable(true)),
    }
}

/// Pings `Browser.getVersion`; the first failed ping marks the link closed.
async fn keepalive(
    outbound: mpsc::Sender<Outbound>,
    open: Arc<AtomicBool>,
    every: Duration,
    deadline: Duration,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if !open.load(Ordering::Relaxed) {
            return;
        }
        let ping = roundtrip(
            &outbound,
            CommandTarget::Browser,
            "Browser.getVersion",
            json!({}),
            deadline,
        )
        .await;
        if let Err(err) = ping {
            warn!(target: "cdp-transport", %err, "keepalive failed");
            open.store(false, Ordering::Relaxed);
            return;
        }
    }
}

struct Pump {
    conn: Connection<CdpEventMessage>,
    inflight: HashMap<CallId, Reply>,
    events: mpsc::Sender<TransportEvent>,
}

impl Pump {
    async fn run(mut self, mut commands: mpsc::Receiver<Outbound>) -> Result<(), AdapterError> {
        loop {
            tokio::select! {
                Some(command) = commands.recv() => self.submit(command)?,
                frame = self.conn.next() => match frame {
                    Some(Ok(Message::Response(response))) => self.settle(response),
                    Some(Ok(Message::Event(event))) => self.forward(event).await,
                    Some(Err(err)) => {
                        let err = classify(err);
                        self.fail_all(&err);
                        return Err(err);
                    }
                    None => {
                        self.fail_all(&io_error("devtools socket closed"));
                        return Ok(());
                    }
                },
            }
        }
    }

    fn submit(&mut self, command: Outbound) -> Result<(), AdapterError> {
        let session = match command.target {
            CommandTarget::Browser => None,
            CommandTarget::Session(id) => Some(CdpSessionId::from(id)),
        };
        let method: MethodId = command.method.into();
        match self.conn.submit_command(method, session, command.params) {
            Ok(call) => {
                self.inflight.insert(call, command.reply);
                Ok(())
            }
            Err(err) => {
                let err = io_error(err.to_string());
                let _ = command.reply.send(Err(err.clone()));
                Err(err)
            }
        }
    }

    fn settle(&mut self, response: Response) {
        if let Some(reply) = self.inflight.remove(&response.id) {
            let _ = reply.send(decode_response(response));
        }
    }

    async fn forward(&mut self, event: CdpEventMessage) {
        let raw: CdpJsonEventMessage = match event.try_into() {
            Ok(raw) => raw,
            Err(err) => {
                debug!(target: "cdp-transport", %err, "undecodable event frame");
                return;
            }
        };
        let event = TransportEvent {
            method: raw.method.into_owned(),
            params: raw.params,
            session_id: raw.session_id,
        };
        if self.events.send(event).await.is_err() {
            debug!(target: "cdp-transport", "event receiver gone");
        }
    }

    fn fail_all(&mut self, err: &AdapterError) {
        for (_, reply) in self.inflight.drain() {
            let _ = reply.send(Err(err.clone()));
        }
    }
}

/// Explicit websocket URL, then a launched browser, then HTTP discovery.
async fn resolve_endpoint(cfg: &CdpConfig) -> Result<(Option<Child>, String), AdapterError> {
    if let Some(url) = &cfg.websocket_url {
        return Ok((None, url.clone()));
    }
    if cfg.launch {
        let mut child = launch_config(cfg)?
            .launch()
            .map_err(|err| internal(format!("chromium did not start: {err}")))?;
        let url = extract_ws_url(&mut child)
            .await
            .map_err(|err| io_error(err.to_string()))?;
        return Ok((Some(child), url));
    }
    let url = discover_ws_url(
        &cfg.http_endpoint,
        Duration::from_millis(cfg.default_deadline_ms),
    )
    .await
    .map_err(|err| {
        io_error(format!("{err:#}"))
            .retriable(true)
            .with_data(json!({
                "endpoint": cfg.http_endpoint,
                "hint": "run chrome with --remote-debugging-port=9222 or set cdp.launch",
            }))
    })?;
    Ok((None, url))
}

fn launch_config(cfg: &CdpConfig) -> Result<BrowserConfig, AdapterError> {
    let has_executable = !cfg.executable.as_os_str().is_empty();
    if has_executable && !cfg.executable.exists() {
        return Err(io_error(format!(
            "no chrome executable at {}",
            cfg.executable.display()
        ))
        .with_data(json!({ "env": "CRM_AUTOREFRESH_CHROME" })));
    }

    let profile = profile_dir(cfg)?;
    let mut builder = BrowserConfig::builder()
        .request_timeout(Duration::from_millis(cfg.default_deadline_ms))
        .launch_timeout(LAUNCH_TIMEOUT)
        .user_data_dir(profile)
        .args(chromium_flags(cfg.headless));
    if !cfg.headless {
        builder = builder.with_head();
    }
    if sandbox_disabled() {
        builder = builder.no_sandbox();
    }
    if has_executable {
        builder = builder.chrome_executable(cfg.executable.clone());
    }
    builder
        .build()
        .map_err(|err| internal(format!("invalid browser config: {err}")))
}

fn profile_dir(cfg: &CdpConfig) -> Result<PathBuf, AdapterError> {
    let dir = if cfg.user_data_dir.is_absolute() {
        cfg.user_data_dir.clone()
    } else {
        std::env::current_dir()
            .map_err(|err| internal(format!("cwd unavailable: {err}")))?
            .join(&cfg.user_data_dir)
    };
    std::fs::create_dir_all(&dir)
        .map_err(|err| internal(format!("cannot create profile {}: {err}", dir.display())))?;
    Ok(dir)
}

fn sandbox_disabled() -> bool {
    std::env::var("CRM_AUTOREFRESH_DISABLE_SANDBOX")
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// Background tabs must keep running timers or the refresh never fires.
fn chromium_flags(headless: bool) -> Vec<&'static str> {
    let mut flags = vec![
        "--disable-background-timer-throttling",
        "--disable-backgrounding-occluded-windows",
        "--disable-renderer-backgrounding",
        "--no-first-run",
        "--no-default-browser-check",
        "--remote-allow-origins=*",
    ];
    if headless {
        flags.push("--headless=new");
    }
    flags
}

fn decode_response(response: Response) -> Result<Value, AdapterError> {
    match (response.result, response.error) {
        (Some(result), _) => Ok(result),
        (None, Some(error)) => Err(io_error(format!("cdp error {}: {}", error.code, error.message))
            .retriable(error.code >= 500)),
        (None, None) => Err(internal("cdp response carried neither result nor error")),
    }
}

fn classify(err: CdpError) -> AdapterError {
    let hint = err.to_string();
    match err {
        CdpError::Timeout => AdapterError::new(AdapterErrorKind::Timeout)
            .with_hint(hint)
            .retriable(true),
        CdpError::Serde(_) => internal(hint),
        _ => io_error(hint).retriable(true),
    }
}

fn io_error(hint: impl Into<String>) -> AdapterError {
    AdapterError::new(AdapterErrorKind::CdpIo).with_hint(hint)
}

fn internal(hint: impl Into<String>) -> AdapterError {
    AdapterError::new(AdapterErrorKind::Internal).with_hint(hint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// A link with no socket behind it. The command receiver is returned so sends do not fail.
    fn detached_link() -> (Link, mpsc::Receiver<Outbound>, mpsc::Sender<TransportEvent>) {
        let (outbound, commands) = mpsc::channel(8);
        let (events, inbound) = mpsc::channel(8);
        let link = Link {
            outbound,
            inbound: Mutex::new(inbound),
            open: Arc::new(AtomicBool::new(true)),
            tasks: Vec::new(),
            browser: None,
        };
        (link, commands, events)
    }

    /// Far ends of detached links, kept alive so their channels stay open.
    #[derive(Default)]
    struct Peers {
        ends: std::sync::Mutex<Vec<(Arc<AtomicBool>, mpsc::Receiver<Outbound>, mpsc::Sender<TransportEvent>)>>,
    }

    impl Peers {
        fn close(&self, index: usize) {
            self.ends.lock().unwrap()[index].0.store(false, Ordering::SeqCst);
        }
    }

    fn counting_dialer(dialed: Arc<AtomicUsize>, peers: Arc<Peers>) -> Dialer {
        Arc::new(move |_cfg: CdpConfig| {
            let dialed = Arc::clone(&dialed);
            let peers = Arc::clone(&peers);
            Box::pin(async move {
                dialed.fetch_add(1, Ordering::SeqCst);
                let (link, commands, events) = detached_link();
                peers
                    .ends
                    .lock()
                    .unwrap()
                    .push((Arc::clone(&link.open), commands, events));
                Ok(link)
            })
        })
    }

    #[tokio::test]
    async fn open_link_is_reused() {
        let dialed = Arc::new(AtomicUsize::new(0));
        let peers = Arc::new(Peers::default());
        let transport = ChromiumTransport::with_dialer(
            CdpConfig::default(),
            counting_dialer(Arc::clone(&dialed), peers),
        );

        let a = transport.link().await.unwrap();
        let b = transport.link().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(dialed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn closed_link_is_redialed() {
        let dialed = Arc::new(AtomicUsize::new(0));
        let peers = Arc::new(Peers::default());
        let transport = ChromiumTransport::with_dialer(
            CdpConfig::default(),
            counting_dialer(Arc::clone(&dialed), Arc::clone(&peers)),
        );

        let before = metrics::snapshot().reconnects;
        let first = transport.link().await.unwrap();
        peers.close(0);
        let second = transport.link().await.unwrap();
        assert_eq!(dialed.load(Ordering::SeqCst), 2);
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(metrics::snapshot().reconnects > before);
    }

    #[tokio::test]
    async fn unanswered_command_times_out() {
        let (link, _commands, _events) = detached_link();
        let err = link
            .call(
                CommandTarget::Browser,
                "Browser.getVersion",
                json!({}),
                Duration::from_millis(20),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::Timeout);
        assert!(err.retriable);
    }

    #[tokio::test]
    async fn command_on_dead_pump_is_io_error() {
        let (link, commands, _events) = detached_link();
        drop(commands);
        let err = link
            .call(CommandTarget::Browser, "Page.enable", json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::CdpIo);
    }

    #[test]
    fn protocol_errors_decode_as_io() {
        let response: Response = serde_json::from_value(json!({
            "id": 7,
            "error": { "code": -32000, "message": "No target with given id found" }
        }))
        .unwrap();
        let err = decode_response(response).unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::CdpIo);
        assert!(!err.retriable);
        assert!(err.hint.unwrap().contains("No target"));

        let empty: Response = serde_json::from_value(json!({ "id": 8 })).unwrap();
        assert_eq!(
            decode_response(empty).unwrap_err().kind,
            AdapterErrorKind::Internal
        );
    }

    #[test]
    fn flags_keep_background_timers_alive() {
        let flags = chromium_flags(false);
        assert!(flags.contains(&"--disable-background-timer-throttling"));
        assert!(!flags.contains(&"--headless=new"));
        assert!(chromium_flags(true).contains(&"--headless=new"));
    }
}
