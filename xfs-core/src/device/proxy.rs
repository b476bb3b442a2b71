//! `DeviceProxy`: the correlation engine for one device identity.
//!
//! A proxy owns a [`TransportGate`] and one dispatcher task. Callers issue
//! requests from any task; the dispatcher reads every inbound frame in
//! arrival order, matches it to the pending table by `msgid` and drives
//! the request's lifecycle:
//!
//! ```text
//!   issue_command ──► Issued ──(ack)──► Accepted ──► ExecuteComplete
//!                        │                  │          + broadcast
//!                        └──(failure)───────┴────────►
//! ```
//!
//! Only `get_info` and `sync_cancel` suspend the caller, and only the
//! calling task.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::class::DeviceClass;
use super::dispatch::{self, ExecuteStep, GetInfoStep};
use crate::config::{DEFAULT_EVENT_CAPACITY, ProxyConfig};
use crate::context::XfsContext;
use crate::error::XfsError;
use crate::events::{DeviceEvent, EventHandler, EventSink, NoopHandler};
use crate::frame::{Frame, new_request_id};
use crate::message::EventClass;
use crate::network::gate::{Connector, DEFAULT_WRITE_QUEUE_DEPTH, LinkEvent, TransportGate};
use crate::network::SocketConnector;
use crate::state::{AcceptedCommand, PendingTable, RequestKind, lock};

// ── Builder ──────────────────────────────────────────────────────

pub struct DeviceProxyBuilder {
    identity: String,
    class: String,
    connector: Box<dyn Connector>,
    context: Option<Arc<XfsContext>>,
    handler: Arc<dyn EventHandler>,
    get_info_timeout: Option<Duration>,
    write_queue_depth: usize,
    event_capacity: usize,
}

impl DeviceProxyBuilder {
    /// Share queues, cache and registry with other proxies.
    pub fn context(mut self, context: Arc<XfsContext>) -> Self {
        self.context = Some(context);
        self
    }

    /// Hooks for service, user and system events.
    pub fn handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// Bound on blocking info queries; `None` waits forever.
    pub fn get_info_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.get_info_timeout = timeout;
        self
    }

    pub fn write_queue_depth(mut self, depth: usize) -> Self {
        self.write_queue_depth = depth;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Validate, register and start the dispatcher.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<DeviceProxy, XfsError> {
        let identity = self.identity.trim().to_string();
        if identity.is_empty() {
            return Err(XfsError::EmptyIdentity);
        }
        let class = DeviceClass::new(&self.class)?;
        let context = self.context.unwrap_or_else(XfsContext::new);

        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let gate =
            TransportGate::new(self.connector, link_tx).with_write_queue_depth(self.write_queue_depth);
        let (events, _) = broadcast::channel(self.event_capacity.max(1));
        let instance = context.registry().register(&identity, events.clone());

        let inner = Arc::new(Inner {
            identity,
            class,
            instance,
            context,
            gate,
            pending: Mutex::new(PendingTable::new()),
            events,
            handler: self.handler,
            get_info_timeout: self.get_info_timeout,
            poisoned: AtomicBool::new(false),
        });

        info!(
            device = %inner.identity,
            class = %inner.class,
            endpoint = %inner.gate.endpoint(),
            instance,
            "device proxy ready"
        );

        let dispatcher = tokio::spawn(dispatch_loop(Arc::clone(&inner), link_rx));
        Ok(DeviceProxy { inner, dispatcher })
    }
}

// ── DeviceProxy ──────────────────────────────────────────────────

pub struct DeviceProxy {
    inner: Arc<Inner>,
    dispatcher: JoinHandle<()>,
}

impl DeviceProxy {
    pub fn builder(
        identity: impl Into<String>,
        class: impl Into<String>,
        connector: Box<dyn Connector>,
    ) -> DeviceProxyBuilder {
        DeviceProxyBuilder {
            identity: identity.into(),
            class: class.into(),
            connector,
            context: None,
            handler: Arc::new(NoopHandler),
            get_info_timeout: None,
            write_queue_depth: DEFAULT_WRITE_QUEUE_DEPTH,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Build a socket-backed proxy from its config section.
    pub fn from_config(config: &ProxyConfig, context: Arc<XfsContext>) -> Result<Self, XfsError> {
        let connector =
            SocketConnector::new(config.endpoint()?).with_connect_timeout(config.connect_timeout());
        Self::builder(&config.device_id, &config.device_class, Box::new(connector))
            .context(context)
            .get_info_timeout(config.get_info_timeout())
            .write_queue_depth(config.write_queue_depth)
            .event_capacity(config.event_capacity)
            .build()
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn identity(&self) -> &str {
        &self.inner.identity
    }

    pub fn class(&self) -> &DeviceClass {
        &self.inner.class
    }

    /// Registry instance number of this proxy.
    pub fn instance(&self) -> u64 {
        self.inner.instance
    }

    pub fn context(&self) -> &Arc<XfsContext> {
        &self.inner.context
    }

    pub fn endpoint(&self) -> String {
        self.inner.gate.endpoint()
    }

    /// Receive every event this proxy emits from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.inner.events.subscribe()
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.inner.pending).pending_count()
    }

    pub fn is_pending(&self, request_id: &str) -> bool {
        lock(&self.inner.pending).is_request_pending(request_id)
    }

    /// Set after a protocol violation; the proxy refuses further requests.
    pub fn is_poisoned(&self) -> bool {
        self.inner.poisoned.load(Ordering::Acquire)
    }

    pub fn is_connected(&self) -> bool {
        self.inner.gate.is_connected()
    }

    /// Connect now instead of on the first request.
    pub async fn connect(&self) -> bool {
        self.inner.link().await.is_some()
    }

    /// Oldest command the device has accepted and not finished, for any
    /// proxy sharing this identity.
    pub fn current_command(&self) -> Option<AcceptedCommand> {
        self.inner.context.queues().current(&self.inner.identity)
    }

    // ── Requests ─────────────────────────────────────────────────

    /// Send `WFSExecute` and return its request id without waiting.
    ///
    /// `None` when the device server cannot be reached.
    pub async fn issue_command(&self, command_code: &str, payload: Value) -> Option<String> {
        let inner = &self.inner;
        let link = inner.link().await?;
        let id = new_request_id();
        let frame = Frame::execute(&id, command_code, payload.clone());

        lock(&inner.pending).track(
            &id,
            RequestKind::Execute {
                command_code: command_code.to_string(),
                payload,
            },
            link,
        );
        debug!(device = %inner.identity, request = %id, command = command_code, "execute issued");

        inner.write(&id, frame).await.then_some(id)
    }

    /// Send `WFSGetInfo` and wait for its terminal reply.
    ///
    /// Returns an empty frame when the request could not be sent or the
    /// configured timeout expired.
    pub async fn get_info(&self, category: &str, query: Value) -> Frame {
        let inner = &self.inner;
        let Some(link) = inner.link().await else {
            return Frame::new();
        };
        let id = new_request_id();
        let (tx, rx) = oneshot::channel();

        lock(&inner.pending).track_with_waiter(
            &id,
            RequestKind::GetInfo {
                category: category.to_string(),
            },
            link,
            tx,
        );
        if !inner.write(&id, Frame::get_info(&id, category, query)).await {
            return Frame::new();
        }

        let reply = match inner.get_info_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    lock(&inner.pending).remove(&id);
                    warn!(
                        device = %inner.identity,
                        category,
                        "info query timed out after {limit:?}"
                    );
                    return Frame::new();
                }
            },
            None => rx.await,
        };
        reply.unwrap_or_default()
    }

    /// Send `WFSCancel` for `target`, or for the device's current command
    /// when `target` is `None`. Returns the cancel's own request id.
    pub async fn cancel(&self, target: Option<&str>) -> Option<String> {
        let inner = &self.inner;
        let link = inner.link().await?;
        let id = new_request_id();
        let target = target.filter(|t| !t.is_empty()).map(str::to_string);
        let frame = Frame::cancel(&id, target.as_deref());

        lock(&inner.pending).track(&id, RequestKind::Cancel { target }, link);
        inner.write(&id, frame).await.then_some(id)
    }

    /// Cancel and wait until both the cancel and its target have finished,
    /// in whichever order they arrive.
    ///
    /// A target that is not pending here counts as already finished.
    /// Returns `false` only when the cancel could not be sent.
    pub async fn sync_cancel(&self, target: Option<&str>) -> bool {
        let inner = &self.inner;
        let Some(link) = inner.link().await else {
            return false;
        };
        let id = new_request_id();
        let target = target.filter(|t| !t.is_empty()).map(str::to_string);
        let frame = Frame::cancel(&id, target.as_deref());
        let (cancel_tx, cancel_rx) = oneshot::channel();

        // Both waiters go in before the write so neither signal can slip by.
        let target_rx = {
            let mut pending = lock(&inner.pending);
            pending.track_with_waiter(
                &id,
                RequestKind::Cancel {
                    target: target.clone(),
                },
                link,
                cancel_tx,
            );
            target.as_deref().and_then(|t| {
                let (tx, rx) = oneshot::channel();
                pending.add_waiter(t, tx).then_some(rx)
            })
        };

        if !inner.write(&id, frame).await {
            return false;
        }

        let target_done = async {
            if let Some(rx) = target_rx {
                let _ = rx.await;
            }
        };
        let _ = tokio::join!(cancel_rx, target_done);
        debug!(device = %inner.identity, request = %id, "sync cancel finished");
        true
    }

    // ── Capabilities & status ────────────────────────────────────

    /// Cached capabilities for this identity, fetched on first use.
    pub async fn capabilities(&self) -> Map<String, Value> {
        if let Some(caps) = self.inner.context.capabilities().get(&self.inner.identity) {
            return caps;
        }
        self.refresh_capabilities().await
    }

    /// Query `WFS_INF_<CLASS>_CAPABILITIES` and replace the cached entry.
    pub async fn refresh_capabilities(&self) -> Map<String, Value> {
        let inner = &self.inner;
        let reply = self
            .get_info(&inner.class.capabilities_category(), Value::Null)
            .await;
        if reply.is_success() {
            if let Some(Value::Object(caps)) = reply.buffer() {
                inner.context.capabilities().store(&inner.identity, caps.clone());
            }
        }
        inner
            .context
            .capabilities()
            .get(&inner.identity)
            .unwrap_or_default()
    }

    /// Live `WFS_INF_<CLASS>_STATUS`; never cached.
    pub async fn status(&self) -> Map<String, Value> {
        self.get_info(&self.inner.class.status_category(), Value::Null)
            .await
            .buffer_map()
    }
}

impl Drop for DeviceProxy {
    fn drop(&mut self) {
        self.dispatcher.abort();
        let inner = &self.inner;
        inner.context.registry().deregister(inner.instance);
        inner
            .context
            .queues()
            .drain_owner(&inner.identity, inner.instance);
    }
}

impl std::fmt::Debug for DeviceProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceProxy")
            .field("identity", &self.inner.identity)
            .field("class", &self.inner.class)
            .field("instance", &self.inner.instance)
            .finish()
    }
}

// ── Inner ────────────────────────────────────────────────────────

struct Inner {
    identity: String,
    class: DeviceClass,
    instance: u64,
    context: Arc<XfsContext>,
    gate: TransportGate,
    pending: Mutex<PendingTable>,
    events: EventSink,
    handler: Arc<dyn EventHandler>,
    get_info_timeout: Option<Duration>,
    poisoned: AtomicBool,
}

impl Inner {
    /// Ensure a link, returning its generation.
    async fn link(&self) -> Option<u64> {
        if self.poisoned.load(Ordering::Acquire) {
            debug!(device = %self.identity, "proxy is poisoned; request refused");
            return None;
        }
        match self.gate.ensure_connected().await {
            Ok(generation) => Some(generation),
            Err(e) => {
                self.report_unreachable(&e);
                None
            }
        }
    }

    /// Write a tracked request; a failed write untracks it.
    async fn write(&self, request_id: &str, frame: Frame) -> bool {
        match self.gate.send(frame).await {
            Ok(()) => true,
            Err(e) => {
                lock(&self.pending).remove(request_id);
                self.report_unreachable(&e);
                false
            }
        }
    }

    fn report_unreachable(&self, e: &XfsError) {
        if self.context.warn_once(&self.identity) {
            warn!(
                device = %self.identity,
                endpoint = %self.gate.endpoint(),
                "cannot reach device server: {e}"
            );
        } else {
            debug!(device = %self.identity, "device server unreachable: {e}");
        }
    }

    fn emit(&self, event: DeviceEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    // ── Inbound routing ──────────────────────────────────────────

    fn handle_frame(&self, frame: &Frame) -> Result<(), XfsError> {
        if let Some(class) = dispatch::classify(frame) {
            self.route_unsolicited(class, frame);
            return Ok(());
        }

        let Some(id) = frame.msgid() else {
            debug!(device = %self.identity, ?frame, "frame without msgid discarded");
            return Ok(());
        };
        let kind = lock(&self.pending).get(id).map(|req| req.kind.clone());
        let Some(kind) = kind else {
            debug!(device = %self.identity, request = id, "no pending request; frame discarded");
            return Ok(());
        };

        match kind {
            RequestKind::Execute {
                command_code,
                payload,
            } => self.on_execute(id, &command_code, payload, frame),
            RequestKind::GetInfo { category } => {
                self.on_get_info(id, &category, frame);
                Ok(())
            }
            RequestKind::Cancel { .. } => {
                self.on_cancel(id, frame);
                Ok(())
            }
        }
    }

    fn on_execute(
        &self,
        id: &str,
        command_code: &str,
        payload: Value,
        frame: &Frame,
    ) -> Result<(), XfsError> {
        match dispatch::execute_step(frame) {
            ExecuteStep::Complete => {
                dispatch::check_command_code(id, command_code, frame)?;
                let resolved = lock(&self.pending).resolve(id, frame);
                self.context.queues().finish(&self.identity, id);
                let Some(resolved) = resolved else {
                    return Ok(());
                };
                debug!(
                    device = %self.identity,
                    request = id,
                    command = command_code,
                    state = ?resolved.state,
                    elapsed_ms = resolved.elapsed.as_millis() as u64,
                    "execute complete"
                );
                self.emit(DeviceEvent::ExecuteComplete(frame.clone()));
                self.context
                    .registry()
                    .broadcast(&self.identity, frame, command_code, &payload);
            }
            ExecuteStep::Event => {
                self.emit(DeviceEvent::ExecuteEvent(frame.clone()));
            }
            ExecuteStep::Accepted => {
                dispatch::check_command_code(id, command_code, frame)?;
                let first = lock(&self.pending).mark_accepted(id);
                if first {
                    self.context.queues().append(
                        &self.identity,
                        AcceptedCommand {
                            request_id: id.to_string(),
                            command_code: command_code.to_string(),
                            payload,
                            owner: self.instance,
                        },
                    );
                    debug!(device = %self.identity, request = id, "execute accepted");
                }
            }
            ExecuteStep::Ignored => {
                debug!(device = %self.identity, request = id, ?frame, "unexpected marker ignored");
            }
        }
        Ok(())
    }

    fn on_get_info(&self, id: &str, category: &str, frame: &Frame) {
        if dispatch::get_info_step(frame) == GetInfoStep::Waiting {
            return;
        }
        if !frame.is_success() {
            warn!(
                device = %self.identity,
                category,
                result = frame.h_result().unwrap_or("<none>"),
                "info query failed"
            );
        }
        lock(&self.pending).resolve(id, frame);
    }

    fn on_cancel(&self, id: &str, frame: &Frame) {
        if lock(&self.pending).resolve(id, frame).is_some() {
            self.emit(DeviceEvent::CancelComplete(frame.clone()));
        }
    }

    fn route_unsolicited(&self, class: EventClass, frame: &Frame) {
        match class {
            EventClass::Service => {
                self.handler.service_event(frame);
                self.emit(DeviceEvent::ServiceEvent(frame.clone()));
            }
            EventClass::User => {
                self.handler.user_event(frame);
                self.emit(DeviceEvent::UserEvent(frame.clone()));
            }
            EventClass::System => {
                let current = self.context.queues().current(&self.identity);
                self.handler.system_event(frame, current.as_ref());
                let (command_code, payload) = current
                    .map(|c| (c.command_code, c.payload))
                    .unwrap_or_default();
                self.emit(DeviceEvent::SystemEvent {
                    message: frame.clone(),
                    command_code,
                    payload,
                });
            }
        }
    }

    /// Complete every request written on link `generation` or earlier with
    /// `WFS_ERR_CONNECTION_LOST`.
    fn connection_lost(&self, generation: u64) {
        let lost = lock(&self.pending).snapshot_through(generation);
        if !lost.is_empty() {
            info!(
                device = %self.identity,
                generation,
                count = lost.len(),
                "connection lost; completing pending requests"
            );
        }
        for (id, command_code) in lost {
            let frame = Frame::connection_lost(&id, &command_code);
            if let Err(e) = self.handle_frame(&frame) {
                warn!(device = %self.identity, request = %id, "{e}");
            }
        }
        self.emit(DeviceEvent::Disconnected);
    }
}

/// Per-proxy dispatcher: consumes link events until the proxy is dropped
/// or a protocol violation ends the session.
async fn dispatch_loop(inner: Arc<Inner>, mut link_rx: mpsc::UnboundedReceiver<LinkEvent>) {
    while let Some(event) = link_rx.recv().await {
        match event {
            LinkEvent::Frame(frame) => {
                if let Err(e) = inner.handle_frame(&frame) {
                    error!(device = %inner.identity, "{e}; closing session");
                    inner.poisoned.store(true, Ordering::Release);
                    inner.gate.close();
                    inner.connection_lost(u64::MAX);
                    break;
                }
            }
            LinkEvent::Disconnected { generation } => inner.connection_lost(generation),
        }
    }
    debug!(device = %inner.identity, "dispatcher stopped");
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::QueuedConnector;

    #[tokio::test]
    async fn build_validates_identity_and_class() {
        let empty = DeviceProxy::builder("  ", "CDM", Box::new(QueuedConnector::new())).build();
        assert!(matches!(empty, Err(XfsError::EmptyIdentity)));

        let bad = DeviceProxy::builder("CDM30", "CD", Box::new(QueuedConnector::new())).build();
        assert!(matches!(bad, Err(XfsError::InvalidDeviceClass(_))));
    }

    #[tokio::test]
    async fn registers_and_deregisters() {
        let ctx = XfsContext::new();
        let proxy = DeviceProxy::builder("CDM30", "cdm", Box::new(QueuedConnector::new()))
            .context(Arc::clone(&ctx))
            .build()
            .unwrap();
        assert_eq!(proxy.class().as_str(), "CDM");
        assert_eq!(ctx.registry().members("CDM30"), vec![proxy.instance()]);

        drop(proxy);
        assert!(ctx.registry().is_empty());
    }

    #[tokio::test]
    async fn unreachable_server_yields_empty_results() {
        let proxy = DeviceProxy::builder("PIN01", "PIN", Box::new(QueuedConnector::new()))
            .build()
            .unwrap();

        assert!(!proxy.connect().await);
        assert_eq!(proxy.issue_command("WFS_CMD_PIN_GET_DATA", Value::Null).await, None);
        assert!(proxy.get_info("WFS_INF_PIN_STATUS", Value::Null).await.is_empty());
        assert_eq!(proxy.cancel(None).await, None);
        assert!(!proxy.sync_cancel(Some("{x}")).await);
        assert!(proxy.status().await.is_empty());
        assert_eq!(proxy.pending_count(), 0);
        assert!(!proxy.context().warn_once("PIN01"));
    }

    #[tokio::test]
    async fn from_config_parses_the_address() {
        let cfg = ProxyConfig {
            address: "ssl://atm-host:4443".into(),
            ..ProxyConfig::default()
        };
        let proxy = DeviceProxy::from_config(&cfg, XfsContext::new()).unwrap();
        assert_eq!(proxy.endpoint(), "ssl://atm-host:4443");
        assert!(!proxy.is_connected());

        let cfg = ProxyConfig {
            address: "ftp://atm-host:21".into(),
            ..ProxyConfig::default()
        };
        assert!(matches!(
            DeviceProxy::from_config(&cfg, XfsContext::new()),
            Err(XfsError::InvalidEndpoint { .. })
        ));
    }
}
