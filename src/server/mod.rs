//! MCP session transport: the per-session protocol endpoint.
//!
//! An [`McpTransport`] answers the JSON-RPC exchanges of one session, owns its
//! listen stream and idle watchdog, and fires its closure hook exactly once
//! however the session ends.

mod capabilities;
mod envelope;
mod requests;
mod stream;

pub use capabilities::{CapabilitySet, DefaultCapabilities, ResourceContents, ResourceTemplateInfo};
pub use envelope::Message;
pub use requests::*;

use crate::config::GatewayConfig;
use crate::error::{ToolError, TransportError, SESSION_CLOSED_CODE};
use crate::session::{
    CloseCause, CloseHook, Exchange, Reply, SessionId, Transport, TransportFactory, Verb,
    INITIALIZE_METHOD,
};
use hyper::http::StatusCode;
use rmcp::model::{ErrorCode, ListToolsResult, ServerInfo};
use rmcp::ErrorData as McpError;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Protocol versions this server speaks, newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

/// Builds one [`McpTransport`] per session.
#[derive(Clone)]
pub struct McpTransportFactory {
    config: Arc<GatewayConfig>,
}

impl McpTransportFactory {
    pub fn new(config: Arc<GatewayConfig>) -> Self {
        Self { config }
    }
}

impl TransportFactory for McpTransportFactory {
    type Transport = McpTransport;

    fn create(&self, id: SessionId) -> Result<McpTransport, TransportError> {
        Ok(McpTransport::new(id, self.config.clone()))
    }
}

/// Mutable protocol state of one session.
struct SessionState {
    protocol_version: Option<String>,
    log_level: LogLevel,
    subscriptions: HashSet<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            protocol_version: None,
            log_level: LogLevel::Info,
            subscriptions: HashSet::new(),
        }
    }
}

/// State shared between the transport and its idle watchdog.
struct Shared {
    id: SessionId,
    hook: Mutex<CloseHook>,
    closed: CancellationToken,
    last_activity: Mutex<Instant>,
    outbound: Mutex<Option<mpsc::Sender<Value>>>,
}

impl Shared {
    fn touch(&self) {
        *self.last_activity.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    fn last_activity(&self) -> Instant {
        *self.last_activity.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn listening(&self) -> bool {
        self.outbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    fn close(&self, cause: CloseCause) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();
        self.outbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let hook = std::mem::take(&mut *self.hook.lock().unwrap_or_else(|e| e.into_inner()));
        hook.fire(cause);
        debug!(session_id = %self.id, cause = %cause, "Transport closed");
    }
}

/// Per-session MCP endpoint.
pub struct McpTransport {
    shared: Arc<Shared>,
    config: Arc<GatewayConfig>,
    capabilities: OnceLock<CapabilitySet>,
    state: Mutex<SessionState>,
    watchdog_started: AtomicBool,
}

impl McpTransport {
    pub fn new(id: SessionId, config: Arc<GatewayConfig>) -> Self {
        Self {
            shared: Arc::new(Shared {
                id,
                hook: Mutex::new(CloseHook::default()),
                closed: CancellationToken::new(),
                last_activity: Mutex::new(Instant::now()),
                outbound: Mutex::new(None),
            }),
            config,
            capabilities: OnceLock::new(),
            state: Mutex::new(SessionState::default()),
            watchdog_started: AtomicBool::new(false),
        }
    }

    /// Install the session's capability set. Later calls are ignored.
    pub fn install_capabilities(&self, set: CapabilitySet) {
        if self.capabilities.set(set).is_err() {
            debug!(session_id = %self.shared.id, "Capabilities already installed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }

    /// Queue a server-initiated message on the listen stream, if one is open.
    /// Returns whether the message was queued.
    pub fn push(&self, message: Value) -> bool {
        let outbound = self.shared.outbound.lock().unwrap_or_else(|e| e.into_inner());
        match outbound.as_ref() {
            Some(tx) => tx.try_send(message).is_ok(),
            None => false,
        }
    }

    fn start_watchdog(&self) {
        let Some(idle) = self.config.idle_timeout else {
            return;
        };
        if self.watchdog_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let shared = Arc::downgrade(&self.shared);
        let closed = self.shared.closed.clone();
        tokio::spawn(idle_watchdog(shared, closed, idle));
    }

    fn submit(&self, body: Value) -> Reply {
        let message = match envelope::classify(&body) {
            Ok(m) => m,
            Err(e) => {
                return Reply::json(StatusCode::BAD_REQUEST, envelope::failure(Value::Null, &e))
            }
        };
        match message {
            Message::Request { id, method, params } => {
                let body = match self.dispatch(&method, params) {
                    Ok(result) => envelope::success(id, result),
                    Err(e) => envelope::failure(id, &e),
                };
                Reply::json(StatusCode::OK, body)
            }
            Message::Notification { method, .. } => {
                self.on_notification(&method);
                Reply::empty(StatusCode::ACCEPTED)
            }
            Message::Response { id } => {
                debug!(session_id = %self.shared.id, ?id, "Ignoring client response");
                Reply::empty(StatusCode::ACCEPTED)
            }
        }
    }

    fn listen(&self) -> Reply {
        let mut outbound = self.shared.outbound.lock().unwrap_or_else(|e| e.into_inner());
        if outbound.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return Reply::json(
                StatusCode::CONFLICT,
                envelope::failure(
                    Value::Null,
                    &McpError::invalid_request("Only one listen stream is allowed per session", None),
                ),
            );
        }
        let (tx, rx) = mpsc::channel(stream::OUTBOUND_CAPACITY);
        *outbound = Some(tx);
        debug!(session_id = %self.shared.id, "Listen stream opened");
        Reply::stream(stream::event_stream(
            rx,
            self.config.sse_keep_alive,
            self.shared.closed.clone(),
        ))
    }

    #[instrument(skip(self, params), fields(session_id = %self.shared.id))]
    fn dispatch(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        match method {
            INITIALIZE_METHOD => self.initialize(params),
            "ping" => Ok(json!({})),
            "tools/list" => {
                let result = ListToolsResult {
                    tools: self.capabilities()?.list_tools(),
                    next_cursor: None,
                    meta: None,
                };
                to_value(&result)
            }
            "tools/call" => {
                let req: CallToolParams = parse_params(params)?;
                let result = self
                    .capabilities()?
                    .call_tool(&req.name, req.arguments)
                    .map_err(|e| e.to_error_data())?;
                self.log(LogLevel::Info, "tools", json!({ "tool": req.name, "status": "ok" }));
                to_value(&result)
            }
            "resources/list" => {
                self.capabilities()?;
                Ok(json!({ "resources": [] }))
            }
            "resources/templates/list" => {
                let templates = self.capabilities()?.list_templates();
                Ok(json!({ "resourceTemplates": templates }))
            }
            "resources/read" => {
                let req: ReadResourceParams = parse_params(params)?;
                let contents = self
                    .capabilities()?
                    .read_resource(&req.uri)
                    .map_err(|e| e.to_error_data())?;
                if self.state().subscriptions.contains(&req.uri) {
                    self.push(envelope::notification(
                        "notifications/resources/updated",
                        json!({ "uri": req.uri }),
                    ));
                }
                Ok(json!({ "contents": contents }))
            }
            "resources/subscribe" => {
                let req: SubscribeParams = parse_params(params)?;
                self.state().subscriptions.insert(req.uri);
                Ok(json!({}))
            }
            "resources/unsubscribe" => {
                let req: SubscribeParams = parse_params(params)?;
                self.state().subscriptions.remove(&req.uri);
                Ok(json!({}))
            }
            "logging/setLevel" => {
                let req: SetLevelParams = parse_params(params)?;
                self.state().log_level = req.level;
                Ok(json!({}))
            }
            other => Err(McpError::new(
                ErrorCode::METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
                None,
            )),
        }
    }

    fn initialize(&self, params: Option<Value>) -> Result<Value, McpError> {
        let req: ClientInitializeParams = parse_params(params)?;
        let version = negotiate_version(&req.protocol_version);
        {
            let mut state = self.state();
            if state.protocol_version.is_some() {
                return Err(McpError::invalid_request("Session already initialized", None));
            }
            state.protocol_version = Some(version.to_string());
        }
        info!(
            session_id = %self.shared.id,
            requested = %req.protocol_version,
            negotiated = %version,
            "Initialize"
        );

        let info = ServerInfo {
            capabilities: self.capabilities()?.server_capabilities(),
            instructions: Some(self.instructions()),
            ..Default::default()
        };
        let mut value = to_value(&info)?;
        // The negotiated version and our own identity replace rmcp's defaults.
        if let Value::Object(map) = &mut value {
            map.insert("protocolVersion".to_string(), json!(version));
            map.insert(
                "serverInfo".to_string(),
                json!({
                    "name": self.config.server_name,
                    "version": self.config.server_version,
                }),
            );
        }
        Ok(value)
    }

    fn instructions(&self) -> String {
        "Session-scoped MCP server.\n\n\
         Tools:\n\
         - add: Add two numbers (a, b)\n\n\
         Resources:\n\
         - greeting://{name}: Dynamic greeting generator\n\n\
         Open GET on the endpoint to receive log and resource notifications."
            .to_string()
    }

    fn on_notification(&self, method: &str) {
        match method {
            "notifications/initialized" => {
                debug!(session_id = %self.shared.id, "Client initialized");
            }
            "notifications/cancelled" => {}
            other => debug!(session_id = %self.shared.id, method = %other, "Ignoring notification"),
        }
    }

    fn log(&self, level: LogLevel, logger: &str, data: Value) {
        if level < self.state().log_level {
            return;
        }
        self.push(envelope::notification(
            "notifications/message",
            json!({ "level": level, "logger": logger, "data": data }),
        ));
    }

    fn capabilities(&self) -> Result<&CapabilitySet, McpError> {
        self.capabilities
            .get()
            .ok_or_else(|| ToolError::NotInstalled.to_error_data())
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Transport for McpTransport {
    fn session_id(&self) -> &SessionId {
        &self.shared.id
    }

    fn on_close(&self, hook: CloseHook) {
        *self.shared.hook.lock().unwrap_or_else(|e| e.into_inner()) = hook;
    }

    async fn handle(&self, exchange: Exchange) -> Reply {
        if self.is_closed() {
            let error = McpError::new(ErrorCode(SESSION_CLOSED_CODE), "Session closed", None);
            return Reply::json(StatusCode::NOT_FOUND, envelope::failure(Value::Null, &error));
        }
        self.shared.touch();
        self.start_watchdog();

        let reply = match exchange.verb {
            Verb::Submit => self.submit(exchange.body.unwrap_or(Value::Null)),
            Verb::Listen => self.listen(),
            Verb::Terminate => {
                self.close(CloseCause::Terminated);
                Reply::empty(StatusCode::OK)
            }
        };
        reply.with_session(self.shared.id.clone())
    }

    fn close(&self, cause: CloseCause) {
        self.shared.close(cause);
    }

    fn abandon(&self) {
        self.shared
            .hook
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .disarm();
        self.shared.closed.cancel();
    }
}

impl Drop for McpTransport {
    fn drop(&mut self) {
        // Stops the watchdog and any listen stream still held by a client.
        self.shared.closed.cancel();
    }
}

/// Close the session once it has seen no exchange for `idle`. An open listen
/// stream counts as activity.
async fn idle_watchdog(shared: Weak<Shared>, closed: CancellationToken, idle: Duration) {
    loop {
        let deadline = match shared.upgrade() {
            Some(s) => s.last_activity() + idle,
            None => return,
        };
        tokio::select! {
            _ = closed.cancelled() => return,
            _ = tokio::time::sleep_until(deadline) => {}
        }
        let Some(shared) = shared.upgrade() else {
            return;
        };
        if shared.listening() {
            shared.touch();
            continue;
        }
        if shared.last_activity().elapsed() >= idle {
            warn!(session_id = %shared.id, idle_secs = idle.as_secs(), "Session idle, closing");
            shared.close(CloseCause::IdleTimeout);
            return;
        }
    }
}

/// Pick the protocol version to answer with.
pub fn negotiate_version(requested: &str) -> &'static str {
    SUPPORTED_PROTOCOL_VERSIONS
        .iter()
        .copied()
        .find(|v| *v == requested)
        .unwrap_or(SUPPORTED_PROTOCOL_VERSIONS[0])
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, McpError> {
    serde_json::from_value(params.unwrap_or(Value::Null))
        .map_err(|e| McpError::invalid_params(format!("Invalid params: {e}"), None))
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, McpError> {
    serde_json::to_value(value).map_err(|e| McpError::internal_error(e.to_string(), None))
}
