//! The seam between the routing core and per-session protocol handling.
//!
//! The router only ever sees [`Exchange`] in and [`Reply`] out. Everything in
//! between belongs to a [`Transport`] implementation.

use super::id::SessionId;
use crate::error::{InstallError, TransportError};
use futures::stream::BoxStream;
use hyper::http::StatusCode;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Mutex;

/// HTTP-style verb an exchange arrived with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    /// Client-to-server message (POST).
    Submit,
    /// Standalone server-to-client stream (GET).
    Listen,
    /// Explicit session termination (DELETE).
    Terminate,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verb::Submit => write!(f, "submit"),
            Verb::Listen => write!(f, "listen"),
            Verb::Terminate => write!(f, "terminate"),
        }
    }
}

/// One inbound unit of the protocol.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub verb: Verb,
    /// Raw `mcp-session-id` header value, if any.
    pub session_id: Option<String>,
    /// Parsed JSON body. Only submits carry one.
    pub body: Option<Value>,
}

impl Exchange {
    pub fn submit(session_id: Option<&str>, body: Value) -> Self {
        Self {
            verb: Verb::Submit,
            session_id: session_id.map(str::to_string),
            body: Some(body),
        }
    }

    pub fn listen(session_id: Option<&str>) -> Self {
        Self {
            verb: Verb::Listen,
            session_id: session_id.map(str::to_string),
            body: None,
        }
    }

    pub fn terminate(session_id: Option<&str>) -> Self {
        Self {
            verb: Verb::Terminate,
            session_id: session_id.map(str::to_string),
            body: None,
        }
    }

    /// Session id header, with blank values treated as absent.
    pub fn session_header(&self) -> Option<&str> {
        self.session_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// A single server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Message { id: Option<String>, data: String },
    KeepAlive,
}

impl SseEvent {
    /// Wire encoding per the `text/event-stream` format.
    pub fn encode(&self) -> String {
        match self {
            SseEvent::Message { id, data } => {
                let mut out = String::new();
                if let Some(id) = id {
                    out.push_str("id: ");
                    out.push_str(id);
                    out.push('\n');
                }
                out.push_str("event: message\n");
                for line in data.lines() {
                    out.push_str("data: ");
                    out.push_str(line);
                    out.push('\n');
                }
                out.push('\n');
                out
            }
            SseEvent::KeepAlive => ": keep-alive\n\n".to_string(),
        }
    }
}

pub enum ReplyBody {
    Empty,
    Json(Value),
    EventStream(BoxStream<'static, SseEvent>),
}

impl fmt::Debug for ReplyBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplyBody::Empty => write!(f, "Empty"),
            ReplyBody::Json(v) => f.debug_tuple("Json").field(v).finish(),
            ReplyBody::EventStream(_) => write!(f, "EventStream(..)"),
        }
    }
}

/// Outbound result of forwarding an exchange.
#[derive(Debug)]
pub struct Reply {
    pub status: StatusCode,
    /// Echoed back to the client as `mcp-session-id`.
    pub session_id: Option<SessionId>,
    pub body: ReplyBody,
}

impl Reply {
    pub fn json(status: StatusCode, body: Value) -> Self {
        Self {
            status,
            session_id: None,
            body: ReplyBody::Json(body),
        }
    }

    pub fn empty(status: StatusCode) -> Self {
        Self {
            status,
            session_id: None,
            body: ReplyBody::Empty,
        }
    }

    pub fn stream(stream: BoxStream<'static, SseEvent>) -> Self {
        Self {
            status: StatusCode::OK,
            session_id: None,
            body: ReplyBody::EventStream(stream),
        }
    }

    pub fn with_session(mut self, id: SessionId) -> Self {
        self.session_id = Some(id);
        self
    }

    pub fn json_body(&self) -> Option<&Value> {
        match &self.body {
            ReplyBody::Json(v) => Some(v),
            _ => None,
        }
    }
}

/// Why a transport closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCause {
    /// The client sent a terminate exchange.
    Terminated,
    /// The underlying connection went away. Only transports whose connection
    /// owns the session signal this; `McpTransport` sessions outlive their
    /// HTTP connections and never do.
    Disconnected,
    /// No activity within the idle timeout.
    IdleTimeout,
    /// The process is shutting down.
    Shutdown,
}

impl fmt::Display for CloseCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseCause::Terminated => write!(f, "terminated"),
            CloseCause::Disconnected => write!(f, "disconnected"),
            CloseCause::IdleTimeout => write!(f, "idle_timeout"),
            CloseCause::Shutdown => write!(f, "shutdown"),
        }
    }
}

type CloseFn = Box<dyn FnOnce(CloseCause) + Send>;

/// Callback a transport runs when it closes. Fires at most once.
///
/// Every closure cause funnels through [`CloseHook::fire`]; only the first
/// caller gets to run the callback.
#[derive(Default)]
pub struct CloseHook {
    callback: Mutex<Option<CloseFn>>,
}

impl CloseHook {
    pub fn new(f: impl FnOnce(CloseCause) + Send + 'static) -> Self {
        Self {
            callback: Mutex::new(Some(Box::new(f))),
        }
    }

    /// Run the callback if it has not run yet. Returns whether it ran.
    pub fn fire(&self, cause: CloseCause) -> bool {
        let callback = self
            .callback
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match callback {
            Some(f) => {
                f(cause);
                true
            }
            None => false,
        }
    }

    /// Drop the callback without running it.
    pub fn disarm(&self) {
        self.callback
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }

    pub fn is_armed(&self) -> bool {
        self.callback
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}

impl fmt::Debug for CloseHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloseHook")
            .field("armed", &self.is_armed())
            .finish()
    }
}

/// Per-session protocol endpoint.
pub trait Transport: Send + Sync + 'static {
    fn session_id(&self) -> &SessionId;

    /// Install the closure callback. Replaces any previous hook.
    fn on_close(&self, hook: CloseHook);

    /// Answer one exchange. May suspend for as long as the exchange lives
    /// (a listen stream is returned immediately and then stays open).
    fn handle(&self, exchange: Exchange) -> impl Future<Output = Reply> + Send;

    /// Close the session. Idempotent; the hook fires on the first call only.
    fn close(&self, cause: CloseCause);

    /// Stop the transport without running its closure hook. Used when a
    /// half-built session is abandoned before it was ever registered.
    fn abandon(&self);
}

/// Builds transports for new sessions.
pub trait TransportFactory: Send + Sync + 'static {
    type Transport: Transport;

    fn create(&self, id: SessionId) -> Result<Self::Transport, TransportError>;
}

/// Installs the callable operations and resources of one session.
pub trait CapabilityInstaller<T>: Send + Sync + 'static {
    /// Called exactly once per transport, before its first exchange.
    fn install(&self, transport: &T) -> Result<(), InstallError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn close_hook_runs_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let hook = CloseHook::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        assert!(hook.fire(CloseCause::Terminated));
        assert!(!hook.fire(CloseCause::Disconnected));
        assert!(!hook.fire(CloseCause::IdleTimeout));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!hook.is_armed());
    }

    #[test]
    fn disarmed_hook_never_runs() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let hook = CloseHook::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        hook.disarm();
        assert!(!hook.fire(CloseCause::Terminated));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn blank_session_header_is_absent() {
        assert_eq!(Exchange::listen(Some("  ")).session_header(), None);
        assert_eq!(Exchange::listen(Some("")).session_header(), None);
        assert_eq!(Exchange::listen(Some("abc")).session_header(), Some("abc"));
        assert_eq!(Exchange::listen(None).session_header(), None);
    }

    #[test]
    fn sse_message_encoding_splits_lines() {
        let event = SseEvent::Message {
            id: Some("7".to_string()),
            data: "{\"a\":1}\n{\"b\":2}".to_string(),
        };
        assert_eq!(
            event.encode(),
            "id: 7\nevent: message\ndata: {\"a\":1}\ndata: {\"b\":2}\n\n"
        );
        assert_eq!(SseEvent::KeepAlive.encode(), ": keep-alive\n\n");
    }
}
