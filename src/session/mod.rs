//! Session lifecycle and request routing.
//!
//! Every HTTP exchange on the gateway endpoint lands in the [`Router`], which
//! decides from the verb and the `mcp-session-id` header whether to forward it
//! to a live transport, open a new session, or reject it.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                     Gateway Process                        │
//! │                                                            │
//! │  POST/GET/DELETE ──▶ Router                                │
//! │                      ├─ header present ─▶ registry lookup  │
//! │                      ├─ initialize     ─▶ SessionBootstrap │
//! │                      └─ otherwise      ─▶ 400              │
//! │                                                            │
//! │                      SessionRegistry                       │
//! │                      └─ Mutex<HashMap<SessionId, Arc<T>>>  │
//! └───────────────────────────────────────────────────────────┘
//!                               │ forward (no lock held)
//!         ┌─────────────────────┼─────────────────────┐
//!         ▼                     ▼                     ▼
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ Transport A  │     │ Transport B  │     │ Transport N  │
//! │ close hook ──┼──▶ registry.remove(id) (at most once)    │
//! └──────────────┘     └──────────────┘     └──────────────┘
//! ```

mod bootstrap;
mod handshake;
mod id;
mod registry;
mod router;
mod transport;

pub use bootstrap::SessionBootstrap;
pub use handshake::{is_initialize_request, INITIALIZE_METHOD};
pub use id::{random_ids, SessionId, SessionIdGenerator};
pub use registry::SessionRegistry;
pub use router::Router;
pub use transport::{
    CapabilityInstaller, CloseCause, CloseHook, Exchange, Reply, ReplyBody, SseEvent, Transport,
    TransportFactory, Verb,
};
