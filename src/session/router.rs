//! Verb and session-id dispatch for every inbound exchange.

use super::bootstrap::SessionBootstrap;
use super::handshake::is_initialize_request;
use super::registry::SessionRegistry;
use super::transport::{
    CapabilityInstaller, CloseCause, Exchange, Reply, Transport, TransportFactory, Verb,
};
use crate::error::{ErrorKind, GatewayError};
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

/// Entry point for all exchanges on the gateway endpoint.
///
/// | session header        | verb              | initialize body | action               |
/// |-----------------------|-------------------|-----------------|----------------------|
/// | present, registered   | any               | -               | forward              |
/// | present, unregistered | any               | -               | 400 unknown session  |
/// | absent                | submit            | yes             | bootstrap + forward  |
/// | absent                | submit            | no              | 400 no valid session |
/// | absent                | listen/terminate  | -               | 400 missing id       |
pub struct Router<F: TransportFactory, C> {
    registry: Arc<SessionRegistry<F::Transport>>,
    bootstrap: SessionBootstrap<F, C>,
}

impl<F, C> Router<F, C>
where
    F: TransportFactory,
    C: CapabilityInstaller<F::Transport>,
{
    /// Build a router with its own, empty registry.
    pub fn new(factory: F, installer: C) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let bootstrap = SessionBootstrap::new(registry.clone(), factory, installer);
        Self::from_parts(registry, bootstrap)
    }

    /// Build a router around an existing registry and bootstrap. Both must
    /// share the same registry.
    pub fn from_parts(
        registry: Arc<SessionRegistry<F::Transport>>,
        bootstrap: SessionBootstrap<F, C>,
    ) -> Self {
        Self {
            registry,
            bootstrap,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry<F::Transport>> {
        &self.registry
    }

    /// Route an exchange and always produce a reply.
    pub async fn dispatch(&self, exchange: Exchange) -> Reply {
        match self.route(exchange).await {
            Ok(reply) => reply,
            Err(e) => {
                match e.kind() {
                    ErrorKind::Routing => debug!(error = %e, "Rejected exchange"),
                    ErrorKind::Initialization => warn!(error = %e, "Session bootstrap failed"),
                    ErrorKind::InternalInvariant => error!(error = %e, "Routing invariant violated"),
                }
                e.into_reply()
            }
        }
    }

    /// Route an exchange to its transport, creating the session first when
    /// the exchange is a valid handshake.
    #[instrument(skip_all, fields(verb = %exchange.verb))]
    pub async fn route(&self, exchange: Exchange) -> Result<Reply, GatewayError> {
        let transport = self.resolve(&exchange)?;
        debug!(session_id = %transport.session_id(), "Forwarding exchange");
        // No registry lock is held here; the transport may take as long as it needs.
        Ok(transport.handle(exchange).await)
    }

    fn resolve(&self, exchange: &Exchange) -> Result<Arc<F::Transport>, GatewayError> {
        match (exchange.session_header(), exchange.verb) {
            (Some(id), verb) => {
                self.registry
                    .lookup(id)
                    .ok_or_else(|| GatewayError::UnknownSession {
                        id: id.to_string(),
                        verb,
                    })
            }
            (None, Verb::Submit) => {
                if exchange.body.as_ref().is_some_and(is_initialize_request) {
                    debug!("Creating new session for initialize request");
                    self.bootstrap.start_session()
                } else {
                    Err(GatewayError::NoValidSession)
                }
            }
            (None, verb) => Err(GatewayError::MissingSessionId { verb }),
        }
    }

    /// Close every live session. Called once on process shutdown.
    pub fn shutdown(&self) {
        let transports = self.registry.drain();
        debug!(count = transports.len(), "Closing live sessions");
        for transport in transports {
            transport.close(CloseCause::Shutdown);
        }
    }
}
