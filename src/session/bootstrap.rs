//! Session creation after a successful handshake.

use super::id::{random_ids, SessionId, SessionIdGenerator};
use super::registry::SessionRegistry;
use super::transport::{CapabilityInstaller, CloseCause, CloseHook, Transport, TransportFactory};
use crate::error::GatewayError;
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

/// Builds, wires and registers a new session.
pub struct SessionBootstrap<F: TransportFactory, C> {
    registry: Arc<SessionRegistry<F::Transport>>,
    factory: F,
    installer: C,
    ids: SessionIdGenerator,
}

impl<F, C> SessionBootstrap<F, C>
where
    F: TransportFactory,
    C: CapabilityInstaller<F::Transport>,
{
    pub fn new(registry: Arc<SessionRegistry<F::Transport>>, factory: F, installer: C) -> Self {
        Self {
            registry,
            factory,
            installer,
            ids: random_ids(),
        }
    }

    /// Replace the id source (tests use this to force collisions).
    pub fn with_id_generator(mut self, ids: SessionIdGenerator) -> Self {
        self.ids = ids;
        self
    }

    /// Create a session and make it reachable by id.
    ///
    /// Steps run in the order: mint id, build transport, attach the closure
    /// hook, install capabilities, register. Registration comes last, so a
    /// failure at any earlier point leaves nothing behind in the registry.
    pub fn start_session(&self) -> Result<Arc<F::Transport>, GatewayError> {
        let id = (self.ids)();

        let transport = match self.factory.create(id.clone()) {
            Ok(t) => Arc::new(t),
            Err(e) => {
                error!(session_id = %id, error = %e, "Transport construction failed");
                return Err(GatewayError::InitializationFailed(e.to_string()));
            }
        };

        transport.on_close(deregister_hook(Arc::downgrade(&self.registry), id.clone()));

        if let Err(e) = self.installer.install(&transport) {
            error!(session_id = %id, error = %e, "Capability installation failed");
            transport.abandon();
            return Err(GatewayError::InitializationFailed(e.to_string()));
        }

        // The hook must not fire for a transport that lost a duplicate-id race,
        // or it would evict the session that owns the id.
        if let Err(e) = self.registry.register(id.clone(), transport.clone()) {
            error!(session_id = %id, error = %e, "Refusing to register session");
            transport.abandon();
            return Err(e.into());
        }

        info!(session_id = %id, "Session established");
        Ok(transport)
    }
}

fn deregister_hook<T: Send + Sync + 'static>(
    registry: Weak<SessionRegistry<T>>,
    id: SessionId,
) -> CloseHook {
    CloseHook::new(move |cause| {
        let Some(registry) = registry.upgrade() else {
            return;
        };
        if registry.remove(id.as_str()).is_some() {
            info!(session_id = %id, cause = %cause, "Session closed");
        } else if cause == CloseCause::Shutdown {
            debug!(session_id = %id, "Session closed during shutdown");
        } else {
            warn!(session_id = %id, cause = %cause, "Close fired for unregistered session");
        }
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::{InstallError, TransportError};
    use crate::session::transport::{Exchange, Reply};
    use hyper::http::StatusCode;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Transport double that records what the core did to it.
    #[derive(Debug)]
    pub(crate) struct MockTransport {
        pub id: SessionId,
        pub hook: Mutex<CloseHook>,
        pub installs: AtomicUsize,
        pub handled: AtomicUsize,
        pub closed: AtomicBool,
        pub abandoned: AtomicBool,
    }

    impl Transport for MockTransport {
        fn session_id(&self) -> &SessionId {
            &self.id
        }

        fn on_close(&self, hook: CloseHook) {
            *self.hook.lock().unwrap() = hook;
        }

        async fn handle(&self, exchange: Exchange) -> Reply {
            self.handled.fetch_add(1, Ordering::SeqCst);
            if exchange.verb == crate::session::Verb::Terminate {
                self.close(CloseCause::Terminated);
            }
            Reply::json(StatusCode::OK, json!({ "echo": exchange.body }))
                .with_session(self.id.clone())
        }

        fn close(&self, cause: CloseCause) {
            self.closed.store(true, Ordering::SeqCst);
            self.hook.lock().unwrap().fire(cause);
        }

        fn abandon(&self) {
            self.abandoned.store(true, Ordering::SeqCst);
            self.hook.lock().unwrap().disarm();
        }
    }

    #[derive(Default)]
    pub(crate) struct MockFactory {
        pub fail: bool,
    }

    impl TransportFactory for MockFactory {
        type Transport = MockTransport;

        fn create(&self, id: SessionId) -> Result<MockTransport, TransportError> {
            if self.fail {
                return Err(TransportError::Construction("boom".to_string()));
            }
            Ok(MockTransport {
                id,
                hook: Mutex::new(CloseHook::default()),
                installs: AtomicUsize::new(0),
                handled: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                abandoned: AtomicBool::new(false),
            })
        }
    }

    #[derive(Default)]
    pub(crate) struct MockInstaller {
        pub fail: bool,
    }

    impl CapabilityInstaller<MockTransport> for MockInstaller {
        fn install(&self, transport: &MockTransport) -> Result<(), InstallError> {
            if self.fail {
                return Err(InstallError::Failed("no tools for you".to_string()));
            }
            transport.installs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn bootstrap(
        factory: MockFactory,
        installer: MockInstaller,
    ) -> (
        Arc<SessionRegistry<MockTransport>>,
        SessionBootstrap<MockFactory, MockInstaller>,
    ) {
        let registry = Arc::new(SessionRegistry::new());
        let bootstrap = SessionBootstrap::new(registry.clone(), factory, installer);
        (registry, bootstrap)
    }

    #[test]
    fn start_session_registers_installed_transport() {
        let (registry, bootstrap) = bootstrap(MockFactory::default(), MockInstaller::default());
        let transport = bootstrap.start_session().expect("session should start");

        assert_eq!(transport.installs.load(Ordering::SeqCst), 1);
        let found = registry
            .lookup(transport.session_id().as_str())
            .expect("session should be registered");
        assert!(Arc::ptr_eq(&found, &transport));
    }

    #[test]
    fn close_deregisters_exactly_once() {
        let (registry, bootstrap) = bootstrap(MockFactory::default(), MockInstaller::default());
        let transport = bootstrap.start_session().unwrap();
        let other = bootstrap.start_session().unwrap();

        transport.close(CloseCause::Terminated);
        transport.close(CloseCause::Disconnected);

        assert!(!registry.contains(transport.session_id().as_str()));
        assert!(registry.contains(other.session_id().as_str()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn install_failure_leaves_nothing_registered() {
        let (registry, bootstrap) =
            bootstrap(MockFactory::default(), MockInstaller { fail: true });
        let err = bootstrap.start_session().unwrap_err();
        assert!(matches!(err, GatewayError::InitializationFailed(_)));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(registry.is_empty());
    }

    #[test]
    fn construction_failure_is_initialization_error() {
        let (registry, bootstrap) =
            bootstrap(MockFactory { fail: true }, MockInstaller::default());
        let err = bootstrap.start_session().unwrap_err();
        assert!(matches!(err, GatewayError::InitializationFailed(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn duplicate_id_keeps_existing_session() {
        let (registry, bootstrap) = bootstrap(MockFactory::default(), MockInstaller::default());
        let bootstrap = bootstrap.with_id_generator(Arc::new(|| SessionId::from("fixed")));

        let first = bootstrap.start_session().unwrap();
        let err = bootstrap.start_session().unwrap_err();
        assert!(matches!(err, GatewayError::Registry(_)));

        let found = registry.lookup("fixed").unwrap();
        assert!(Arc::ptr_eq(&found, &first));
        assert!(first.hook.lock().unwrap().is_armed());
    }

    #[test]
    fn hook_outliving_registry_is_harmless() {
        let (registry, bootstrap) = bootstrap(MockFactory::default(), MockInstaller::default());
        let transport = bootstrap.start_session().unwrap();
        drop(bootstrap);
        let _ = registry.drain();
        drop(registry);
        transport.close(CloseCause::IdleTimeout);
        assert!(transport.closed.load(Ordering::SeqCst));
    }
}
