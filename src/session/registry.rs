//! Live session table.

use super::id::SessionId;
use crate::error::RegistryError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// In-memory map from session id to its live transport.
///
/// A single mutex guards every read and write. Callers get a cloned `Arc` back
/// from [`lookup`](Self::lookup) and must never hold the lock while talking to
/// the transport.
pub struct SessionRegistry<T> {
    sessions: Mutex<HashMap<SessionId, Arc<T>>>,
}

impl<T> Default for SessionRegistry<T> {
    fn default() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> SessionRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session. An id that is already present is rejected and the
    /// existing entry is left untouched.
    pub fn register(&self, id: SessionId, transport: Arc<T>) -> Result<(), RegistryError> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if sessions.contains_key(&id) {
            return Err(RegistryError::DuplicateSession(id));
        }
        debug!(session_id = %id, live = sessions.len() + 1, "Registered session");
        sessions.insert(id, transport);
        Ok(())
    }

    pub fn lookup(&self, id: &str) -> Option<Arc<T>> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.get(id).cloned()
    }

    /// Remove a session. Removing an absent id is a no-op returning `None`.
    pub fn remove(&self, id: &str) -> Option<Arc<T>> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let removed = sessions.remove(id);
        if removed.is_some() {
            debug!(session_id = %id, live = sessions.len(), "Removed session");
        }
        removed
    }

    pub fn contains(&self, id: &str) -> bool {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take every live transport out of the table (process shutdown only).
    pub fn drain(&self) -> Vec<Arc<T>> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.drain().map(|(_, t)| t).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_lookup_remove() {
        let registry = SessionRegistry::new();
        let id = SessionId::from("s1");
        registry
            .register(id.clone(), Arc::new(7u32))
            .expect("first register should succeed");

        assert_eq!(registry.lookup("s1").as_deref(), Some(&7));
        assert!(registry.contains("s1"));
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.remove("s1").as_deref(), Some(&7));
        assert!(registry.lookup("s1").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn duplicate_register_keeps_original() {
        let registry = SessionRegistry::new();
        let id = SessionId::from("dup");
        registry.register(id.clone(), Arc::new(1u32)).unwrap();

        let err = registry.register(id.clone(), Arc::new(2u32));
        assert_eq!(err, Err(RegistryError::DuplicateSession(id)));
        assert_eq!(registry.lookup("dup").as_deref(), Some(&1));
    }

    #[test]
    fn remove_is_idempotent() {
        let registry: SessionRegistry<u32> = SessionRegistry::new();
        assert!(registry.remove("missing").is_none());

        registry.register(SessionId::from("a"), Arc::new(1)).unwrap();
        assert!(registry.remove("a").is_some());
        assert!(registry.remove("a").is_none());
    }

    #[test]
    fn concurrent_registers_are_not_lost() {
        let registry = Arc::new(SessionRegistry::new());
        let handles: Vec<_> = (0..16)
            .map(|t| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for i in 0..64u32 {
                        registry
                            .register(SessionId::random(), Arc::new(t * 64 + i))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(registry.len(), 16 * 64);
        assert_eq!(registry.drain().len(), 16 * 64);
        assert!(registry.is_empty());
    }
}
