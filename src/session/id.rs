//! Session identifiers.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Opaque session token handed to the client in the `mcp-session-id` header.
///
/// Minted once per session from a random UUID v4 (122 bits from the OS CSPRNG)
/// and never reused. Cloning is cheap.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Arc<str>);

impl SessionId {
    /// Mint a fresh random id.
    pub fn random() -> Self {
        Self(Arc::from(Uuid::new_v4().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for SessionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

/// Source of new session ids used by the bootstrap.
pub type SessionIdGenerator = Arc<dyn Fn() -> SessionId + Send + Sync>;

/// The default generator: random UUID v4 per call.
pub fn random_ids() -> SessionIdGenerator {
    Arc::new(SessionId::random)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn random_ids_are_distinct_uuids() {
        let ids: HashSet<SessionId> = (0..1000).map(|_| SessionId::random()).collect();
        assert_eq!(ids.len(), 1000);
        for id in &ids {
            let parsed = Uuid::parse_str(id.as_str()).expect("id should be a uuid");
            assert_eq!(parsed.get_version_num(), 4);
        }
    }

    #[test]
    fn lookup_by_str_matches_owned_id() {
        let id = SessionId::from("abc");
        let set: HashSet<SessionId> = [id.clone()].into_iter().collect();
        assert!(set.contains("abc"));
        assert_eq!(id.to_string(), "abc");
    }
}
