//! Runtime configuration shared by the HTTP layer and session transports.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

/// Default bind address.
pub const DEFAULT_BIND: &str = "127.0.0.1:3000";
/// Default endpoint path.
pub const DEFAULT_PATH: &str = "/mcp";
/// Default SSE keep-alive interval.
pub const DEFAULT_SSE_KEEP_ALIVE_SECS: u64 = 15;
/// Default idle timeout before an inactive session is closed.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 1800;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind: SocketAddr,
    /// The single endpoint path all verbs are served on.
    pub path: String,
    /// Comment frames on listen streams; `None` disables them.
    pub sse_keep_alive: Option<Duration>,
    /// Close sessions idle this long; `None` keeps them until terminated.
    pub idle_timeout: Option<Duration>,
    /// Accepted `Origin` header values. Requests without `Origin` always pass.
    pub allowed_origins: HashSet<String>,
    pub server_name: String,
    pub server_version: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 3000)),
            path: DEFAULT_PATH.to_string(),
            sse_keep_alive: Some(Duration::from_secs(DEFAULT_SSE_KEEP_ALIVE_SECS)),
            idle_timeout: Some(Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS)),
            allowed_origins: ["http://localhost", "http://127.0.0.1"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            server_name: env!("CARGO_PKG_NAME").to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Zero seconds means "disabled".
pub fn secs_to_option(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_bind_matches_constant() {
        let config = GatewayConfig::default();
        assert_eq!(config.bind.to_string(), DEFAULT_BIND);
        assert_eq!(config.path, "/mcp");
        assert!(config.allowed_origins.contains("http://localhost"));
    }

    #[test]
    fn zero_disables_durations() {
        assert_eq!(secs_to_option(0), None);
        assert_eq!(secs_to_option(5), Some(Duration::from_secs(5)));
    }
}
