//! Server configuration.

use std::time::Duration;

use flux_settings::ServerSettings;

/// Runtime configuration for [`FluxServer`](crate::server::FluxServer).
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind; `0` picks a free port.
    pub port: u16,
    /// Accepted `Origin` values; `*` or an empty list accepts any, including none.
    pub allowed_origins: Vec<String>,
    /// Ping cadence on the write side.
    pub heartbeat_interval: Duration,
    /// Longest silence tolerated on the read side.
    pub idle_timeout: Duration,
    /// Largest accepted inbound frame, in bytes.
    pub max_message_size: usize,
    /// Capacity of each connection's outbound queue.
    pub outbound_buffer: usize,
    /// Upper bound on a single transport write.
    pub write_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            allowed_origins: vec!["*".into()],
            heartbeat_interval: Duration::from_secs(54),
            idle_timeout: Duration::from_secs(60),
            max_message_size: 512 * 1024,
            outbound_buffer: 256,
            write_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(s: &ServerSettings) -> Self {
        Self {
            host: s.host.clone(),
            port: s.port,
            allowed_origins: s.allowed_origins.clone(),
            heartbeat_interval: Duration::from_secs(s.heartbeat_interval_secs),
            idle_timeout: Duration::from_secs(s.idle_timeout_secs),
            max_message_size: s.max_message_size,
            outbound_buffer: s.outbound_buffer,
            write_timeout: Duration::from_secs(s.write_timeout_secs),
        }
    }
}

impl ServerConfig {
    /// Whether an upgrade carrying `origin` may proceed.
    ///
    /// Without a wildcard, requests lacking an `Origin` header are refused.
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        if self.allowed_origins.is_empty() || self.allowed_origins.iter().any(|o| o == "*") {
            return true;
        }
        origin.is_some_and(|origin| self.allowed_origins.iter().any(|o| o == origin))
    }
}
