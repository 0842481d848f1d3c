//! Health check response.

use serde::Serialize;
use std::time::Instant;

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the process serves requests.
    pub status: String,
    /// Seconds since the server was created.
    pub uptime_secs: u64,
    /// Open WebSocket connections.
    pub connections: usize,
}

/// Build a health response.
pub fn health_check(start_time: Instant, connections: usize) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
    }
}
