//! Prometheus recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Fails if a recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Accepted WebSocket connections.
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Currently open WebSocket connections.
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Closed WebSocket connections.
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Outbound messages dropped on a full queue.
pub const WS_SEND_DROPS_TOTAL: &str = "ws_send_drops_total";
/// Upgrades refused by the origin check.
pub const WS_ORIGIN_REJECTIONS_TOTAL: &str = "ws_origin_rejections_total";
/// Chat streams started.
pub const CHAT_STREAMS_TOTAL: &str = "chat_streams_total";
/// Publish sequences finished, labelled by `outcome`.
pub const SELFMOD_PUBLISH_TOTAL: &str = "selfmod_publish_total";
