//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use flux_core::Envelope;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::hub::ConnectionHub;
use crate::config::ServerConfig;
use crate::handler::SessionHandler;
use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL};

/// Run a WebSocket session for a connected client.
///
/// 1. Registers the client and enqueues `connection.established`
/// 2. Spawns the write loop: drains the outbound queue, pings every heartbeat
/// 3. Reads frames, decodes envelopes and hands them to the session handler
/// 4. Stops on close, idle timeout, transport error, write failure or
///    server shutdown, then unregisters
#[instrument(skip_all, fields(conn_id))]
pub async fn run_ws_session(
    socket: WebSocket,
    hub: Arc<ConnectionHub>,
    handler: Arc<SessionHandler>,
    config: Arc<ServerConfig>,
    shutdown: CancellationToken,
) {
    let (ws_tx, mut ws_rx) = socket.split();
    let (conn, rx) = hub.register();
    let _ = tracing::Span::current().record("conn_id", tracing::field::display(&conn.id));

    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    if let Err(e) = conn.send_envelope(&Envelope::connection_established(conn.id.as_str())) {
        warn!(error = %e, "failed to enqueue connection.established");
    }

    // Cancelled when the write loop exits for any reason.
    let writer_done = CancellationToken::new();
    let mut writer = tokio::spawn(write_loop(
        ws_tx,
        rx,
        config.heartbeat_interval,
        config.write_timeout,
        writer_done.clone(),
    ));

    let reason = loop {
        let next = tokio::select! {
            () = shutdown.cancelled() => break "server shutdown",
            () = writer_done.cancelled() => break "write loop ended",
            next = tokio::time::timeout(config.idle_timeout, ws_rx.next()) => next,
        };

        let msg = match next {
            Err(_) => break "idle timeout",
            Ok(None) => break "stream ended",
            Ok(Some(Err(e))) => {
                debug!(error = %e, "read failed");
                break "transport error";
            }
            Ok(Some(Ok(msg))) => msg,
        };

        let envelope = match &msg {
            Message::Text(text) => Envelope::decode(text.as_str().as_bytes()),
            Message::Binary(data) => Envelope::decode(data),
            Message::Close(_) => break "client closed",
            // Any frame counts as liveness; the idle timer was already reset.
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        match envelope {
            Ok(envelope) => handler.handle(&conn, &envelope),
            Err(e) => warn!(error = %e, "skipping malformed frame"),
        }
    };

    info!(reason, dropped = conn.drop_count(), "client disconnected");
    // Unregistering closes the queue; the writer drains it and sends Close.
    let _ = hub.unregister(&conn.id);
    if tokio::time::timeout(config.write_timeout, &mut writer).await.is_err() {
        writer.abort();
    }
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!("ws_connection_duration_seconds").record(conn.connected_at.elapsed().as_secs_f64());
}

async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Arc<String>>,
    heartbeat: Duration,
    write_timeout: Duration,
    done: CancellationToken,
) {
    let _done = done.drop_guard();
    // Fixed cadence: outbound data is not liveness, only the client's pong is.
    let mut ping = tokio::time::interval(heartbeat);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // Skip the immediate first tick
    let _ = ping.tick().await;

    loop {
        let frame = tokio::select! {
            msg = rx.recv() => match msg {
                Some(text) => Message::Text(text.as_str().into()),
                None => break,
            },
            _ = ping.tick() => Message::Ping(Bytes::new()),
        };

        match tokio::time::timeout(write_timeout, ws_tx.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(error = %e, "write failed");
                break;
            }
            Err(_) => {
                warn!(timeout_secs = write_timeout.as_secs(), "write timed out");
                break;
            }
        }
    }
    let _ = ws_tx.close().await;
}
