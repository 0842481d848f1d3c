//! Session handler: routes inbound envelopes to chat streaming, change
//! generation and publishing.

pub mod intent;

use std::sync::Arc;

use flux_core::{
    ChatMessage, ChatSend, Envelope, InboundMessage, PublishStatus, RouteError, SelfModDecision,
    SelfModRequest, SelfModStatus,
};
use flux_llm::{ChatProvider, ProviderRegistry, ProviderResult};
use flux_selfmod::{ChangeEngine, SelfModError};
use futures::StreamExt;
use metrics::counter;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, info_span, warn};

use crate::metrics::CHAT_STREAMS_TOTAL;
use crate::publish::{PublishOrchestrator, PublishTarget, StatusReporter};
use crate::websocket::connection::ClientConnection;
use crate::websocket::hub::HubError;

use self::intent::looks_like_change_request;

const GENERATING_ACK: &str = "Generating code changes...\n";

/// Per-server message router shared by every connection.
pub struct SessionHandler {
    providers: Arc<ProviderRegistry>,
    default_provider: String,
    engine: Option<Arc<ChangeEngine>>,
    publisher: Option<Arc<PublishOrchestrator>>,
    publish_tasks: TaskTracker,
}

impl SessionHandler {
    /// Build a handler. Without an engine every self-modification message
    /// is answered with a configuration error; without a `target` approved
    /// changes are only applied locally.
    pub fn new(
        providers: Arc<ProviderRegistry>,
        default_provider: impl Into<String>,
        engine: Option<Arc<ChangeEngine>>,
        target: Option<PublishTarget>,
    ) -> Self {
        let publisher = engine
            .as_ref()
            .map(|engine| Arc::new(PublishOrchestrator::new(Arc::clone(engine), target)));
        Self {
            providers,
            default_provider: default_provider.into(),
            engine,
            publisher,
            publish_tasks: TaskTracker::new(),
        }
    }

    /// Spawn publish runs on `tracker` so a server drain waits for them.
    #[must_use]
    pub fn with_publish_tracker(mut self, tracker: TaskTracker) -> Self {
        self.publish_tasks = tracker;
        self
    }

    /// Handle one decoded envelope. Long-running work is spawned; this
    /// returns without waiting for it.
    pub fn handle(&self, conn: &Arc<ClientConnection>, envelope: &Envelope) {
        match InboundMessage::from_envelope(envelope) {
            Ok(InboundMessage::ChatSend(send)) => self.on_chat_send(conn, send),
            Ok(InboundMessage::ChatCancel) => {
                if conn.cancel_active() {
                    debug!(conn_id = %conn.id, "active task cancelled");
                }
            }
            Ok(InboundMessage::SelfModRequest(request)) => self.on_selfmod_request(conn, request),
            Ok(InboundMessage::SelfModApprove(decision)) => self.on_approve(conn, decision),
            Ok(InboundMessage::SelfModReject(decision)) => self.on_reject(conn, &decision),
            Err(RouteError::UnknownMessageType(kind)) => {
                warn!(conn_id = %conn.id, kind = %kind, "unknown message type");
                reply(conn, &Envelope::error(format!("unknown message type: {kind}")));
            }
            Err(e @ RouteError::InvalidPayload { .. }) => {
                debug!(conn_id = %conn.id, error = %e, "invalid payload");
                reply(conn, &Envelope::error(e.to_string()));
            }
        }
    }

    fn on_chat_send(&self, conn: &Arc<ClientConnection>, send: ChatSend) {
        let _ = conn.cancel_active();
        let Some(provider) = self.resolve_provider(conn, send.provider_id.as_deref()) else {
            return;
        };

        let last = send.messages.last().map(|m| m.content.as_str()).unwrap_or_default();
        let engine = self.engine.as_ref().filter(|_| looks_like_change_request(last));
        if let Some(engine) = engine {
            self.start_generation(conn, Arc::clone(engine), provider, last.to_owned());
            return;
        }

        let (generation, cancel) = conn.begin_task();
        counter!(CHAT_STREAMS_TOTAL, "provider" => provider.id().to_owned()).increment(1);
        let span = info_span!("chat_stream", conn_id = %conn.id, provider = provider.id(), generation);
        let _ = tokio::spawn(
            run_chat_stream(Arc::clone(conn), provider, send.messages, generation, cancel)
                .instrument(span),
        );
    }

    fn on_selfmod_request(&self, conn: &Arc<ClientConnection>, request: SelfModRequest) {
        let Some(engine) = self.require_engine(conn) else {
            return;
        };
        let Some(provider) = self.resolve_provider(conn, request.provider_id.as_deref()) else {
            return;
        };
        self.start_generation(conn, engine, provider, request.request);
    }

    fn start_generation(
        &self,
        conn: &Arc<ClientConnection>,
        engine: Arc<ChangeEngine>,
        provider: Arc<dyn ChatProvider>,
        request: String,
    ) {
        let (generation, cancel) = conn.begin_task();
        let _ = emit(conn, generation, &Envelope::chat_chunk(GENERATING_ACK, false));

        let conn = Arc::clone(conn);
        let span = info_span!("selfmod_generate", conn_id = %conn.id, provider = provider.id(), generation);
        let _ = tokio::spawn(
            async move {
                match engine.generate(provider.as_ref(), &request, cancel).await {
                    Ok(change) => {
                        let summary = format!(
                            "\nGenerated changes: {}\nReview the diff and approve or reject it.",
                            change.description
                        );
                        if emit(&conn, generation, &Envelope::chat_chunk(summary, true)) {
                            let _ = emit(&conn, generation, &Envelope::selfmod_diff(&change.diff_message()));
                        }
                    }
                    Err(SelfModError::Cancelled) => debug!("generation cancelled"),
                    Err(e) => {
                        let message = format!("\nFailed to generate changes: {e}");
                        let _ = emit(&conn, generation, &Envelope::chat_chunk(message, true));
                    }
                }
                conn.finish_task(generation);
            }
            .instrument(span),
        );
    }

    fn on_approve(&self, conn: &Arc<ClientConnection>, decision: SelfModDecision) {
        let Some(publisher) = self.publisher.clone() else {
            reply(conn, &Envelope::error(NOT_CONFIGURED));
            return;
        };
        let reporter = ConnectionReporter(Arc::clone(conn));
        let _ = self.publish_tasks.spawn(async move {
            // Failures were already reported as an `error` status.
            let _ = publisher.publish(&decision.request_id, &reporter).await;
        });
    }

    fn on_reject(&self, conn: &Arc<ClientConnection>, decision: &SelfModDecision) {
        let Some(engine) = self.require_engine(conn) else {
            return;
        };
        let (status, message) = match engine.reject(&decision.request_id) {
            Ok(_) => (PublishStatus::Rejected, "change request rejected".to_owned()),
            Err(e) => (PublishStatus::Error, e.to_string()),
        };
        reply(
            conn,
            &Envelope::selfmod_status(&SelfModStatus {
                request_id: decision.request_id.clone(),
                status,
                message: Some(message),
                pr_url: None,
            }),
        );
    }

    fn resolve_provider(
        &self,
        conn: &ClientConnection,
        requested: Option<&str>,
    ) -> Option<Arc<dyn ChatProvider>> {
        let id = requested
            .filter(|id| !id.is_empty())
            .unwrap_or(self.default_provider.as_str());
        let provider = self.providers.get(id);
        if provider.is_none() {
            warn!(conn_id = %conn.id, provider = id, "unknown provider");
            reply(conn, &Envelope::error(format!("unknown provider: {id}")));
        }
        provider
    }

    fn require_engine(&self, conn: &ClientConnection) -> Option<Arc<ChangeEngine>> {
        if self.engine.is_none() {
            reply(conn, &Envelope::error(NOT_CONFIGURED));
        }
        self.engine.clone()
    }
}

const NOT_CONFIGURED: &str = "self-modification is not configured";

/// Forwards publish progress to the requesting connection.
struct ConnectionReporter(Arc<ClientConnection>);

impl StatusReporter for ConnectionReporter {
    fn report(&self, status: SelfModStatus) {
        if let Err(e) = self.0.send_envelope(&Envelope::selfmod_status(&status)) {
            warn!(conn_id = %self.0.id, error = %e, status = status.status.as_str(), "status not delivered");
        }
    }
}

async fn run_chat_stream(
    conn: Arc<ClientConnection>,
    provider: Arc<dyn ChatProvider>,
    messages: Vec<ChatMessage>,
    generation: u64,
    cancel: CancellationToken,
) {
    let result = stream_deltas(&conn, provider.as_ref(), &messages, generation, &cancel).await;
    match result {
        Ok(()) if !cancel.is_cancelled() => {
            let _ = emit(&conn, generation, &Envelope::chat_chunk("", true));
        }
        Ok(()) => debug!("chat stream cancelled"),
        Err(_) if cancel.is_cancelled() => debug!("chat stream cancelled"),
        Err(e) => {
            warn!(error = %e, category = e.category(), "chat stream failed");
            let _ = emit(&conn, generation, &Envelope::error(format!("stream error: {e}")));
        }
    }
    conn.finish_task(generation);
}

async fn stream_deltas(
    conn: &ClientConnection,
    provider: &dyn ChatProvider,
    messages: &[ChatMessage],
    generation: u64,
    cancel: &CancellationToken,
) -> ProviderResult<()> {
    let mut stream = provider.stream_chat(messages, cancel.clone()).await?;
    while let Some(delta) = stream.next().await {
        let delta = delta?;
        if delta.is_empty() {
            continue;
        }
        if !emit(conn, generation, &Envelope::chat_chunk(delta, false)) {
            break;
        }
    }
    Ok(())
}

/// Emit on behalf of task `generation`. Returns `false` once the task has
/// been superseded or the connection has closed.
fn emit(conn: &ClientConnection, generation: u64, envelope: &Envelope) -> bool {
    match conn.emit_if_current(generation, envelope) {
        Ok(current) => current,
        Err(HubError::BackpressureExceeded(_)) => {
            warn!(conn_id = %conn.id, "outbound queue full, chunk dropped");
            true
        }
        Err(e) => {
            debug!(conn_id = %conn.id, error = %e, "emit failed");
            false
        }
    }
}

fn reply(conn: &ClientConnection, envelope: &Envelope) {
    if let Err(e) = conn.send_envelope(envelope) {
        warn!(conn_id = %conn.id, error = %e, code = e.code(), kind = %envelope.kind, "reply not delivered");
    }
}
