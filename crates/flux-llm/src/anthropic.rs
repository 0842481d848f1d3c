//! Anthropic Messages API adapter (`POST /v1/messages`, `stream: true`).

use std::future::ready;

use async_trait::async_trait;
use flux_core::{ChatMessage, Role};
use futures::StreamExt;
use metrics::counter;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use crate::provider::{
    ChatProvider, ProviderError, ProviderResult, TextStream, cancellable, error_from_response,
};
use crate::sse::parse_sse_lines;

/// Default API root.
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Value of the `anthropic-version` header.
const API_VERSION: &str = "2023-06-01";

/// Connection settings for [`AnthropicProvider`].
#[derive(Clone, Debug)]
pub struct AnthropicConfig {
    /// `x-api-key` value.
    pub api_key: String,
    /// Model identifier.
    pub model: String,
    /// API root override, used by tests.
    pub base_url: Option<String>,
    /// `max_tokens` sent with each request.
    pub max_tokens: u32,
}

/// Streams completions from Anthropic.
pub struct AnthropicProvider {
    config: AnthropicConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<MessageParam<'a>>,
}

#[derive(Serialize)]
struct MessageParam<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    ContentBlockDelta { delta: Delta },
    Error { error: ErrorBody },
    #[serde(other)]
    Ignored,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta { text: String },
    #[serde(other)]
    Ignored,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(rename = "type")]
    kind: Option<String>,
    message: String,
}

impl AnthropicProvider {
    /// Create a provider with a fresh HTTP client.
    pub fn new(config: AnthropicConfig) -> Self {
        Self::with_client(config, reqwest::Client::new())
    }

    /// Create a provider sharing an existing HTTP client.
    pub fn with_client(config: AnthropicConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    fn build_headers(&self) -> ProviderResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let _ = headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        let key = HeaderValue::from_str(&self.config.api_key).map_err(|e| ProviderError::Auth {
            message: format!("invalid API key header: {e}"),
        })?;
        let _ = headers.insert("x-api-key", key);
        Ok(headers)
    }

    /// System turns are lifted into the top-level `system` field.
    fn build_request<'a>(&'a self, messages: &'a [ChatMessage]) -> MessagesRequest<'a> {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let turns = messages
            .iter()
            .filter_map(|m| {
                let role = match m.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::System => return None,
                };
                Some(MessageParam {
                    role,
                    content: &m.content,
                })
            })
            .collect();

        MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            stream: true,
            system: (!system.is_empty()).then(|| system.join("\n\n")),
            messages: turns,
        }
    }
}

/// Map one SSE payload to a delta, an in-stream error, or nothing.
fn decode_event(data: &str) -> Option<ProviderResult<String>> {
    match serde_json::from_str::<StreamEvent>(data) {
        Ok(StreamEvent::ContentBlockDelta {
            delta: Delta::TextDelta { text },
        }) if !text.is_empty() => Some(Ok(text)),
        Ok(StreamEvent::Error { error }) => Some(Err(ProviderError::Api {
            status: 0,
            message: error.message,
            code: error.kind,
        })),
        Ok(_) => None,
        Err(e) => {
            warn!(error = %e, data = %flux_core::text::preview(data, 100), "failed to parse Anthropic SSE event");
            None
        }
    }
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    fn id(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    #[instrument(skip_all, fields(provider = "anthropic", model = %self.config.model))]
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        cancel: CancellationToken,
    ) -> ProviderResult<TextStream> {
        counter!("provider_requests_total", "provider" => "anthropic").increment(1);
        let base_url = self.config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let url = format!("{}/v1/messages", base_url.trim_end_matches('/'));
        let request = self.build_request(messages);
        debug!(message_count = request.messages.len(), "sending Anthropic request");

        let send = self
            .client
            .post(&url)
            .headers(self.build_headers()?)
            .json(&request)
            .send();
        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ProviderError::Cancelled),
            response = send => response?,
        };

        if !response.status().is_success() {
            let err = error_from_response(response).await;
            error!(error = %err, category = err.category(), "Anthropic API error");
            counter!("provider_errors_total", "provider" => "anthropic").increment(1);
            return Err(err);
        }

        let deltas = parse_sse_lines(response.bytes_stream()).filter_map(|item| {
            ready(match item {
                Ok(data) => decode_event(&data),
                Err(e) => Some(Err(e)),
            })
        });
        Ok(cancellable(deltas, cancel))
    }
}
