//! `OpenAI` chat completions adapter (`POST /v1/chat/completions`, `stream: true`).

use std::future::ready;

use async_trait::async_trait;
use flux_core::{ChatMessage, Role};
use futures::StreamExt;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use crate::provider::{
    ChatProvider, ProviderError, ProviderResult, TextStream, cancellable, error_from_response,
};
use crate::sse::parse_sse_lines;

/// Default API root.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Connection settings for [`OpenAiProvider`].
#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    /// Bearer token.
    pub api_key: String,
    /// Model identifier.
    pub model: String,
    /// API root override, used by tests.
    pub base_url: Option<String>,
    /// `max_tokens` sent with each request.
    pub max_tokens: u32,
}

/// Streams completions from `OpenAI`.
pub struct OpenAiProvider {
    config: OpenAiConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    stream: bool,
    messages: Vec<MessageParam<'a>>,
}

#[derive(Serialize)]
struct MessageParam<'a> {
    role: Role,
    content: &'a str,
}

#[derive(Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<Choice>,
    error: Option<ChunkError>,
}

#[derive(Deserialize)]
struct Choice {
    #[serde(default)]
    delta: ChoiceDelta,
}

#[derive(Default, Deserialize)]
struct ChoiceDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChunkError {
    message: String,
    code: Option<String>,
}

impl OpenAiProvider {
    /// Create a provider with a fresh HTTP client.
    pub fn new(config: OpenAiConfig) -> Self {
        Self::with_client(config, reqwest::Client::new())
    }

    /// Create a provider sharing an existing HTTP client.
    pub fn with_client(config: OpenAiConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    fn build_request<'a>(&'a self, messages: &'a [ChatMessage]) -> CompletionRequest<'a> {
        CompletionRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            stream: true,
            messages: messages
                .iter()
                .map(|m| MessageParam {
                    role: m.role,
                    content: &m.content,
                })
                .collect(),
        }
    }
}

fn decode_chunk(data: &str) -> Option<ProviderResult<String>> {
    let chunk = match serde_json::from_str::<CompletionChunk>(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!(error = %e, data = %flux_core::text::preview(data, 100), "failed to parse OpenAI SSE chunk");
            return None;
        }
    };
    if let Some(err) = chunk.error {
        return Some(Err(ProviderError::Api {
            status: 0,
            message: err.message,
            code: err.code,
        }));
    }
    let text: String = chunk
        .choices
        .into_iter()
        .filter_map(|c| c.delta.content)
        .collect();
    (!text.is_empty()).then_some(Ok(text))
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    fn id(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    #[instrument(skip_all, fields(provider = "openai", model = %self.config.model))]
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        cancel: CancellationToken,
    ) -> ProviderResult<TextStream> {
        counter!("provider_requests_total", "provider" => "openai").increment(1);
        let base_url = self.config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let url = format!("{}/v1/chat/completions", base_url.trim_end_matches('/'));
        let request = self.build_request(messages);
        debug!(message_count = request.messages.len(), "sending OpenAI request");

        let send = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send();
        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ProviderError::Cancelled),
            response = send => response?,
        };

        if !response.status().is_success() {
            let err = error_from_response(response).await;
            error!(error = %err, category = err.category(), "OpenAI API error");
            counter!("provider_errors_total", "provider" => "openai").increment(1);
            return Err(err);
        }

        let deltas = parse_sse_lines(response.bytes_stream()).filter_map(|item| {
            ready(match item {
                Ok(data) => decode_chunk(&data),
                Err(e) => Some(Err(e)),
            })
        });
        Ok(cancellable(deltas, cancel))
    }
}
