//! Google Gemini adapter (`POST /v1beta/models/{model}:streamGenerateContent?alt=sse`).

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

/// Default API root, including the version segment.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Connection settings for [`GeminiProvider`].
#[derive(Clone, Debug)]
pub struct GeminiConfig {
    /// `x-goog-api-key` value.
    pub api_key: String,
    /// Model identifier.
    pub model: String,
    /// API root override, used by tests.
    pub base_url: Option<String>,
    /// `maxOutputTokens` sent with each request.
    pub max_tokens: u32,
}

/// Streams completions from Gemini.
pub struct GeminiProvider {
    config: GeminiConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: [TextPart<'a>; 1],
}

#[derive(Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct SystemInstruction {
    parts: [OwnedTextPart; 1],
}

#[derive(Serialize)]
struct OwnedTextPart {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<ChunkError>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ChunkError {
    message: String,
    status: Option<String>,
}

impl GeminiProvider {
    /// Create a provider with a fresh HTTP client.
    pub fn new(config: GeminiConfig) -> Self {
        Self::with_client(config, reqwest::Client::new())
    }

    /// Create a provider sharing an existing HTTP client.
    pub fn with_client(config: GeminiConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    fn build_headers(&self) -> ProviderResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let key = HeaderValue::from_str(&self.config.api_key).map_err(|e| ProviderError::Auth {
            message: format!("invalid API key header: {e}"),
        })?;
        let _ = headers.insert("x-goog-api-key", key);
        Ok(headers)
    }

    /// System turns become `systemInstruction`; assistant turns use the
    /// `model` role.
    fn build_request<'a>(&'a self, messages: &'a [ChatMessage]) -> GenerateRequest<'a> {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let contents = messages
            .iter()
            .filter_map(|m| {
                let role = match m.role {
                    Role::User => "user",
                    Role::Assistant => "model",
                    Role::System => return None,
                };
                Some(Content {
                    role,
                    parts: [TextPart { text: &m.content }],
                })
            })
            .collect();

        GenerateRequest {
            contents,
            system_instruction: (!system.is_empty()).then(|| SystemInstruction {
                parts: [OwnedTextPart {
                    text: system.join("\n\n"),
                }],
            }),
            generation_config: GenerationConfig {
                max_output_tokens: self.config.max_tokens,
            },
        }
    }

    fn url(&self) -> String {
        let base_url = self.config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            base_url.trim_end_matches('/'),
            self.config.model
        )
    }
}

fn decode_chunk(data: &str) -> Option<ProviderResult<String>> {
    let chunk = match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!(error = %e, data = %flux_core::text::preview(data, 100), "failed to parse Gemini SSE chunk");
            return None;
        }
    };
    if let Some(err) = chunk.error {
        return Some(Err(ProviderError::Api {
            status: 0,
            message: err.message,
            code: err.status,
        }));
    }
    // Only the first candidate is streamed.
    let text: String = chunk
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    (!text.is_empty()).then_some(Ok(text))
}

#[async_trait]
impl ChatProvider for GeminiProvider {
    fn id(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    #[instrument(skip_all, fields(provider = "gemini", model = %self.config.model))]
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        cancel: CancellationToken,
    ) -> ProviderResult<TextStream> {
        counter!("provider_requests_total", "provider" => "gemini").increment(1);
        let request = self.build_request(messages);
        debug!(message_count = request.contents.len(), "sending Gemini request");

        let send = self
            .client
            .post(self.url())
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
            error!(error = %err, category = err.category(), "Gemini API error");
            counter!("provider_errors_total", "provider" => "gemini").increment(1);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::collect_text;
    use assert_matches::assert_matches;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(base_url: &str) -> GeminiProvider {
        GeminiProvider::new(GeminiConfig {
            api_key: "g-key".into(),
            model: "gemini-test".into(),
            base_url: Some(base_url.to_string()),
            max_tokens: 512,
        })
    }

    fn chunk(text: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({
                "candidates": [{"content": {"role": "model", "parts": [{"text": text}]}}]
            })
        )
    }

    #[test]
    fn request_maps_roles_and_system() {
        let p = provider("http://unused");
        let messages = vec![
            ChatMessage::system("be terse"),
            ChatMessage::user("hi"),
            ChatMessage::assistant("hello"),
        ];
        let req = serde_json::to_value(p.build_request(&messages)).unwrap();
        assert_eq!(req["systemInstruction"]["parts"][0]["text"], "be terse");
        assert_eq!(req["contents"].as_array().unwrap().len(), 2);
        assert_eq!(req["contents"][1]["role"], "model");
        assert_eq!(req["contents"][0]["parts"][0]["text"], "hi");
        assert_eq!(req["generationConfig"]["maxOutputTokens"], 512);
    }

    #[test]
    fn no_system_instruction_without_system_turns() {
        let p = provider("http://unused");
        let req = serde_json::to_value(p.build_request(&[ChatMessage::user("hi")])).unwrap();
        assert!(req.get("systemInstruction").is_none());
    }

    #[test]
    fn url_targets_streaming_endpoint() {
        assert_eq!(
            provider("http://host/v1beta/").url(),
            "http://host/v1beta/models/gemini-test:streamGenerateContent?alt=sse"
        );
    }

    #[test]
    fn decode_skips_chunks_without_text() {
        assert!(decode_chunk(r#"{"candidates":[{"finishReason":"STOP"}]}"#).is_none());
        assert!(decode_chunk(r#"{"usageMetadata":{"totalTokenCount":3}}"#).is_none());
        assert!(decode_chunk("garbage").is_none());
        assert_matches!(
            decode_chunk(r#"{"candidates":[{"content":{"parts":[{"text":"a"},{"text":"b"}]}}]}"#),
            Some(Ok(t)) if t == "ab"
        );
    }

    #[tokio::test]
    async fn streams_candidate_text() {
        let server = MockServer::start().await;
        let body = format!("{}{}", chunk("Hi "), chunk("there"));
        Mock::given(method("POST"))
            .and(path("/models/gemini-test:streamGenerateContent"))
            .and(query_param("alt", "sse"))
            .and(header("x-goog-api-key", "g-key"))
            .and(body_partial_json(serde_json::json!({"generationConfig": {"maxOutputTokens": 512}})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let stream = provider(&server.uri())
            .stream_chat(&[ChatMessage::user("hi")], CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(collect_text(stream).await.unwrap(), "Hi there");
    }

    #[tokio::test]
    async fn api_error_carries_status_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {"code": 400, "message": "bad model", "status": "INVALID_ARGUMENT"}
            })))
            .mount(&server)
            .await;

        let err = provider(&server.uri())
            .stream_chat(&[ChatMessage::user("hi")], CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert_matches!(
            err,
            ProviderError::Api { status: 400, message, code: Some(code) }
                if message == "bad model" && code == "INVALID_ARGUMENT"
        );
    }
}
