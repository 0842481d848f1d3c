//! # Provider Trait
//!
//! Capability interface every chat backend implements. A call returns a
//! boxed stream of text deltas; cancellation is a token handed over at call
//! time and checked between deltas, so a cancelled stream simply ends.

use std::pin::Pin;

use async_trait::async_trait;
use flux_core::ChatMessage;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

/// Result type alias for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Boxed stream of text deltas returned by [`ChatProvider::stream_chat`].
pub type TextStream = Pin<Box<dyn Stream<Item = ProviderResult<String>> + Send>>;

/// Errors that can occur during provider operations.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Authentication failed (missing or rejected key).
    #[error("auth error: {message}")]
    Auth {
        /// Error description.
        message: String,
    },

    /// Rate limited by the provider.
    #[error("rate limited: {message}")]
    RateLimited {
        /// Suggested retry delay in milliseconds, if the vendor sent one.
        retry_after_ms: Option<u64>,
        /// Error description.
        message: String,
    },

    /// Provider returned an API error.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code, or 0 for errors delivered inside the stream.
        status: u16,
        /// Error description.
        message: String,
        /// Provider-specific error code.
        code: Option<String>,
    },

    /// The caller cancelled before the request was sent.
    #[error("stream cancelled")]
    Cancelled,

    /// Provider-specific error.
    #[error("{message}")]
    Other {
        /// Error description.
        message: String,
    },
}

impl ProviderError {
    /// Whether retrying the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::RateLimited { .. } => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::Json(_) | Self::Auth { .. } | Self::Cancelled | Self::Other { .. } => false,
        }
    }

    /// Short category label for logs and metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Http(_) => "network",
            Self::Json(_) => "parse",
            Self::Auth { .. } => "auth",
            Self::RateLimited { .. } => "rate_limit",
            Self::Api { .. } => "api",
            Self::Cancelled => "cancelled",
            Self::Other { .. } => "unknown",
        }
    }
}

/// A chat backend selected by identifier.
///
/// Implementors must be `Send + Sync`; one instance serves every connection.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Registry key, e.g. `"anthropic"`.
    fn id(&self) -> &str;

    /// Model identifier sent upstream.
    fn model(&self) -> &str;

    /// Start a streamed completion for `messages`.
    ///
    /// The returned stream yields text deltas in generation order and ends
    /// early, without an error item, once `cancel` fires.
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        cancel: CancellationToken,
    ) -> ProviderResult<TextStream>;
}

/// Bound a stream by a cancellation token.
pub fn cancellable<S>(stream: S, cancel: CancellationToken) -> TextStream
where
    S: Stream<Item = ProviderResult<String>> + Send + 'static,
{
    Box::pin(stream.take_until(cancel.cancelled_owned()))
}

/// Drain a stream into one string, stopping at the first error.
pub async fn collect_text(mut stream: TextStream) -> ProviderResult<String> {
    let mut text = String::new();
    while let Some(delta) = stream.next().await {
        text.push_str(&delta?);
    }
    Ok(text)
}

/// Map a non-success HTTP response to a [`ProviderError`].
pub(crate) async fn error_from_response(response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let retry_after_ms = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|secs| secs * 1000);
    let body = response.text().await.unwrap_or_default();
    let (message, code) = parse_api_error(&body, status);

    match status {
        401 | 403 => ProviderError::Auth { message },
        429 => ProviderError::RateLimited {
            retry_after_ms,
            message,
        },
        _ => ProviderError::Api {
            status,
            message,
            code,
        },
    }
}

/// Pull `error.message` / `error.type` out of a vendor error body.
///
/// Every vendor nests details under `error`. The code field is `type` for
/// Anthropic, `code` for `OpenAI` and `status` for Gemini.
pub(crate) fn parse_api_error(body: &str, status: u16) -> (String, Option<String>) {
    let Ok(json) = serde_json::from_str::<serde_json::Value>(body) else {
        return (
            format!("HTTP {status}: {}", flux_core::text::preview(body, 200)),
            None,
        );
    };
    let error = &json["error"];
    let message = error["message"]
        .as_str()
        .unwrap_or("unknown error")
        .to_string();
    let code = error["type"]
        .as_str()
        .or_else(|| error["code"].as_str())
        .or_else(|| error["status"].as_str())
        .map(String::from);
    (message, code)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn api_error_retryable_by_status() {
        let err = |status| ProviderError::Api {
            status,
            message: String::new(),
            code: None,
        };
        assert!(err(500).is_retryable());
        assert!(err(503).is_retryable());
        assert!(!err(400).is_retryable());
        assert!(!err(0).is_retryable());
    }

    #[test]
    fn categories() {
        assert_eq!(ProviderError::Cancelled.category(), "cancelled");
        assert_eq!(
            ProviderError::Auth {
                message: "bad key".into()
            }
            .category(),
            "auth"
        );
        assert!(
            ProviderError::RateLimited {
                retry_after_ms: None,
                message: String::new()
            }
            .is_retryable()
        );
    }

    #[test]
    fn parse_anthropic_error_body() {
        let body = r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        let (message, code) = parse_api_error(body, 529);
        assert_eq!(message, "Overloaded");
        assert_eq!(code.as_deref(), Some("overloaded_error"));
    }

    #[test]
    fn parse_openai_error_body() {
        let body = r#"{"error":{"message":"Invalid model","code":"model_not_found"}}"#;
        let (message, code) = parse_api_error(body, 404);
        assert_eq!(message, "Invalid model");
        assert_eq!(code.as_deref(), Some("model_not_found"));
    }

    #[test]
    fn parse_non_json_error_body() {
        let (message, code) = parse_api_error("Bad Gateway", 502);
        assert_eq!(message, "HTTP 502: Bad Gateway");
        assert!(code.is_none());
    }

    #[tokio::test]
    async fn collect_concatenates() {
        let stream: TextStream = Box::pin(futures::stream::iter(vec![
            Ok("Hel".to_string()),
            Ok("lo".to_string()),
        ]));
        assert_eq!(collect_text(stream).await.unwrap(), "Hello");
    }

    #[tokio::test]
    async fn collect_stops_at_error() {
        let stream: TextStream = Box::pin(futures::stream::iter(vec![
            Ok("a".to_string()),
            Err(ProviderError::Other {
                message: "boom".into(),
            }),
            Ok("b".to_string()),
        ]));
        let err = collect_text(stream).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test(start_paused = true)]
    async fn cancellable_ends_quietly() {
        let cancel = CancellationToken::new();
        let slow = futures::stream::unfold(0u32, |n| async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Some((Ok(format!("{n}")), n + 1))
        });
        let mut stream = cancellable(slow, cancel.clone());

        assert_eq!(stream.next().await.unwrap().unwrap(), "0");
        cancel.cancel();
        assert!(stream.next().await.is_none());
    }
}
