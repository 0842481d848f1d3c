//! In-process provider for tests in this and downstream crates.

use std::time::Duration;

use async_trait::async_trait;
use flux_core::ChatMessage;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::provider::{ChatProvider, ProviderError, ProviderResult, TextStream, cancellable};

/// Replays a fixed list of deltas, optionally pausing before each one.
pub struct ScriptedProvider {
    id: String,
    chunks: Vec<String>,
    delay: Duration,
    failure: Option<String>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedProvider {
    /// Provider that streams `chunks` in order.
    pub fn new<I, S>(id: impl Into<String>, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            chunks: chunks.into_iter().map(Into::into).collect(),
            delay: Duration::ZERO,
            failure: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Provider whose every call fails with `message`.
    pub fn failing(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::new(id, Vec::<String>::new())
        }
    }

    /// Sleep for `delay` before each delta.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Message lists received so far, one entry per call.
    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        "scripted"
    }

    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        cancel: CancellationToken,
    ) -> ProviderResult<TextStream> {
        self.calls.lock().push(messages.to_vec());
        if let Some(message) = &self.failure {
            return Err(ProviderError::Other {
                message: message.clone(),
            });
        }
        let delay = self.delay;
        let deltas = futures::stream::iter(self.chunks.clone()).then(move |chunk| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok(chunk)
        });
        Ok(cancellable(deltas, cancel))
    }
}
