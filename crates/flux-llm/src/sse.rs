//! # SSE Parser
//!
//! Both vendor adapters stream over HTTP Server-Sent Events. This parser
//! turns a chunked byte stream into one `data` string per dispatched event:
//! - lines are buffered across chunk boundaries (`\n` or `\r\n`)
//! - consecutive `data:` lines of one event are joined with `\n`
//! - a blank line dispatches the event
//! - comments and non-`data` fields are ignored
//! - the `[DONE]` sentinel and empty events are dropped

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};

use crate::provider::ProviderError;

/// Parse an SSE byte stream into event data strings.
///
/// A transport error is yielded once and ends the stream. An event still
/// buffered when the body ends without a trailing blank line is dispatched.
pub fn parse_sse_lines<S, E>(byte_stream: S) -> impl Stream<Item = Result<String, ProviderError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: Into<ProviderError> + Send + 'static,
{
    let state = ParserState {
        stream: byte_stream,
        buffer: BytesMut::with_capacity(8192),
        data: None,
        finished: false,
    };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            if st.finished {
                return None;
            }

            if let Some(newline_pos) = st.buffer.iter().position(|&b| b == b'\n') {
                let mut line = st.buffer.split_to(newline_pos + 1);
                line.truncate(line.len() - 1);
                if line.last() == Some(&b'\r') {
                    line.truncate(line.len() - 1);
                }
                let Ok(line) = std::str::from_utf8(&line) else {
                    continue;
                };
                if let Some(event) = st.feed_line(line) {
                    return Some((Ok(event), st));
                }
                continue;
            }

            match st.stream.next().await {
                Some(Ok(chunk)) => st.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((Err(e.into()), st));
                }
                None => {
                    st.finished = true;
                    if !st.buffer.is_empty() {
                        let rest = st.buffer.split();
                        if let Ok(line) = std::str::from_utf8(&rest) {
                            let _ = st.feed_line(line.trim_end_matches('\r'));
                        }
                    }
                    if let Some(event) = st.dispatch() {
                        return Some((Ok(event), st));
                    }
                    return None;
                }
            }
        }
    })
}

struct ParserState<S> {
    stream: S,
    buffer: BytesMut,
    data: Option<String>,
    finished: bool,
}

impl<S> ParserState<S> {
    /// Consume one line; returns an event when the line completes one.
    fn feed_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            match &mut self.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_owned()),
            }
        }
        None
    }

    fn dispatch(&mut self) -> Option<String> {
        let data = self.data.take()?;
        let trimmed = data.trim();
        if trimmed.is_empty() || trimmed == "[DONE]" {
            return None;
        }
        Some(data)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    async fn parse(chunks: Vec<&'static str>) -> Vec<String> {
        let stream = futures::stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok::<_, ProviderError>(Bytes::from(c))),
        );
        parse_sse_lines(stream)
            .map(|r| r.unwrap())
            .collect()
            .await
    }

    #[tokio::test]
    async fn single_event() {
        assert_eq!(parse(vec!["data: {\"a\":1}\n\n"]).await, vec!["{\"a\":1}"]);
    }

    #[tokio::test]
    async fn multiple_events_in_one_chunk() {
        let events = parse(vec!["data: {\"a\":1}\n\ndata: {\"b\":2}\n\n"]).await;
        assert_eq!(events, vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    #[tokio::test]
    async fn event_split_across_chunks() {
        let events = parse(vec!["data: {\"par", "tial\":true}\r\n", "\r\n"]).await;
        assert_eq!(events, vec!["{\"partial\":true}"]);
    }

    #[tokio::test]
    async fn event_field_and_comments_ignored() {
        let events = parse(vec![
            ": keep-alive\n\nevent: content_block_delta\ndata: {\"v\":1}\n\nevent: ping\n\n",
        ])
        .await;
        assert_eq!(events, vec!["{\"v\":1}"]);
    }

    #[tokio::test]
    async fn multiline_data_joined() {
        let events = parse(vec!["data: line one\ndata: line two\n\n"]).await;
        assert_eq!(events, vec!["line one\nline two"]);
    }

    #[tokio::test]
    async fn done_marker_dropped() {
        let events = parse(vec!["data: {\"ok\":true}\n\ndata: [DONE]\n\n"]).await;
        assert_eq!(events, vec!["{\"ok\":true}"]);
    }

    #[tokio::test]
    async fn no_space_after_colon() {
        assert_eq!(parse(vec!["data:{\"x\":0}\n\n"]).await, vec!["{\"x\":0}"]);
    }

    #[tokio::test]
    async fn trailing_event_without_blank_line() {
        assert_eq!(parse(vec!["data: {\"tail\":1}"]).await, vec!["{\"tail\":1}"]);
    }

    #[tokio::test]
    async fn empty_stream() {
        assert!(parse(vec![]).await.is_empty());
    }

    #[tokio::test]
    async fn transport_error_ends_stream() {
        let stream = futures::stream::iter(vec![
            Ok(Bytes::from("data: {\"a\":1}\n\n")),
            Err(ProviderError::Other {
                message: "reset".into(),
            }),
            Ok(Bytes::from("data: {\"b\":2}\n\n")),
        ]);
        let items: Vec<_> = parse_sse_lines(stream).collect().await;
        assert_eq!(items.len(), 2);
        assert_matches!(&items[0], Ok(data) if data == "{\"a\":1}");
        assert_matches!(&items[1], Err(ProviderError::Other { .. }));
    }
}
