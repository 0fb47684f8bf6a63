//! Shared streaming plumbing for provider adapters.
//!
//! The OpenAI-compatible adapter speaks SSE (`data:` lines delimited by
//! `\n\n`); the Ollama adapter speaks NDJSON (one JSON object per line).
//! Both reduce to the same shape: buffer response chunks, drain complete
//! payload strings, feed each payload to an adapter-specific parser that
//! may yield a [`StreamEvent`]. If the parser never produced a `Done`,
//! one is appended when the body closes.

use crate::util::from_reqwest;
use vg_domain::error::Result;
use vg_domain::stream::{BoxStream, StreamEvent};

/// Extract complete `data:` payloads from an SSE buffer.
///
/// SSE events are delimited by `\n\n`; only `data:` lines matter here
/// (`event:`, `id:` and `retry:` lines are dropped). Consumed bytes are
/// removed in place; a trailing partial event stays for the next call.
pub(crate) fn drain_sse_data(buffer: &mut String) -> Vec<String> {
    let mut payloads = Vec::new();

    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..2);

        for line in block.lines() {
            if let Some(data) = line.trim().strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    payloads.push(data.to_string());
                }
            }
        }
    }

    payloads
}

/// Extract complete lines from an NDJSON buffer, leaving a trailing
/// partial line in place.
pub(crate) fn drain_ndjson_lines(buffer: &mut String) -> Vec<String> {
    let mut lines = Vec::new();

    while let Some(pos) = buffer.find('\n') {
        let line: String = buffer.drain(..=pos).collect();
        let line = line.trim();
        if !line.is_empty() {
            lines.push(line.to_string());
        }
    }

    lines
}

/// How a response body is framed into payload strings.
pub(crate) enum Framing {
    Sse,
    Ndjson,
}

/// Build a token [`BoxStream`] from a streaming `reqwest::Response`.
///
/// `parse` receives each payload string and returns `None` to skip it or
/// `Some(event)` to emit. The stream flushes the remaining buffer when the
/// body closes and guarantees a terminal `Done` event.
pub(crate) fn body_event_stream<F>(
    response: reqwest::Response,
    framing: Framing,
    parse: F,
) -> BoxStream<'static, Result<StreamEvent>>
where
    F: Fn(&str) -> Option<Result<StreamEvent>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();
        let mut done_emitted = false;

        loop {
            let chunk = match response.chunk().await {
                Ok(Some(bytes)) => bytes,
                Ok(None) => break,
                Err(e) => {
                    yield Err(from_reqwest(e));
                    break;
                }
            };
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            let payloads = match framing {
                Framing::Sse => drain_sse_data(&mut buffer),
                Framing::Ndjson => drain_ndjson_lines(&mut buffer),
            };
            for payload in payloads {
                if let Some(event) = parse(&payload) {
                    if matches!(&event, Ok(StreamEvent::Done { .. })) {
                        done_emitted = true;
                    }
                    yield event;
                }
            }
        }

        // Flush a trailing partial payload (a final line without newline).
        let tail = buffer.trim().to_string();
        if !tail.is_empty() {
            if let Some(event) = parse(&tail) {
                if matches!(&event, Ok(StreamEvent::Done { .. })) {
                    done_emitted = true;
                }
                yield event;
            }
        }

        if !done_emitted {
            yield Ok(StreamEvent::Done {
                usage: None,
                finish_reason: Some("stop".into()),
            });
        }
    };

    Box::pin(stream)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_single_event() {
        let mut buf = String::from("event: message\ndata: {\"a\":1}\n\n");
        assert_eq!(drain_sse_data(&mut buf), vec!["{\"a\":1}"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn sse_partial_event_stays_buffered() {
        let mut buf = String::from("data: complete\n\ndata: part");
        assert_eq!(drain_sse_data(&mut buf), vec!["complete"]);
        assert_eq!(buf, "data: part");
    }

    #[test]
    fn sse_ignores_non_data_lines() {
        let mut buf = String::from("event: ping\nid: 7\ndata: payload\n\n");
        assert_eq!(drain_sse_data(&mut buf), vec!["payload"]);
    }

    #[test]
    fn sse_done_sentinel_preserved() {
        let mut buf = String::from("data: [DONE]\n\n");
        assert_eq!(drain_sse_data(&mut buf), vec!["[DONE]"]);
    }

    #[test]
    fn ndjson_drains_complete_lines_only() {
        let mut buf = String::from("{\"done\":false}\n{\"done\":tr");
        assert_eq!(drain_ndjson_lines(&mut buf), vec!["{\"done\":false}"]);
        assert_eq!(buf, "{\"done\":tr");
    }

    #[test]
    fn ndjson_skips_blank_lines() {
        let mut buf = String::from("\n\n{\"x\":1}\n");
        assert_eq!(drain_ndjson_lines(&mut buf), vec!["{\"x\":1}"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn ndjson_incremental_buffering() {
        let mut buf = String::from("{\"x\"");
        assert!(drain_ndjson_lines(&mut buf).is_empty());
        buf.push_str(":1}\n{\"y\":2}\n");
        assert_eq!(drain_ndjson_lines(&mut buf), vec!["{\"x\":1}", "{\"y\":2}"]);
    }
}
