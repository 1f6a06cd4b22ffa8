//! Server-sent-event decoding for streaming chat completions.
//!
//! The response body arrives in arbitrary chunks. Chunks are appended to a
//! buffer, complete events (terminated by a blank line) are drained, and
//! every `data:` payload is handed to an adapter-specific parser.

use crate::util::from_reqwest;
use dw_domain::error::Result;
use dw_domain::stream::{BoxStream, StreamEvent};

/// Pull the `data:` payloads of every complete event out of `buffer`.
///
/// Consumed bytes are removed; a trailing partial event stays in place for
/// the next chunk.
pub(crate) fn drain_data_lines(buffer: &mut String) -> Vec<String> {
    let mut data_lines = Vec::new();

    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos + 2).collect();
        data_lines.extend(
            block
                .lines()
                .filter_map(|line| line.trim().strip_prefix("data:"))
                .map(str::trim)
                .filter(|data| !data.is_empty())
                .map(String::from),
        );
    }

    data_lines
}

/// Turn an SSE `reqwest::Response` into a stream of [`StreamEvent`]s.
///
/// `parse_data` is `FnMut` so adapters can keep state across payloads
/// (tool-call index bookkeeping). A `Done` event is synthesized if the
/// parser never produced one before the body closed.
pub(crate) fn sse_response_stream<F>(
    response: reqwest::Response,
    mut parse_data: F,
) -> BoxStream<'static, Result<StreamEvent>>
where
    F: FnMut(&str) -> Vec<Result<StreamEvent>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();
        let mut done_emitted = false;

        loop {
            let (payloads, finished) = match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    (drain_data_lines(&mut buffer), false)
                }
                Ok(None) => {
                    if !buffer.trim().is_empty() {
                        buffer.push_str("\n\n");
                    }
                    (drain_data_lines(&mut buffer), true)
                }
                Err(e) => {
                    yield Err(from_reqwest(e));
                    break;
                }
            };

            for data in payloads {
                for event in parse_data(&data) {
                    if matches!(&event, Ok(StreamEvent::Done { .. })) {
                        done_emitted = true;
                    }
                    yield event;
                }
            }

            if finished {
                break;
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
