// Streaming translation pipeline.
//
// Each dialect module exposes a generator that consumes the upstream HTTP
// response and yields SSE frame strings, plus a collector that reassembles
// the generator's output into a single non-streaming response object.

pub mod claude;
pub mod gemini;
pub mod openai;
pub mod retry;

use std::time::Duration;

use async_stream::stream;
use futures::{Stream, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::proxy::common::errors::{Dialect, GatewayError};
use crate::proxy::tokenizer::{count_tokens, tokens_from_context_usage};
use crate::proxy::upstream::event_stream::{EventStreamParser, UpstreamEvent};
use crate::proxy::upstream::parsers::ToolCall;

/// Consecutive per-chunk read timeouts tolerated before the stream is
/// declared dead. Models emitting large single blocks may legitimately
/// stall between chunks.
const MAX_CONSECUTIVE_READ_TIMEOUTS: u32 = 3;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StreamError {
    #[error("no data received within the first-token timeout")]
    FirstTokenTimeout,

    #[error("stream stalled past the read timeout")]
    ReadTimeout,

    #[error("upstream stream error: {0}")]
    Transport(String),
}

impl From<StreamError> for GatewayError {
    fn from(e: StreamError) -> Self {
        match e {
            StreamError::FirstTokenTimeout | StreamError::ReadTimeout => {
                GatewayError::Timeout(e.to_string())
            }
            StreamError::Transport(msg) => GatewayError::Upstream {
                status: 502,
                message: msg,
            },
        }
    }
}

/// Everything a dialect generator needs besides the response itself.
#[derive(Debug, Clone)]
pub struct StreamContext {
    pub model: String,
    pub first_token_timeout: Duration,
    pub read_timeout: Duration,
    pub max_input_tokens: u64,
    /// Local prompt estimate, used when the upstream reports no context usage.
    pub prompt_estimate: u64,
}

/// Parsed upstream events plus a terminal marker carrying the finalized
/// tool calls.
pub(crate) enum PumpEvent {
    Content(String),
    Usage(Value),
    ContextUsage(f64),
    Done { tool_calls: Vec<ToolCall> },
}

/// Shared read loop: first-chunk timeout, per-chunk read timeout with a
/// bounded tolerance for consecutive stalls, incremental parsing, and
/// finalization (including bracket-form tool recovery).
pub(crate) fn upstream_events(
    response: reqwest::Response,
    first_token_timeout: Duration,
    read_timeout: Duration,
) -> impl Stream<Item = Result<PumpEvent, StreamError>> {
    stream! {
        let mut parser = EventStreamParser::new();
        let mut byte_stream = response.bytes_stream();
        let mut full_text = String::new();

        match tokio::time::timeout(first_token_timeout, byte_stream.next()).await {
            Err(_) => {
                yield Err(StreamError::FirstTokenTimeout);
                return;
            }
            Ok(None) => {
                let tool_calls = parser.finish(&full_text);
                yield Ok(PumpEvent::Done { tool_calls });
                return;
            }
            Ok(Some(Err(e))) => {
                yield Err(StreamError::Transport(e.to_string()));
                return;
            }
            Ok(Some(Ok(bytes))) => {
                for event in parser.feed(&bytes) {
                    if let UpstreamEvent::Content(ref c) = event {
                        full_text.push_str(c);
                    }
                    yield Ok(pump_event(event));
                }
            }
        }

        let mut consecutive_timeouts = 0u32;
        loop {
            match tokio::time::timeout(read_timeout, byte_stream.next()).await {
                Err(_) => {
                    consecutive_timeouts += 1;
                    warn!(
                        "Upstream stream stalled ({} consecutive read timeouts)",
                        consecutive_timeouts
                    );
                    if consecutive_timeouts > MAX_CONSECUTIVE_READ_TIMEOUTS {
                        yield Err(StreamError::ReadTimeout);
                        return;
                    }
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    yield Err(StreamError::Transport(e.to_string()));
                    return;
                }
                Ok(Some(Ok(bytes))) => {
                    consecutive_timeouts = 0;
                    for event in parser.feed(&bytes) {
                        if let UpstreamEvent::Content(ref c) = event {
                            full_text.push_str(c);
                        }
                        yield Ok(pump_event(event));
                    }
                }
            }
        }

        let tool_calls = parser.finish(&full_text);
        yield Ok(PumpEvent::Done { tool_calls });
    }
}

fn pump_event(event: UpstreamEvent) -> PumpEvent {
    match event {
        UpstreamEvent::Content(c) => PumpEvent::Content(c),
        UpstreamEvent::Usage(v) => PumpEvent::Usage(v),
        UpstreamEvent::ContextUsage(p) => PumpEvent::ContextUsage(p),
    }
}

/// Final token accounting for one stream.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct UsageSummary {
    pub prompt: u64,
    pub completion: u64,
    pub total: u64,
    pub credits: Option<Value>,
}

pub(crate) fn compute_usage(
    context_pct: Option<f64>,
    full_text: &str,
    ctx: &StreamContext,
    credits: Option<Value>,
) -> UsageSummary {
    let completion = count_tokens(full_text);
    match tokens_from_context_usage(context_pct, completion, ctx.max_input_tokens) {
        Some((prompt, total)) => UsageSummary {
            prompt,
            completion,
            total,
            credits,
        },
        None => UsageSummary {
            prompt: ctx.prompt_estimate,
            completion,
            total: ctx.prompt_estimate + completion,
            credits,
        },
    }
}

/// One bare SSE frame.
pub(crate) fn sse_data(value: &Value) -> String {
    format!("data: {}\n\n", value)
}

/// One named-event SSE frame (Anthropic framing).
pub(crate) fn sse_event(event: &str, value: &Value) -> String {
    format!("event: {}\ndata: {}\n\n", event, value)
}

/// The mid-flight error frame for a dialect. No terminator follows it.
pub fn error_frame(dialect: Dialect, error: &GatewayError) -> String {
    let body = error.body_for(dialect);
    match dialect {
        Dialect::Anthropic => format!("event: error\ndata: {}\n\n", body),
        Dialect::OpenAi | Dialect::Gemini => format!("data: {}\n\n", body),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    /// Wrap raw bytes in a reqwest::Response for generator tests.
    pub fn response_from_chunks(chunks: Vec<&'static [u8]>) -> reqwest::Response {
        let stream = futures::stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok::<_, std::io::Error>(bytes::Bytes::from_static(c))),
        );
        let body = reqwest::Body::wrap_stream(stream);
        reqwest::Response::from(
            axum::http::Response::builder()
                .status(200)
                .body(body)
                .unwrap(),
        )
    }

    pub fn response_from_str(body: &'static str) -> reqwest::Response {
        response_from_chunks(vec![body.as_bytes()])
    }

    pub fn response_that_never_sends() -> reqwest::Response {
        let pending = futures::stream::pending::<Result<bytes::Bytes, std::io::Error>>();
        let body = reqwest::Body::wrap_stream(pending);
        reqwest::Response::from(
            axum::http::Response::builder()
                .status(200)
                .body(body)
                .unwrap(),
        )
    }
}
