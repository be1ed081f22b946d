// Upstream events → Gemini streamGenerateContent SSE frames.

use async_stream::stream;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};

use crate::proxy::common::errors::GatewayError;
use crate::proxy::upstream::json_repair::loads_tolerant;

use super::{compute_usage, sse_data, upstream_events, PumpEvent, StreamContext, StreamError};

pub fn stream_to_gemini(
    response: reqwest::Response,
    ctx: StreamContext,
) -> impl Stream<Item = Result<String, StreamError>> {
    stream! {
        let mut credits: Option<Value> = None;
        let mut context_pct: Option<f64> = None;
        let mut full_content = String::new();

        let events = upstream_events(response, ctx.first_token_timeout, ctx.read_timeout);
        futures::pin_mut!(events);

        while let Some(item) = events.next().await {
            match item {
                Err(e) => {
                    yield Err(e);
                    return;
                }
                Ok(PumpEvent::Content(content)) => {
                    full_content.push_str(&content);
                    yield Ok(sse_data(&json!({
                        "candidates": [{
                            "content": {"role": "model", "parts": [{"text": content}]},
                            "index": 0
                        }]
                    })));
                }
                Ok(PumpEvent::Usage(v)) => credits = Some(v),
                Ok(PumpEvent::ContextUsage(p)) => context_pct = Some(p),
                Ok(PumpEvent::Done { tool_calls }) => {
                    for call in &tool_calls {
                        let args = loads_tolerant(&call.arguments).unwrap_or(json!({}));
                        yield Ok(sse_data(&json!({
                            "candidates": [{
                                "content": {
                                    "role": "model",
                                    "parts": [{"functionCall": {"name": call.name, "args": args}}]
                                },
                                "index": 0
                            }]
                        })));
                    }

                    let usage = compute_usage(context_pct, &full_content, &ctx, credits.take());
                    let mut usage_metadata = json!({
                        "promptTokenCount": usage.prompt,
                        "candidatesTokenCount": usage.completion,
                        "totalTokenCount": usage.total
                    });
                    if let Some(credits) = usage.credits {
                        usage_metadata["creditsUsed"] = credits;
                    }

                    yield Ok(sse_data(&json!({
                        "candidates": [{
                            "content": {"role": "model", "parts": []},
                            "finishReason": "STOP",
                            "index": 0
                        }],
                        "usageMetadata": usage_metadata
                    })));
                    return;
                }
            }
        }
    }
}

/// Non-streaming mode: merge the generator's chunks into one
/// generateContent response.
pub async fn collect<S>(stream: S) -> Result<Value, GatewayError>
where
    S: Stream<Item = Result<String, StreamError>>,
{
    futures::pin_mut!(stream);

    let mut text = String::new();
    let mut function_parts: Vec<Value> = Vec::new();
    let mut usage_metadata: Option<Value> = None;

    while let Some(frame) = stream.next().await {
        let frame = frame.map_err(GatewayError::from)?;
        let Some(data) = frame.strip_prefix("data: ") else {
            continue;
        };
        let Ok(value) = serde_json::from_str::<Value>(data.trim()) else {
            continue;
        };

        if let Some(parts) = value.pointer("/candidates/0/content/parts").and_then(|p| p.as_array())
        {
            for part in parts {
                if let Some(t) = part.get("text").and_then(|t| t.as_str()) {
                    text.push_str(t);
                } else if part.get("functionCall").is_some() {
                    function_parts.push(part.clone());
                }
            }
        }
        if let Some(meta) = value.get("usageMetadata") {
            usage_metadata = Some(meta.clone());
        }
    }

    let mut parts = Vec::new();
    if !text.is_empty() {
        parts.push(json!({"text": text}));
    }
    parts.extend(function_parts);

    Ok(json!({
        "candidates": [{
            "content": {"role": "model", "parts": parts},
            "finishReason": "STOP",
            "index": 0
        }],
        "usageMetadata": usage_metadata.unwrap_or_else(|| json!({
            "promptTokenCount": 0,
            "candidatesTokenCount": 0,
            "totalTokenCount": 0
        }))
    }))
}
