// Upstream events → OpenAI chat.completion.chunk SSE frames.

use async_stream::stream;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};

use crate::proxy::common::errors::GatewayError;
use crate::proxy::upstream::parsers::ToolCall;
use crate::proxy::upstream::utils::new_completion_id;

use super::{compute_usage, sse_data, upstream_events, PumpEvent, StreamContext, StreamError};

pub fn stream_to_openai(
    response: reqwest::Response,
    ctx: StreamContext,
) -> impl Stream<Item = Result<String, StreamError>> {
    stream! {
        let completion_id = new_completion_id();
        let created = chrono::Utc::now().timestamp();
        let mut first_chunk = true;
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
                    let mut delta = json!({ "content": content });
                    if first_chunk {
                        delta["role"] = json!("assistant");
                        first_chunk = false;
                    }
                    yield Ok(sse_data(&chunk(&completion_id, created, &ctx.model, delta, None)));
                }
                Ok(PumpEvent::Usage(v)) => credits = Some(v),
                Ok(PumpEvent::ContextUsage(p)) => context_pct = Some(p),
                Ok(PumpEvent::Done { tool_calls }) => {
                    if !tool_calls.is_empty() {
                        let calls = indexed_tool_calls(&tool_calls);
                        yield Ok(sse_data(&chunk(
                            &completion_id,
                            created,
                            &ctx.model,
                            json!({ "tool_calls": calls }),
                            None,
                        )));
                    }

                    let finish_reason = if tool_calls.is_empty() { "stop" } else { "tool_calls" };
                    let usage = compute_usage(context_pct, &full_content, &ctx, credits.take());
                    let mut usage_json = json!({
                        "prompt_tokens": usage.prompt,
                        "completion_tokens": usage.completion,
                        "total_tokens": usage.total
                    });
                    if let Some(credits) = usage.credits {
                        usage_json["credits_used"] = credits;
                    }

                    let mut final_chunk =
                        chunk(&completion_id, created, &ctx.model, json!({}), Some(finish_reason));
                    final_chunk["usage"] = usage_json;
                    yield Ok(sse_data(&final_chunk));
                    yield Ok("data: [DONE]\n\n".to_string());
                    return;
                }
            }
        }
    }
}

fn chunk(id: &str, created: i64, model: &str, delta: Value, finish_reason: Option<&str>) -> Value {
    json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": created,
        "model": model,
        "choices": [{
            "index": 0,
            "delta": delta,
            "finish_reason": finish_reason.map(Value::from).unwrap_or(Value::Null)
        }]
    })
}

fn indexed_tool_calls(tool_calls: &[ToolCall]) -> Vec<Value> {
    tool_calls
        .iter()
        .enumerate()
        .map(|(index, call)| {
            json!({
                "index": index,
                "id": call.id,
                "type": "function",
                "function": { "name": call.name, "arguments": call.arguments }
            })
        })
        .collect()
}

/// Non-streaming mode: run the streaming generator to completion and
/// reassemble one chat.completion object.
pub async fn collect<S>(stream: S, model: &str) -> Result<Value, GatewayError>
where
    S: Stream<Item = Result<String, StreamError>>,
{
    futures::pin_mut!(stream);

    let mut full_content = String::new();
    let mut tool_calls: Vec<Value> = Vec::new();
    let mut final_usage: Option<Value> = None;

    while let Some(frame) = stream.next().await {
        let frame = frame.map_err(GatewayError::from)?;
        let Some(data) = frame.strip_prefix("data: ") else {
            continue;
        };
        let data = data.trim();
        if data.is_empty() || data == "[DONE]" {
            continue;
        }
        let Ok(value) = serde_json::from_str::<Value>(data) else {
            continue;
        };
        let delta = value
            .pointer("/choices/0/delta")
            .cloned()
            .unwrap_or(Value::Null);
        if let Some(content) = delta.get("content").and_then(|c| c.as_str()) {
            full_content.push_str(content);
        }
        if let Some(calls) = delta.get("tool_calls").and_then(|c| c.as_array()) {
            tool_calls.extend(calls.iter().cloned());
        }
        if let Some(usage) = value.get("usage") {
            final_usage = Some(usage.clone());
        }
    }

    let mut message = json!({ "role": "assistant", "content": full_content });
    if !tool_calls.is_empty() {
        let cleaned: Vec<Value> = tool_calls
            .iter()
            .map(|tc| {
                let function = tc.get("function").cloned().unwrap_or(Value::Null);
                json!({
                    "id": tc.get("id").and_then(|v| v.as_str()).unwrap_or(""),
                    "type": "function",
                    "function": {
                        "name": function.get("name").and_then(|v| v.as_str()).unwrap_or(""),
                        "arguments": function.get("arguments").and_then(|v| v.as_str()).unwrap_or("{}")
                    }
                })
            })
            .collect();
        message["tool_calls"] = Value::Array(cleaned);
    }

    let finish_reason = if tool_calls.is_empty() { "stop" } else { "tool_calls" };
    let usage = final_usage.unwrap_or_else(
        || json!({ "prompt_tokens": 0, "completion_tokens": 0, "total_tokens": 0 }),
    );

    Ok(json!({
        "id": new_completion_id(),
        "object": "chat.completion",
        "created": chrono::Utc::now().timestamp(),
        "model": model,
        "choices": [{
            "index": 0,
            "message": message,
            "finish_reason": finish_reason
        }],
        "usage": usage
    }))
}
