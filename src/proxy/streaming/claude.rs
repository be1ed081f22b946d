// Upstream events → Anthropic named-event SSE frames.
//
// Frame order: message_start, content_block_start/delta/stop for text,
// one block triplet per finalized tool call, message_delta with the stop
// reason, message_stop.

use async_stream::stream;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};

use crate::proxy::common::errors::GatewayError;
use crate::proxy::upstream::json_repair::loads_tolerant;
use crate::proxy::upstream::utils::new_message_id;

use super::{compute_usage, sse_event, upstream_events, PumpEvent, StreamContext, StreamError};

pub fn stream_to_anthropic(
    response: reqwest::Response,
    ctx: StreamContext,
) -> impl Stream<Item = Result<String, StreamError>> {
    stream! {
        let message_id = new_message_id();
        let mut started = false;
        let mut in_text_block = false;
        let mut content_index = 0usize;
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
                    if !started {
                        yield Ok(message_start(&message_id, &ctx));
                        started = true;
                    }
                    if !in_text_block {
                        yield Ok(sse_event("content_block_start", &json!({
                            "type": "content_block_start",
                            "index": content_index,
                            "content_block": {"type": "text", "text": ""}
                        })));
                        in_text_block = true;
                    }
                    full_content.push_str(&content);
                    yield Ok(sse_event("content_block_delta", &json!({
                        "type": "content_block_delta",
                        "index": content_index,
                        "delta": {"type": "text_delta", "text": content}
                    })));
                }
                Ok(PumpEvent::Usage(v)) => credits = Some(v),
                Ok(PumpEvent::ContextUsage(p)) => context_pct = Some(p),
                Ok(PumpEvent::Done { tool_calls }) => {
                    if !started {
                        yield Ok(message_start(&message_id, &ctx));
                        started = true;
                    }
                    if in_text_block {
                        yield Ok(sse_event("content_block_stop", &json!({
                            "type": "content_block_stop",
                            "index": content_index
                        })));
                        content_index += 1;
                        in_text_block = false;
                    }

                    let has_tool_calls = !tool_calls.is_empty();
                    for call in &tool_calls {
                        yield Ok(sse_event("content_block_start", &json!({
                            "type": "content_block_start",
                            "index": content_index,
                            "content_block": {
                                "type": "tool_use",
                                "id": call.id,
                                "name": call.name,
                                "input": {}
                            }
                        })));
                        if !call.arguments.trim().is_empty() && call.arguments != "{}" {
                            yield Ok(sse_event("content_block_delta", &json!({
                                "type": "content_block_delta",
                                "index": content_index,
                                "delta": {
                                    "type": "input_json_delta",
                                    "partial_json": call.arguments
                                }
                            })));
                        }
                        yield Ok(sse_event("content_block_stop", &json!({
                            "type": "content_block_stop",
                            "index": content_index
                        })));
                        content_index += 1;
                    }

                    let stop_reason = if has_tool_calls { "tool_use" } else { "end_turn" };
                    let usage = compute_usage(context_pct, &full_content, &ctx, credits.take());
                    let mut usage_json = json!({ "output_tokens": usage.completion });
                    if let Some(credits) = usage.credits {
                        usage_json["credits_used"] = credits;
                    }

                    yield Ok(sse_event("message_delta", &json!({
                        "type": "message_delta",
                        "delta": {"stop_reason": stop_reason, "stop_sequence": null},
                        "usage": usage_json
                    })));
                    yield Ok(sse_event("message_stop", &json!({"type": "message_stop"})));
                    return;
                }
            }
        }
    }
}

fn message_start(message_id: &str, ctx: &StreamContext) -> String {
    sse_event(
        "message_start",
        &json!({
            "type": "message_start",
            "message": {
                "id": message_id,
                "type": "message",
                "role": "assistant",
                "content": [],
                "model": ctx.model,
                "stop_reason": null,
                "stop_sequence": null,
                "usage": {
                    "input_tokens": ctx.prompt_estimate,
                    "output_tokens": 0
                }
            }
        }),
    )
}

/// Non-streaming mode: replay the generator's frames into one Anthropic
/// message object.
pub async fn collect<S>(stream: S, model: &str) -> Result<Value, GatewayError>
where
    S: Stream<Item = Result<String, StreamError>>,
{
    futures::pin_mut!(stream);

    let mut message_id = new_message_id();
    let mut text = String::new();
    let mut tool_blocks: Vec<Value> = Vec::new();
    let mut current_tool: Option<(String, String, String)> = None; // id, name, partial json
    let mut stop_reason = "end_turn".to_string();
    let mut input_tokens = 0u64;
    let mut output_tokens = 0u64;

    while let Some(frame) = stream.next().await {
        let frame = frame.map_err(GatewayError::from)?;
        let Some(data_line) = frame.lines().find(|l| l.starts_with("data: ")) else {
            continue;
        };
        let Ok(value) = serde_json::from_str::<Value>(&data_line["data: ".len()..]) else {
            continue;
        };

        match value.get("type").and_then(|t| t.as_str()) {
            Some("message_start") => {
                if let Some(id) = value.pointer("/message/id").and_then(|v| v.as_str()) {
                    message_id = id.to_string();
                }
                input_tokens = value
                    .pointer("/message/usage/input_tokens")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0);
            }
            Some("content_block_start") => {
                let block = value.get("content_block").cloned().unwrap_or(Value::Null);
                if block.get("type").and_then(|t| t.as_str()) == Some("tool_use") {
                    current_tool = Some((
                        block.get("id").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                        block.get("name").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                        String::new(),
                    ));
                }
            }
            Some("content_block_delta") => match value.pointer("/delta/type").and_then(|t| t.as_str()) {
                Some("text_delta") => {
                    if let Some(t) = value.pointer("/delta/text").and_then(|v| v.as_str()) {
                        text.push_str(t);
                    }
                }
                Some("input_json_delta") => {
                    if let Some((_, _, ref mut partial)) = current_tool {
                        if let Some(p) =
                            value.pointer("/delta/partial_json").and_then(|v| v.as_str())
                        {
                            partial.push_str(p);
                        }
                    }
                }
                _ => {}
            },
            Some("content_block_stop") => {
                if let Some((id, name, partial)) = current_tool.take() {
                    let input = loads_tolerant(&partial).unwrap_or(json!({}));
                    tool_blocks.push(json!({
                        "type": "tool_use",
                        "id": id,
                        "name": name,
                        "input": input
                    }));
                }
            }
            Some("message_delta") => {
                if let Some(reason) = value.pointer("/delta/stop_reason").and_then(|v| v.as_str()) {
                    stop_reason = reason.to_string();
                }
                if let Some(out) = value.pointer("/usage/output_tokens").and_then(|v| v.as_u64()) {
                    output_tokens = out;
                }
            }
            _ => {}
        }
    }

    let mut content = Vec::new();
    if !text.is_empty() {
        content.push(json!({"type": "text", "text": text}));
    }
    content.extend(tool_blocks);

    Ok(json!({
        "id": message_id,
        "type": "message",
        "role": "assistant",
        "model": model,
        "content": content,
        "stop_reason": stop_reason,
        "stop_sequence": null,
        "usage": {
            "input_tokens": input_tokens,
            "output_tokens": output_tokens
        }
    }))
}
