// Canonical request → upstream generateAssistantResponse payload.

use serde_json::{json, Value};

use crate::proxy::common::model_mapping::map_model_id;
use crate::proxy::mappers::canonical::{
    CanonicalMessage, CanonicalRequest, ContentBlock, MessageContent, Role,
};
use crate::proxy::mappers::tools::sanitize_json_schema;

const ORIGIN: &str = "AI_EDITOR";

/// One canonical message flattened for payload assembly.
struct Flattened {
    role: Role,
    text: String,
    tool_uses: Vec<Value>,
    tool_results: Vec<Value>,
    images: Vec<Value>,
}

/// Build the upstream payload. `system_prompt` arrives separately because
/// long tool descriptions may have been appended to it after normalization.
pub fn build_upstream_payload(
    request: &CanonicalRequest,
    system_prompt: &str,
    conversation_id: &str,
    profile_arn: Option<&str>,
) -> Value {
    let model_id = map_model_id(&request.model);

    let mut flattened: Vec<Flattened> = request.messages.iter().map(flatten_message).collect();
    if flattened.is_empty() {
        return minimal_payload(&model_id, conversation_id, profile_arn);
    }

    // System prompt rides the first user history entry, or the current
    // message when there is no history.
    let has_history = flattened.len() > 1;
    if !system_prompt.is_empty() && has_history {
        if let Some(first) = flattened.first_mut() {
            if first.role == Role::User {
                first.text = prepend(system_prompt, &first.text);
            }
        }
    }

    let mut current = flattened.pop().unwrap();
    let history_items = flattened;

    let mut history: Vec<Value> = history_items.iter().map(history_entry).collect();

    let mut current_content = current.text.clone();
    if !system_prompt.is_empty() && history.is_empty() {
        current_content = prepend(system_prompt, &current_content);
    }

    // A trailing assistant turn moves into history; the upstream always
    // receives a user message as the current one.
    if current.role == Role::Assistant {
        let mut assistant_msg = json!({
            "content": non_empty(&current_content)
        });
        if !current.tool_uses.is_empty() {
            assistant_msg["toolUses"] = json!(current.tool_uses);
        }
        history.push(json!({ "assistantResponseMessage": assistant_msg }));
        current_content = "Continue".to_string();
        current.tool_results.clear();
        current.images.clear();
    }

    if current_content.is_empty() {
        current_content = "Continue".to_string();
    }

    let mut user_input_message = json!({
        "content": current_content,
        "modelId": model_id,
        "origin": ORIGIN
    });

    if !current.images.is_empty() {
        user_input_message["images"] = json!(current.images);
    }

    let mut context = serde_json::Map::new();
    let tool_specs = tool_specifications(request);
    if !tool_specs.is_empty() {
        context.insert("tools".to_string(), json!(tool_specs));
    }
    if !current.tool_results.is_empty() {
        context.insert("toolResults".to_string(), json!(current.tool_results));
    }
    if !context.is_empty() {
        user_input_message["userInputMessageContext"] = Value::Object(context);
    }

    let mut conversation_state = json!({
        "chatTriggerType": "MANUAL",
        "conversationId": conversation_id,
        "currentMessage": { "userInputMessage": user_input_message }
    });

    if !history.is_empty() {
        conversation_state["history"] = json!(history);
    }

    let mut payload = json!({ "conversationState": conversation_state });
    if let Some(arn) = profile_arn {
        if !arn.is_empty() {
            payload["profileArn"] = json!(arn);
        }
    }

    payload
}

fn minimal_payload(model_id: &str, conversation_id: &str, profile_arn: Option<&str>) -> Value {
    let mut payload = json!({
        "conversationState": {
            "chatTriggerType": "MANUAL",
            "conversationId": conversation_id,
            "currentMessage": {
                "userInputMessage": {
                    "content": "Continue",
                    "modelId": model_id,
                    "origin": ORIGIN
                }
            }
        }
    });
    if let Some(arn) = profile_arn {
        if !arn.is_empty() {
            payload["profileArn"] = json!(arn);
        }
    }
    payload
}

fn flatten_message(msg: &CanonicalMessage) -> Flattened {
    Flattened {
        role: msg.role,
        text: extract_text(&msg.content),
        tool_uses: extract_tool_uses(&msg.content),
        tool_results: extract_tool_results(&msg.content),
        images: extract_images(&msg.content),
    }
}

fn history_entry(item: &Flattened) -> Value {
    if item.role == Role::Assistant {
        let mut msg = json!({ "content": non_empty(&item.text) });
        if !item.tool_uses.is_empty() {
            msg["toolUses"] = json!(item.tool_uses);
        }
        json!({ "assistantResponseMessage": msg })
    } else {
        let mut msg = json!({ "content": non_empty(&item.text) });
        if !item.images.is_empty() {
            msg["images"] = json!(item.images);
        }
        if !item.tool_results.is_empty() {
            msg["userInputMessageContext"] = json!({ "toolResults": item.tool_results });
        }
        json!({ "userInputMessage": msg })
    }
}

fn non_empty(text: &str) -> String {
    if text.is_empty() {
        "(empty)".to_string()
    } else {
        text.to_string()
    }
}

fn prepend(system: &str, content: &str) -> String {
    if content.is_empty() {
        system.to_string()
    } else {
        format!("{}\n\n{}", system, content)
    }
}

/// Plain text view including an inline marker for images, so history keeps a
/// trace of multimodal turns.
fn extract_text(content: &MessageContent) -> String {
    match content {
        MessageContent::Text(s) => s.clone(),
        MessageContent::Blocks(blocks) => {
            let mut parts = Vec::new();
            for block in blocks {
                match block {
                    ContentBlock::Text { text } => {
                        if !text.is_empty() {
                            parts.push(text.clone());
                        }
                    }
                    ContentBlock::Thinking { thinking } => {
                        if !thinking.is_empty() {
                            parts.push(thinking.clone());
                        }
                    }
                    ContentBlock::Image { media_type, .. } => {
                        parts.push(format!("[Image: {}]", media_type));
                    }
                    _ => {}
                }
            }
            parts.join("\n")
        }
    }
}

/// Upstream image records: `{"format": <subtype>, "source": {"bytes": …}}`.
fn extract_images(content: &MessageContent) -> Vec<Value> {
    let MessageContent::Blocks(blocks) = content else {
        return Vec::new();
    };
    blocks
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Image { media_type, data } => {
                let format = media_type.split('/').next_back().unwrap_or(media_type);
                Some(json!({
                    "format": format,
                    "source": { "bytes": data }
                }))
            }
            _ => None,
        })
        .collect()
}

fn extract_tool_uses(content: &MessageContent) -> Vec<Value> {
    let MessageContent::Blocks(blocks) = content else {
        return Vec::new();
    };
    blocks
        .iter()
        .filter_map(|block| match block {
            ContentBlock::ToolUse { id, name, input } => Some(json!({
                "toolUseId": id,
                "name": name,
                "input": input
            })),
            _ => None,
        })
        .collect()
}

fn extract_tool_results(content: &MessageContent) -> Vec<Value> {
    let MessageContent::Blocks(blocks) = content else {
        return Vec::new();
    };
    blocks
        .iter()
        .filter_map(|block| match block {
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                let text = match content {
                    Value::String(s) => s.clone(),
                    Value::Array(arr) => arr
                        .iter()
                        .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
                        .collect::<Vec<_>>()
                        .join("\n"),
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                let status = if *is_error { "error" } else { "success" };
                Some(json!({
                    "toolUseId": tool_use_id,
                    "content": [{"text": if text.is_empty() { "(empty result)".to_string() } else { text }}],
                    "status": status
                }))
            }
            _ => None,
        })
        .collect()
}

fn tool_specifications(request: &CanonicalRequest) -> Vec<Value> {
    request
        .tools
        .iter()
        .map(|tool| {
            let description = if tool.description.trim().is_empty() {
                format!("Tool: {}", tool.name)
            } else {
                tool.description.clone()
            };
            json!({
                "toolSpecification": {
                    "name": tool.name,
                    "description": description,
                    "inputSchema": { "json": sanitize_json_schema(&tool.input_schema) }
                }
            })
        })
        .collect()
}
