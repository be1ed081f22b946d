// Anthropic /v1/messages dialect.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::proxy::common::errors::GatewayError;

use super::canonical::{
    canonicalize_messages, CanonicalMessage, CanonicalRequest, ContentBlock, MessageContent, Role,
};
use super::tools::normalize_tools;
use super::{anthropic_stop_to_openai, image_block_from_value};

#[derive(Debug, Clone, Deserialize)]
pub struct ClaudeRequest {
    pub model: String,
    pub messages: Vec<ClaudeMessage>,
    #[serde(default)]
    pub system: Option<SystemPrompt>,
    #[serde(default)]
    pub tools: Option<Vec<Value>>,
    #[serde(default)]
    pub tool_choice: Option<Value>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub stop_sequences: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    String(String),
    Array(Vec<SystemBlock>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClaudeMessage {
    pub role: String,
    pub content: Value,
}

pub fn to_canonical(request: &ClaudeRequest) -> Result<CanonicalRequest, GatewayError> {
    if request.messages.is_empty() {
        return Err(GatewayError::Validation("messages must not be empty".into()));
    }

    let mut raw = Vec::new();

    if let Some(system) = &request.system {
        let text = match system {
            SystemPrompt::String(s) => s.clone(),
            SystemPrompt::Array(blocks) => blocks
                .iter()
                .map(|b| b.text.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        };
        if !text.is_empty() {
            raw.push(CanonicalMessage {
                role: Role::System,
                content: MessageContent::Text(text),
            });
        }
    }

    for msg in &request.messages {
        let role = match msg.role.as_str() {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            other => {
                return Err(GatewayError::Validation(format!(
                    "unsupported message role: {}",
                    other
                )))
            }
        };
        raw.push(CanonicalMessage {
            role,
            content: content_to_canonical(&msg.content),
        });
    }

    let (system_prompt, messages) = canonicalize_messages(raw);
    let tools = normalize_tools(request.tools.as_deref().unwrap_or_default());

    Ok(CanonicalRequest {
        model: request.model.clone(),
        messages,
        system_prompt,
        tools,
        tool_choice: request.tool_choice.clone(),
        stream: request.stream,
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        top_p: request.top_p,
        stop: request.stop_sequences.clone().unwrap_or_default(),
    })
}

fn content_to_canonical(content: &Value) -> MessageContent {
    match content {
        Value::String(s) => MessageContent::Text(s.clone()),
        Value::Array(items) => {
            let mut blocks = Vec::new();
            for item in items {
                match item.get("type").and_then(|t| t.as_str()) {
                    Some("text") => {
                        if let Some(text) = item.get("text").and_then(|t| t.as_str()) {
                            blocks.push(ContentBlock::Text {
                                text: text.to_string(),
                            });
                        }
                    }
                    Some("thinking") => {
                        if let Some(thinking) = item.get("thinking").and_then(|t| t.as_str()) {
                            blocks.push(ContentBlock::Thinking {
                                thinking: thinking.to_string(),
                            });
                        }
                    }
                    Some("image") | Some("image_url") => {
                        if let Some(block) = image_block_from_value(item) {
                            blocks.push(block);
                        }
                    }
                    Some("tool_use") => {
                        blocks.push(ContentBlock::ToolUse {
                            id: item
                                .get("id")
                                .and_then(|v| v.as_str())
                                .unwrap_or("")
                                .to_string(),
                            name: item
                                .get("name")
                                .and_then(|v| v.as_str())
                                .unwrap_or("")
                                .to_string(),
                            input: item.get("input").cloned().unwrap_or(json!({})),
                        });
                    }
                    Some("tool_result") => {
                        blocks.push(ContentBlock::ToolResult {
                            tool_use_id: item
                                .get("tool_use_id")
                                .and_then(|v| v.as_str())
                                .unwrap_or("")
                                .to_string(),
                            content: item.get("content").cloned().unwrap_or(Value::Null),
                            is_error: item
                                .get("is_error")
                                .and_then(|v| v.as_bool())
                                .unwrap_or(false),
                        });
                    }
                    _ => {}
                }
            }
            MessageContent::Blocks(blocks)
        }
        _ => MessageContent::Text(String::new()),
    }
}

/// Reshape a finished Anthropic message into an OpenAI chat completion.
/// Inverse of `openai::response_to_anthropic`.
pub fn response_to_openai(response: &Value) -> Value {
    let empty = Vec::new();
    let content = response
        .get("content")
        .and_then(|c| c.as_array())
        .unwrap_or(&empty);

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in content {
        match block.get("type").and_then(|t| t.as_str()) {
            Some("text") => {
                if let Some(t) = block.get("text").and_then(|t| t.as_str()) {
                    text.push_str(t);
                }
            }
            Some("tool_use") => {
                let input = block.get("input").cloned().unwrap_or(json!({}));
                tool_calls.push(json!({
                    "id": block.get("id").and_then(|i| i.as_str()).unwrap_or(""),
                    "type": "function",
                    "function": {
                        "name": block.get("name").and_then(|n| n.as_str()).unwrap_or(""),
                        "arguments": serde_json::to_string(&input).unwrap_or_else(|_| "{}".into())
                    }
                }));
            }
            _ => {}
        }
    }

    let stop_reason = response
        .get("stop_reason")
        .and_then(|s| s.as_str())
        .unwrap_or("end_turn");
    let usage = response.get("usage").cloned().unwrap_or(Value::Null);

    let mut message = json!({"role": "assistant", "content": text});
    if !tool_calls.is_empty() {
        message["tool_calls"] = Value::Array(tool_calls);
    }

    let prompt = usage.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
    let completion = usage
        .get("output_tokens")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);

    json!({
        "id": response.get("id").and_then(|i| i.as_str()).unwrap_or(""),
        "object": "chat.completion",
        "model": response.get("model").and_then(|m| m.as_str()).unwrap_or(""),
        "choices": [{
            "index": 0,
            "message": message,
            "finish_reason": anthropic_stop_to_openai(stop_reason)
        }],
        "usage": {
            "prompt_tokens": prompt,
            "completion_tokens": completion,
            "total_tokens": prompt + completion
        }
    })
}
