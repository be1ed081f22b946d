// OpenAI /chat/completions dialect.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::proxy::common::errors::GatewayError;
use crate::proxy::upstream::json_repair::loads_tolerant;
use crate::proxy::upstream::utils::new_tool_use_id;

use super::canonical::{
    canonicalize_messages, CanonicalMessage, CanonicalRequest, ContentBlock, MessageContent, Role,
};
use super::tools::normalize_tools;
use super::{image_block_from_value, openai_finish_to_anthropic};

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiRequest {
    pub model: String,
    pub messages: Vec<OpenAiMessage>,
    #[serde(default)]
    pub tools: Option<Vec<Value>>,
    #[serde(default)]
    pub tool_choice: Option<Value>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub max_completion_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub stop: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<Value>,
    #[serde(default)]
    pub tool_calls: Option<Vec<Value>>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
}

pub fn to_canonical(request: &OpenAiRequest) -> Result<CanonicalRequest, GatewayError> {
    if request.messages.is_empty() {
        return Err(GatewayError::Validation("messages must not be empty".into()));
    }

    let mut raw = Vec::new();
    for msg in &request.messages {
        let role = match msg.role.as_str() {
            "system" | "developer" => Role::System,
            "user" => Role::User,
            "assistant" => Role::Assistant,
            "tool" => Role::Tool,
            other => {
                return Err(GatewayError::Validation(format!(
                    "unsupported message role: {}",
                    other
                )))
            }
        };

        let content = match role {
            Role::Tool => {
                let text = value_to_text(msg.content.as_ref());
                MessageContent::Blocks(vec![ContentBlock::ToolResult {
                    tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                    content: json!(if text.is_empty() {
                        "(empty result)".to_string()
                    } else {
                        text
                    }),
                    is_error: false,
                }])
            }
            Role::Assistant => {
                let mut blocks = Vec::new();
                let text = value_to_text(msg.content.as_ref());
                if !text.is_empty() {
                    blocks.push(ContentBlock::Text { text });
                }
                if let Some(tool_calls) = &msg.tool_calls {
                    for call in tool_calls {
                        blocks.push(tool_call_to_block(call));
                    }
                }
                MessageContent::Blocks(blocks)
            }
            _ => content_value_to_blocks(msg.content.as_ref()),
        };

        raw.push(CanonicalMessage { role, content });
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
        max_tokens: request.max_tokens.or(request.max_completion_tokens),
        temperature: request.temperature,
        top_p: request.top_p,
        stop: stop_values(request.stop.as_ref()),
    })
}

/// An assistant `tool_calls` entry → canonical tool_use block. Arguments go
/// through the tolerant parser; unparseable arguments become `{}`.
fn tool_call_to_block(call: &Value) -> ContentBlock {
    let function = call.get("function").cloned().unwrap_or(Value::Null);
    let name = function
        .get("name")
        .and_then(|n| n.as_str())
        .unwrap_or("")
        .to_string();
    let id = call
        .get("id")
        .and_then(|i| i.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(new_tool_use_id);
    let input = function
        .get("arguments")
        .and_then(|a| a.as_str())
        .and_then(loads_tolerant)
        .unwrap_or(json!({}));
    ContentBlock::ToolUse { id, name, input }
}

fn value_to_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => {
            let mut parts = Vec::new();
            for item in items {
                if item.get("type").and_then(|t| t.as_str()) == Some("text") {
                    if let Some(text) = item.get("text").and_then(|t| t.as_str()) {
                        parts.push(text.to_string());
                    }
                }
            }
            parts.join("\n")
        }
        _ => String::new(),
    }
}

fn content_value_to_blocks(content: Option<&Value>) -> MessageContent {
    match content {
        Some(Value::String(s)) => MessageContent::Text(s.clone()),
        Some(Value::Array(items)) => {
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
                    Some("image") | Some("image_url") => {
                        if let Some(block) = image_block_from_value(item) {
                            blocks.push(block);
                        }
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

fn stop_values(stop: Option<&Value>) -> Vec<String> {
    match stop {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect(),
        _ => Vec::new(),
    }
}

/// Reshape a finished OpenAI chat completion into an Anthropic message
/// response. Text, tool calls, finish reason, and usage survive.
pub fn response_to_anthropic(response: &Value) -> Value {
    let message = response
        .pointer("/choices/0/message")
        .cloned()
        .unwrap_or(Value::Null);

    let mut content = Vec::new();
    if let Some(text) = message.get("content").and_then(|c| c.as_str()) {
        if !text.is_empty() {
            content.push(json!({"type": "text", "text": text}));
        }
    }
    if let Some(tool_calls) = message.get("tool_calls").and_then(|t| t.as_array()) {
        for call in tool_calls {
            let function = call.get("function").cloned().unwrap_or(Value::Null);
            let input = function
                .get("arguments")
                .and_then(|a| a.as_str())
                .and_then(loads_tolerant)
                .unwrap_or(json!({}));
            content.push(json!({
                "type": "tool_use",
                "id": call.get("id").and_then(|i| i.as_str()).unwrap_or(""),
                "name": function.get("name").and_then(|n| n.as_str()).unwrap_or(""),
                "input": input
            }));
        }
    }

    let finish = response
        .pointer("/choices/0/finish_reason")
        .and_then(|f| f.as_str())
        .unwrap_or("stop");
    let usage = response.get("usage").cloned().unwrap_or(Value::Null);

    json!({
        "id": response.get("id").and_then(|i| i.as_str()).unwrap_or(""),
        "type": "message",
        "role": "assistant",
        "model": response.get("model").and_then(|m| m.as_str()).unwrap_or(""),
        "content": content,
        "stop_reason": openai_finish_to_anthropic(finish),
        "stop_sequence": null,
        "usage": {
            "input_tokens": usage.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
            "output_tokens": usage.get("completion_tokens").and_then(|v| v.as_u64()).unwrap_or(0)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_request(messages: Vec<Value>) -> OpenAiRequest {
        serde_json::from_value(json!({
            "model": "claude-sonnet-4-5",
            "messages": messages,
        }))
        .unwrap()
    }

    #[test]
    fn test_simple_chat_to_canonical() {
        let req = simple_request(vec![
            json!({"role": "system", "content": "be terse"}),
            json!({"role": "user", "content": "Hi"}),
        ]);
        let canonical = to_canonical(&req).unwrap();
        assert_eq!(canonical.system_prompt, "be terse");
        assert_eq!(canonical.messages.len(), 1);
        assert_eq!(canonical.messages[0].role, Role::User);
        assert_eq!(canonical.messages[0].content.to_text(), "Hi");
    }

    #[test]
    fn test_empty_messages_rejected() {
        let req = simple_request(vec![]);
        assert!(matches!(
            to_canonical(&req),
            Err(GatewayError::Validation(_))
        ));
    }

    #[test]
    fn test_tool_role_promoted() {
        let req = simple_request(vec![
            json!({"role": "user", "content": "weather?"}),
            json!({"role": "assistant", "content": null, "tool_calls": [
                {"id": "t1", "type": "function",
                 "function": {"name": "get_weather", "arguments": "{\"city\":\"NYC\"}"}}
            ]}),
            json!({"role": "tool", "tool_call_id": "t1", "content": "sunny"}),
        ]);
        let canonical = to_canonical(&req).unwrap();
        assert_eq!(canonical.messages.len(), 3);
        assert_eq!(canonical.messages[2].role, Role::User);
        match &canonical.messages[2].content {
            MessageContent::Blocks(blocks) => {
                assert!(matches!(
                    &blocks[0],
                    ContentBlock::ToolResult { tool_use_id, .. } if tool_use_id == "t1"
                ));
            }
            other => panic!("expected blocks, got {:?}", other),
        }
    }

    #[test]
    fn test_assistant_tool_call_arguments_parsed() {
        let req = simple_request(vec![
            json!({"role": "user", "content": "x"}),
            json!({"role": "assistant", "content": "calling", "tool_calls": [
                {"id": "c1", "function": {"name": "f", "arguments": "{\"a\": 1}"}}
            ]}),
        ]);
        let canonical = to_canonical(&req).unwrap();
        match &canonical.messages[1].content {
            MessageContent::Blocks(blocks) => match &blocks[1] {
                ContentBlock::ToolUse { id, name, input } => {
                    assert_eq!(id, "c1");
                    assert_eq!(name, "f");
                    assert_eq!(input["a"], 1);
                }
                other => panic!("expected tool_use, got {:?}", other),
            },
            other => panic!("expected blocks, got {:?}", other),
        }
    }

    #[test]
    fn test_garbled_tool_arguments_fall_back_to_empty_object() {
        let req = simple_request(vec![
            json!({"role": "user", "content": "x"}),
            json!({"role": "assistant", "tool_calls": [
                {"id": "c1", "function": {"name": "f", "arguments": "<<<not json"}}
            ]}),
        ]);
        let canonical = to_canonical(&req).unwrap();
        match &canonical.messages[1].content {
            MessageContent::Blocks(blocks) => match &blocks[0] {
                ContentBlock::ToolUse { input, .. } => assert_eq!(input, &json!({})),
                other => panic!("expected tool_use, got {:?}", other),
            },
            other => panic!("expected blocks, got {:?}", other),
        }
    }

    #[test]
    fn test_image_parts() {
        let req = simple_request(vec![json!({"role": "user", "content": [
            {"type": "text", "text": "what is this"},
            {"type": "image_url", "image_url": {"url": "data:image/png;base64,aWc="}},
            {"type": "image_url", "image_url": {"url": "https://example.com/skip.png"}},
        ]})]);
        let canonical = to_canonical(&req).unwrap();
        match &canonical.messages[0].content {
            MessageContent::Blocks(blocks) => {
                assert_eq!(blocks.len(), 2);
                assert!(matches!(blocks[1], ContentBlock::Image { .. }));
            }
            other => panic!("expected blocks, got {:?}", other),
        }
    }

    #[test]
    fn test_stop_values() {
        assert_eq!(stop_values(Some(&json!("END"))), vec!["END".to_string()]);
        assert_eq!(
            stop_values(Some(&json!(["a", "b"]))),
            vec!["a".to_string(), "b".to_string()]
        );
        assert!(stop_values(None).is_empty());
    }

    #[test]
    fn test_max_completion_tokens_fallback() {
        let req: OpenAiRequest = serde_json::from_value(json!({
            "model": "m",
            "messages": [{"role": "user", "content": "x"}],
            "max_completion_tokens": 256,
        }))
        .unwrap();
        let canonical = to_canonical(&req).unwrap();
        assert_eq!(canonical.max_tokens, Some(256));
    }

    #[test]
    fn test_response_to_anthropic_shape() {
        let openai = json!({
            "id": "chatcmpl-1",
            "model": "claude-sonnet-4-5",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "hello",
                    "tool_calls": [{
                        "id": "t9",
                        "type": "function",
                        "function": {"name": "f", "arguments": "{\"k\":\"v\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        });
        let anthropic = response_to_anthropic(&openai);
        assert_eq!(anthropic["stop_reason"], "tool_use");
        assert_eq!(anthropic["content"][0]["type"], "text");
        assert_eq!(anthropic["content"][1]["type"], "tool_use");
        assert_eq!(anthropic["content"][1]["input"]["k"], "v");
        assert_eq!(anthropic["usage"]["input_tokens"], 10);
    }
}
