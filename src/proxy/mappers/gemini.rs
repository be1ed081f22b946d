// Gemini generateContent dialect.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::proxy::common::errors::GatewayError;
use crate::proxy::upstream::utils::new_tool_use_id;

use super::canonical::{
    canonicalize_messages, CanonicalMessage, CanonicalRequest, ContentBlock, MessageContent, Role,
};
use super::tools::normalize_tools;

#[derive(Debug, Clone, Deserialize)]
pub struct GeminiRequest {
    #[serde(default)]
    pub contents: Vec<GeminiContent>,
    #[serde(default, rename = "systemInstruction", alias = "system_instruction")]
    pub system_instruction: Option<Value>,
    #[serde(default)]
    pub tools: Option<Vec<Value>>,
    #[serde(default, rename = "toolConfig")]
    pub tool_config: Option<Value>,
    #[serde(default, rename = "generationConfig", alias = "generation_config")]
    pub generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeminiContent {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerationConfig {
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default, rename = "topP")]
    pub top_p: Option<f64>,
    #[serde(default, rename = "maxOutputTokens")]
    pub max_output_tokens: Option<u32>,
    #[serde(default, rename = "stopSequences")]
    pub stop_sequences: Option<Vec<String>>,
}

/// Convert a Gemini request into the canonical shape. The model name and
/// streaming flag come from the URL path, not the body.
pub fn to_canonical(
    request: &GeminiRequest,
    model: &str,
    stream: bool,
) -> Result<CanonicalRequest, GatewayError> {
    if request.contents.is_empty() {
        return Err(GatewayError::Validation("contents must not be empty".into()));
    }

    let mut raw = Vec::new();

    if let Some(instruction) = &request.system_instruction {
        let text = collect_parts_text(instruction);
        if !text.is_empty() {
            raw.push(CanonicalMessage {
                role: Role::System,
                content: MessageContent::Text(text),
            });
        }
    }

    for content in &request.contents {
        let role = match content.role.as_deref() {
            Some("model") | Some("assistant") => Role::Assistant,
            _ => Role::User,
        };
        raw.push(CanonicalMessage {
            role,
            content: parts_to_content(&content.parts),
        });
    }

    let tool_values = flatten_function_declarations(request.tools.as_deref().unwrap_or_default());
    let tools = normalize_tools(&tool_values);
    let gen = request.generation_config.clone().unwrap_or_default();

    let (system_prompt, messages) = canonicalize_messages(raw);

    Ok(CanonicalRequest {
        model: model.to_string(),
        messages,
        system_prompt,
        tools,
        tool_choice: request.tool_config.clone(),
        stream,
        max_tokens: gen.max_output_tokens,
        temperature: gen.temperature,
        top_p: gen.top_p,
        stop: gen.stop_sequences.unwrap_or_default(),
    })
}

fn parts_to_content(parts: &[Value]) -> MessageContent {
    let mut blocks = Vec::new();
    for part in parts {
        if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
            blocks.push(ContentBlock::Text {
                text: text.to_string(),
            });
        } else if let Some(inline) = part.get("inlineData").or_else(|| part.get("inline_data")) {
            let media_type = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(|m| m.as_str())
                .unwrap_or("image/png")
                .to_string();
            let data = inline
                .get("data")
                .and_then(|d| d.as_str())
                .unwrap_or("")
                .to_string();
            blocks.push(ContentBlock::Image { media_type, data });
        } else if let Some(call) = part.get("functionCall") {
            blocks.push(ContentBlock::ToolUse {
                id: new_tool_use_id(),
                name: call
                    .get("name")
                    .and_then(|n| n.as_str())
                    .unwrap_or("")
                    .to_string(),
                input: call.get("args").cloned().unwrap_or(json!({})),
            });
        } else if let Some(resp) = part.get("functionResponse") {
            // Gemini correlates tool results by function name.
            blocks.push(ContentBlock::ToolResult {
                tool_use_id: resp
                    .get("name")
                    .and_then(|n| n.as_str())
                    .unwrap_or("")
                    .to_string(),
                content: resp.get("response").cloned().unwrap_or(Value::Null),
                is_error: false,
            });
        }
    }
    MessageContent::Blocks(blocks)
}

fn collect_parts_text(value: &Value) -> String {
    if let Some(text) = value.as_str() {
        return text.to_string();
    }
    let mut parts_text = Vec::new();
    if let Some(parts) = value.get("parts").and_then(|p| p.as_array()) {
        for part in parts {
            if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                parts_text.push(text.to_string());
            }
        }
    }
    parts_text.join("\n")
}

/// Gemini nests tool definitions under `tools[].functionDeclarations`.
fn flatten_function_declarations(tools: &[Value]) -> Vec<Value> {
    let mut out = Vec::new();
    for tool in tools {
        if let Some(decls) = tool
            .get("functionDeclarations")
            .or_else(|| tool.get("function_declarations"))
            .and_then(|d| d.as_array())
        {
            out.extend(decls.iter().cloned());
        } else if tool.is_object() {
            out.push(tool.clone());
        }
    }
    out
}
