// Tool schema normalization.
//
// Clients send tool definitions in several shapes; everything is projected
// onto {name, description, input_schema} by shape discrimination.

use serde_json::{json, Value};
use tracing::debug;

use super::canonical::NormalizedTool;

/// Recognize one inbound tool definition. Accepted shapes:
/// 1. `{type:"function", function:{name, description, parameters}}`
/// 2. `{toolSpecification:{name, description, inputSchema:{json}}}`
/// 3. `{name, description, input_schema|schema}`
/// 4. `{name, description, parameters}`
/// 5. `{id, parameters, description?}`
/// 6. `{id, schema, description?}`
/// 7. `{name, description?}` — empty-object schema
pub fn normalize_tool(value: &Value) -> Option<NormalizedTool> {
    let obj = value.as_object()?;

    if let Some(function) = obj.get("function").filter(|f| f.is_object()) {
        let name = function.get("name")?.as_str()?.to_string();
        return Some(NormalizedTool {
            name,
            description: text_field(function.as_object().unwrap(), "description"),
            input_schema: function.get("parameters").cloned().unwrap_or(json!({})),
        });
    }

    if let Some(spec) = obj.get("toolSpecification").filter(|s| s.is_object()) {
        let name = spec.get("name")?.as_str()?.to_string();
        let schema = spec
            .get("inputSchema")
            .and_then(|s| s.get("json"))
            .cloned()
            .unwrap_or(json!({}));
        return Some(NormalizedTool {
            name,
            description: text_field(spec.as_object().unwrap(), "description"),
            input_schema: schema,
        });
    }

    let name = obj
        .get("name")
        .or_else(|| obj.get("id"))
        .and_then(|v| v.as_str())?
        .to_string();
    let schema = obj
        .get("input_schema")
        .or_else(|| obj.get("schema"))
        .or_else(|| obj.get("parameters"))
        .cloned()
        .unwrap_or(json!({}));

    Some(NormalizedTool {
        name,
        description: text_field(obj, "description"),
        input_schema: schema,
    })
}

fn text_field(obj: &serde_json::Map<String, Value>, key: &str) -> String {
    obj.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

/// Normalize a batch of tool definitions, dropping server-side web search
/// tools and anything unrecognizable.
pub fn normalize_tools(values: &[Value]) -> Vec<NormalizedTool> {
    let mut out = Vec::new();
    for value in values {
        let Some(tool) = normalize_tool(value) else {
            debug!("Skipping unrecognizable tool definition");
            continue;
        };
        let lower = tool.name.to_lowercase();
        if lower == "web_search" || lower == "websearch" {
            continue;
        }
        out.push(tool);
    }
    out
}

/// Replace over-long tool descriptions with a cross-reference marker and
/// collect the full text into a system-prompt documentation section.
/// `max_length == 0` disables the extraction.
pub fn extract_long_descriptions(
    tools: Vec<NormalizedTool>,
    max_length: usize,
) -> (Vec<NormalizedTool>, String) {
    if max_length == 0 {
        return (tools, String::new());
    }

    let mut processed = Vec::new();
    let mut docs = Vec::new();

    for tool in tools {
        if tool.description.len() <= max_length {
            processed.push(tool);
        } else {
            docs.push(format!("## Tool: {}\n\n{}", tool.name, tool.description));
            processed.push(NormalizedTool {
                description: format!(
                    "[Full documentation in system prompt under '## Tool: {}']",
                    tool.name
                ),
                ..tool
            });
        }
    }

    let documentation = if docs.is_empty() {
        String::new()
    } else {
        format!(
            "\n\n---\n# Tool Documentation\nThe following tools have detailed documentation that couldn't fit in the tool definition.\n\n{}",
            docs.join("\n\n---\n\n")
        )
    };

    (processed, documentation)
}

/// Strip schema constructs the upstream rejects: `additionalProperties`
/// everywhere and empty `required` arrays, recursively.
pub fn sanitize_json_schema(schema: &Value) -> Value {
    let Value::Object(map) = schema else {
        return schema.clone();
    };
    let mut result = serde_json::Map::new();
    for (key, value) in map {
        if key == "additionalProperties" {
            continue;
        }
        if key == "required" && value.as_array().map(|v| v.is_empty()).unwrap_or(false) {
            continue;
        }
        let cleaned = match value {
            Value::Object(_) => sanitize_json_schema(value),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| {
                        if item.is_object() {
                            sanitize_json_schema(item)
                        } else {
                            item.clone()
                        }
                    })
                    .collect(),
            ),
            other => other.clone(),
        };
        result.insert(key.clone(), cleaned);
    }
    Value::Object(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_openai_function() {
        let tool = normalize_tool(&json!({
            "type": "function",
            "function": {
                "name": "get_weather",
                "description": "Look up weather",
                "parameters": {"type": "object", "properties": {"city": {"type": "string"}}}
            }
        }))
        .unwrap();
        assert_eq!(tool.name, "get_weather");
        assert_eq!(tool.description, "Look up weather");
        assert_eq!(tool.input_schema["type"], "object");
    }

    #[test]
    fn test_shape_tool_specification() {
        let tool = normalize_tool(&json!({
            "toolSpecification": {
                "name": "native",
                "description": "upstream shape",
                "inputSchema": {"json": {"type": "object"}}
            }
        }))
        .unwrap();
        assert_eq!(tool.name, "native");
        assert_eq!(tool.input_schema["type"], "object");
    }

    #[test]
    fn test_shape_input_schema_and_schema() {
        let a = normalize_tool(&json!({"name": "a", "description": "d", "input_schema": {"x": 1}}))
            .unwrap();
        assert_eq!(a.input_schema["x"], 1);
        let b = normalize_tool(&json!({"name": "b", "description": "d", "schema": {"y": 2}})).unwrap();
        assert_eq!(b.input_schema["y"], 2);
    }

    #[test]
    fn test_shape_parameters() {
        let tool =
            normalize_tool(&json!({"name": "p", "description": "d", "parameters": {"z": 3}})).unwrap();
        assert_eq!(tool.input_schema["z"], 3);
    }

    #[test]
    fn test_shape_id_variants() {
        let a = normalize_tool(&json!({"id": "by_id", "parameters": {"k": 1}})).unwrap();
        assert_eq!(a.name, "by_id");
        assert_eq!(a.input_schema["k"], 1);
        let b = normalize_tool(&json!({"id": "by_id2", "schema": {"k": 2}, "description": "d"}))
            .unwrap();
        assert_eq!(b.name, "by_id2");
        assert_eq!(b.description, "d");
    }

    #[test]
    fn test_shape_name_only_defaults_empty_schema() {
        let tool = normalize_tool(&json!({"name": "bare"})).unwrap();
        assert_eq!(tool.name, "bare");
        assert_eq!(tool.description, "");
        assert_eq!(tool.input_schema, json!({}));
    }

    #[test]
    fn test_unrecognizable_rejected() {
        assert!(normalize_tool(&json!({"description": "no name"})).is_none());
        assert!(normalize_tool(&json!("just a string")).is_none());
    }

    #[test]
    fn test_web_search_dropped() {
        let tools = normalize_tools(&[
            json!({"name": "web_search", "description": "x"}),
            json!({"name": "WebSearch", "description": "x"}),
            json!({"name": "keep_me", "description": "x"}),
        ]);
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "keep_me");
    }

    #[test]
    fn test_long_description_at_threshold_unchanged() {
        let tool = NormalizedTool {
            name: "t".into(),
            description: "a".repeat(100),
            input_schema: json!({}),
        };
        let (processed, docs) = extract_long_descriptions(vec![tool.clone()], 100);
        assert_eq!(processed[0], tool);
        assert!(docs.is_empty());
    }

    #[test]
    fn test_long_description_extracted() {
        let tool = NormalizedTool {
            name: "big".into(),
            description: "a".repeat(101),
            input_schema: json!({}),
        };
        let (processed, docs) = extract_long_descriptions(vec![tool], 100);
        assert_eq!(
            processed[0].description,
            "[Full documentation in system prompt under '## Tool: big']"
        );
        assert!(docs.contains("# Tool Documentation"));
        assert!(docs.contains("## Tool: big"));
        assert!(docs.contains(&"a".repeat(101)));
    }

    #[test]
    fn test_zero_threshold_disables_extraction() {
        let tool = NormalizedTool {
            name: "big".into(),
            description: "a".repeat(50_000),
            input_schema: json!({}),
        };
        let (processed, docs) = extract_long_descriptions(vec![tool.clone()], 0);
        assert_eq!(processed[0], tool);
        assert!(docs.is_empty());
    }

    #[test]
    fn test_sanitize_schema_strips_additional_properties() {
        let schema = json!({
            "type": "object",
            "additionalProperties": false,
            "required": [],
            "properties": {
                "nested": {"type": "object", "additionalProperties": true, "required": ["x"]}
            }
        });
        let clean = sanitize_json_schema(&schema);
        assert!(clean.get("additionalProperties").is_none());
        assert!(clean.get("required").is_none());
        assert!(clean["properties"]["nested"].get("additionalProperties").is_none());
        assert_eq!(clean["properties"]["nested"]["required"], json!(["x"]));
    }

    use proptest::prelude::*;

    proptest! {
        /// Property 3: tool normalization is idempotent — normalizing a
        /// serialized normalized tool yields the same tool.
        #[test]
        fn prop_normalization_idempotent(
            name in "[a-zA-Z][a-zA-Z0-9_]{0,20}",
            desc in "[a-zA-Z0-9 ]{0,40}",
            key in "[a-z]{1,8}",
        ) {
            let first = normalize_tool(&json!({
                "name": name,
                "description": desc,
                "parameters": {"type": "object", "properties": {key: {"type": "string"}}}
            })).unwrap();

            let reserialized = json!({
                "name": first.name,
                "description": first.description,
                "input_schema": first.input_schema,
            });
            let second = normalize_tool(&reserialized).unwrap();
            prop_assert_eq!(first, second);
        }
    }
}
