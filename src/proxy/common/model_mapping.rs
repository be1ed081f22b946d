// Model catalog and external-id → upstream-id mapping.

use serde::Serialize;

/// Model metadata for the /v1/models listing.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
}

/// Prefix-matched mapping table, checked in declared order.
/// Unknown external names pass through unchanged.
const MODEL_MAPPING: &[(&str, &str)] = &[
    ("claude-opus-4-5", "claude-opus-4.5"),
    ("claude-sonnet-4-5", "CLAUDE_SONNET_4_5_20250929_V1_0"),
    ("claude-sonnet-4", "CLAUDE_SONNET_4_20250514_V1_0"),
    ("claude-haiku-4-5", "claude-haiku-4.5"),
    ("claude-3-7-sonnet-20250219", "CLAUDE_3_7_SONNET_20250219_V1_0"),
    ("auto", "claude-sonnet-4.5"),
];

/// Models that legitimately take much longer to produce tokens; their
/// timeouts get multiplied. Substring match also covers dated aliases.
const SLOW_MODELS: &[&str] = &["claude-opus-4-5", "claude-3-opus"];

/// External model ids advertised by /v1/models.
const CATALOG: &[(&str, &str)] = &[
    ("claude-opus-4-5", "Claude Opus 4.5"),
    ("claude-sonnet-4-5", "Claude Sonnet 4.5"),
    ("claude-sonnet-4", "Claude Sonnet 4"),
    ("claude-haiku-4-5", "Claude Haiku 4.5"),
    ("claude-3-7-sonnet-20250219", "Claude 3.7 Sonnet"),
    ("auto", "Auto"),
];

/// Map an external model id to the upstream internal id.
pub fn map_model_id(external: &str) -> String {
    let lower = external.to_lowercase();
    for (prefix, internal) in MODEL_MAPPING {
        if *prefix == "auto" {
            if lower == "auto" {
                return internal.to_string();
            }
        } else if lower.starts_with(prefix) {
            return internal.to_string();
        }
    }
    external.to_string()
}

pub fn is_slow_model(model: &str) -> bool {
    let lower = model.to_lowercase();
    SLOW_MODELS.iter().any(|slow| lower.contains(slow))
}

pub fn list_models() -> Vec<ModelInfo> {
    CATALOG
        .iter()
        .map(|(id, name)| ModelInfo {
            id: id.to_string(),
            name: name.to_string(),
        })
        .collect()
}
