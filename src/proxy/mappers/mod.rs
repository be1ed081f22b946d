// Protocol converters: dialect requests → canonical, plus cross-dialect
// response shaping.

pub mod canonical;
pub mod claude;
pub mod gemini;
pub mod openai;
pub mod tools;

use serde_json::Value;
use tracing::warn;

use canonical::ContentBlock;

/// Split a `data:<media type>;base64,<payload>` URI.
pub fn parse_data_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let comma = rest.find(',')?;
    let header = &rest[..comma];
    let data = &rest[comma + 1..];
    if !header.ends_with(";base64") {
        return None;
    }
    let media_type = header.trim_end_matches(";base64");
    if media_type.is_empty() {
        return None;
    }
    Some((media_type.to_string(), data.to_string()))
}

/// Recognize either inbound image encoding and produce a canonical image
/// block. HTTP(S) image URLs are logged and skipped.
pub fn image_block_from_value(value: &Value) -> Option<ContentBlock> {
    match value.get("type").and_then(|t| t.as_str()) {
        Some("image") => {
            let source = value.get("source")?;
            if source.get("type").and_then(|t| t.as_str()) != Some("base64") {
                return None;
            }
            let media_type = source.get("media_type")?.as_str()?.to_string();
            let data = source.get("data")?.as_str()?.to_string();
            Some(ContentBlock::Image { media_type, data })
        }
        Some("image_url") => {
            let url = value.get("image_url")?.get("url")?.as_str()?;
            if url.starts_with("http://") || url.starts_with("https://") {
                warn!("Skipping remote image URL (only base64 data URIs are supported)");
                return None;
            }
            let (media_type, data) = parse_data_url(url)?;
            Some(ContentBlock::Image { media_type, data })
        }
        _ => None,
    }
}

/// OpenAI finish_reason → Anthropic stop_reason.
pub fn openai_finish_to_anthropic(finish: &str) -> &'static str {
    match finish {
        "tool_calls" => "tool_use",
        "length" => "max_tokens",
        _ => "end_turn",
    }
}

/// Anthropic stop_reason → OpenAI finish_reason.
pub fn anthropic_stop_to_openai(stop: &str) -> &'static str {
    match stop {
        "tool_use" => "tool_calls",
        "max_tokens" => "length",
        _ => "stop",
    }
}

/// Gemini finishReason → OpenAI finish_reason.
pub fn gemini_finish_to_openai(finish: &str) -> &'static str {
    match finish {
        "MAX_TOKENS" => "length",
        "SAFETY" => "content_filter",
        _ => "stop",
    }
}

/// OpenAI finish_reason → Gemini finishReason.
pub fn openai_finish_to_gemini(finish: &str) -> &'static str {
    match finish {
        "length" => "MAX_TOKENS",
        "content_filter" => "SAFETY",
        _ => "STOP",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_data_url() {
        let (media, data) = parse_data_url("data:image/png;base64,aGVsbG8=").unwrap();
        assert_eq!(media, "image/png");
        assert_eq!(data, "aGVsbG8=");
    }

    #[test]
    fn test_parse_data_url_rejects_non_base64() {
        assert!(parse_data_url("data:text/plain,hello").is_none());
        assert!(parse_data_url("https://example.com/x.png").is_none());
    }

    #[test]
    fn test_image_block_anthropic_encoding() {
        let block = image_block_from_value(&json!({
            "type": "image",
            "source": {"type": "base64", "media_type": "image/jpeg", "data": "YWJj"}
        }))
        .unwrap();
        assert_eq!(
            block,
            ContentBlock::Image {
                media_type: "image/jpeg".into(),
                data: "YWJj".into()
            }
        );
    }

    #[test]
    fn test_image_block_openai_encoding() {
        let block = image_block_from_value(&json!({
            "type": "image_url",
            "image_url": {"url": "data:image/webp;base64,ZGVm"}
        }))
        .unwrap();
        assert_eq!(
            block,
            ContentBlock::Image {
                media_type: "image/webp".into(),
                data: "ZGVm".into()
            }
        );
    }

    #[test]
    fn test_remote_image_url_skipped() {
        let block = image_block_from_value(&json!({
            "type": "image_url",
            "image_url": {"url": "https://example.com/cat.png"}
        }));
        assert!(block.is_none());
    }

    #[test]
    fn test_stop_reason_tables_round_trip() {
        for finish in ["stop", "tool_calls", "length"] {
            let anthropic = openai_finish_to_anthropic(finish);
            assert_eq!(anthropic_stop_to_openai(anthropic), finish);
        }
        // stop_sequence folds into "stop" on the way back
        assert_eq!(anthropic_stop_to_openai("stop_sequence"), "stop");
        assert_eq!(gemini_finish_to_openai("MAX_TOKENS"), "length");
        assert_eq!(openai_finish_to_gemini("length"), "MAX_TOKENS");
        assert_eq!(openai_finish_to_gemini("stop"), "STOP");
    }
}
