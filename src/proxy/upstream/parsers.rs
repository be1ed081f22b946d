// Tool-call recovery helpers: brace matching, bracket-form extraction from
// plain text, and deduplication.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

use super::utils::new_tool_use_id;

/// A finalized upstream tool invocation. `arguments` is always the string
/// encoding of a JSON object (possibly `"{}"`).
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// How far past the `args:` marker the JSON object may start for
/// bracket-form recovery to accept it. An offset of exactly this many
/// characters is still accepted; one more is skipped.
const BRACKET_JSON_LOOKAHEAD: usize = 10;

static BRACKET_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\[Called\s+(\w+)\s+with\s+args:").unwrap());

/// Find closing `}` for opening `{` at `start`, handling strings and escapes.
/// Returns `None` if no matching brace found.
pub fn find_matching_brace(text: &str, start: usize) -> Option<usize> {
    if start >= text.len() || text.as_bytes()[start] != b'{' {
        return None;
    }

    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text[start..].char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + i);
                }
            }
            _ => {}
        }
    }

    None
}

/// Recover `[Called <name> with args: {…}]` tool calls embedded in assistant
/// text. The opening `{` must appear within a small lookahead of the marker
/// and the matching `}` must be immediately followed by `]`.
pub fn parse_bracket_tool_calls(text: &str) -> Vec<ToolCall> {
    if text.is_empty() || !text.to_lowercase().contains("[called") {
        return Vec::new();
    }

    let mut results = Vec::new();

    for caps in BRACKET_PATTERN.captures_iter(text) {
        let func_name = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        let match_end = caps.get(0).map(|m| m.end()).unwrap_or(0);

        // Inclusive window: a `{` at offset 0..=LOOKAHEAD past the colon.
        let mut window_end = (match_end + BRACKET_JSON_LOOKAHEAD + 1).min(text.len());
        while !text.is_char_boundary(window_end) {
            window_end -= 1;
        }
        let json_start = match text[match_end..window_end].find('{') {
            Some(offset) => match_end + offset,
            None => continue,
        };

        let json_end = match find_matching_brace(text, json_start) {
            Some(pos) => pos,
            None => continue,
        };

        // The recovered object must be the bracket's payload.
        if !text[json_end + 1..].starts_with(']') {
            continue;
        }

        let json_str = &text[json_start..=json_end];
        match serde_json::from_str::<Value>(json_str) {
            Ok(args) if args.is_object() => {
                results.push(ToolCall {
                    id: new_tool_use_id(),
                    name: func_name.to_string(),
                    arguments: serde_json::to_string(&args)
                        .unwrap_or_else(|_| "{}".to_string()),
                });
            }
            _ => continue,
        }
    }

    results
}

/// Deduplicate recovered tool calls.
///
/// First group by id, keeping the entry whose arguments JSON is longer
/// (`"{}"` counts as the minimum); then drop exact `(name, arguments)`
/// duplicates. First-seen order is preserved.
pub fn deduplicate_tool_calls(calls: Vec<ToolCall>) -> Vec<ToolCall> {
    let mut by_id: HashMap<String, usize> = HashMap::new();
    let mut kept: Vec<ToolCall> = Vec::new();

    for call in calls {
        match by_id.get(&call.id) {
            Some(&idx) => {
                let existing = &kept[idx];
                let richer = call.arguments != "{}"
                    && (existing.arguments == "{}"
                        || call.arguments.len() > existing.arguments.len());
                if richer {
                    kept[idx] = call;
                }
            }
            None => {
                by_id.insert(call.id.clone(), kept.len());
                kept.push(call);
            }
        }
    }

    let mut seen = HashSet::new();
    kept.into_iter()
        .filter(|call| seen.insert(format!("{}-{}", call.name, call.arguments)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str, name: &str, args: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments: args.to_string(),
        }
    }

    // --- find_matching_brace ---

    #[test]
    fn test_find_matching_brace_simple() {
        assert_eq!(find_matching_brace(r#"{"a": 1}"#, 0), Some(7));
    }

    #[test]
    fn test_find_matching_brace_nested() {
        assert_eq!(find_matching_brace(r#"{"a": {"b": 1}}"#, 0), Some(14));
    }

    #[test]
    fn test_find_matching_brace_with_string_braces() {
        assert_eq!(find_matching_brace(r#"{"a": "{}"}"#, 0), Some(10));
    }

    #[test]
    fn test_find_matching_brace_incomplete() {
        assert_eq!(find_matching_brace(r#"{"a": 1"#, 0), None);
    }

    #[test]
    fn test_find_matching_brace_not_brace() {
        assert_eq!(find_matching_brace("hello", 0), None);
    }

    // --- parse_bracket_tool_calls ---

    #[test]
    fn test_parse_single_tool_call() {
        let text = r#"[Called get_weather with args: {"city": "London"}]"#;
        let calls = parse_bracket_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "get_weather");
        assert!(calls[0].arguments.contains("London"));
        assert!(calls[0].id.starts_with("toolu_"));
    }

    #[test]
    fn test_parse_multiple_tool_calls() {
        let text = r#"Some text [Called foo with args: {"a": 1}] middle [Called bar with args: {"b": 2}] end"#;
        let calls = parse_bracket_tool_calls(text);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "foo");
        assert_eq!(calls[1].name, "bar");
        assert_ne!(calls[0].id, calls[1].id);
    }

    #[test]
    fn test_parse_no_tool_calls() {
        assert!(parse_bracket_tool_calls("").is_empty());
        assert!(parse_bracket_tool_calls("just some regular text").is_empty());
    }

    /// Build a bracket-form call with `gap` characters between the colon
    /// of `args:` and the opening brace. The regex stops at the colon, so
    /// `gap` is exactly the offset the lookahead window measures.
    fn bracket_with_gap(gap: usize) -> String {
        format!(r#"[Called f with args:{}{{"a": 1}}]"#, " ".repeat(gap))
    }

    #[test]
    fn test_json_start_inside_lookahead_accepted() {
        assert_eq!(parse_bracket_tool_calls(&bracket_with_gap(3)).len(), 1);
    }

    #[test]
    fn test_json_start_at_lookahead_boundary_accepted() {
        // Exactly 10 characters past the colon is still within the window.
        assert_eq!(parse_bracket_tool_calls(&bracket_with_gap(10)).len(), 1);
    }

    #[test]
    fn test_json_start_past_lookahead_boundary_skipped() {
        // 11 characters past the colon is one too far.
        assert!(parse_bracket_tool_calls(&bracket_with_gap(11)).is_empty());
        assert!(parse_bracket_tool_calls(&bracket_with_gap(12)).is_empty());
    }

    #[test]
    fn test_missing_closing_bracket_skipped() {
        let text = r#"[Called f with args: {"a": 1} and more text"#;
        assert!(parse_bracket_tool_calls(text).is_empty());
    }

    #[test]
    fn test_invalid_json_skipped() {
        let text = r#"[Called bad with args: {not valid}] [Called good with args: {"ok": true}]"#;
        let calls = parse_bracket_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "good");
    }

    // --- deduplicate_tool_calls ---

    #[test]
    fn test_dedup_same_id_keeps_longer_arguments() {
        let calls = vec![
            call("t1", "f", "{}"),
            call("t1", "f", r#"{"a":1,"b":2}"#),
        ];
        let deduped = deduplicate_tool_calls(calls);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].arguments, r#"{"a":1,"b":2}"#);
    }

    #[test]
    fn test_dedup_empty_object_is_minimum() {
        let calls = vec![
            call("t1", "f", r#"{"a":1}"#),
            call("t1", "f", "{}"),
        ];
        let deduped = deduplicate_tool_calls(calls);
        assert_eq!(deduped[0].arguments, r#"{"a":1}"#);
    }

    #[test]
    fn test_dedup_by_name_and_arguments() {
        let calls = vec![
            call("t1", "f", r#"{"a":1}"#),
            call("t2", "f", r#"{"a":1}"#),
            call("t3", "g", r#"{"a":1}"#),
        ];
        let deduped = deduplicate_tool_calls(calls);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].id, "t1");
        assert_eq!(deduped[1].id, "t3");
    }

    #[test]
    fn test_dedup_preserves_order() {
        let calls = vec![
            call("c", "c", "{}"),
            call("a", "a", "{}"),
            call("b", "b", "{}"),
            call("a2", "a", "{}"),
        ];
        let deduped = deduplicate_tool_calls(calls);
        let names: Vec<&str> = deduped.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    use proptest::prelude::*;

    proptest! {
        /// Property 8: bracket parsing extracts the right name and a JSON
        /// object for the arguments.
        #[test]
        fn prop_bracket_tool_call_parsing(
            name in "[a-zA-Z][a-zA-Z0-9_]{0,20}",
            key in "[a-zA-Z]{1,10}",
            val in "[a-zA-Z0-9 ]{0,30}",
        ) {
            let input = format!(r#"[Called {} with args: {{"{}": "{}"}}]"#, name, key, val);
            let calls = parse_bracket_tool_calls(&input);
            prop_assert_eq!(calls.len(), 1);
            prop_assert_eq!(&calls[0].name, &name);
            let args: Value = serde_json::from_str(&calls[0].arguments).unwrap();
            prop_assert_eq!(args[&key].as_str().unwrap(), val.as_str());
        }

        /// Property 9: dedup idempotency — f(f(x)) == f(x).
        #[test]
        fn prop_dedup_idempotency(
            ids in proptest::collection::vec("[a-c]", 0..12),
        ) {
            let calls: Vec<ToolCall> = ids
                .iter()
                .map(|id| call(id, "fn", "{}"))
                .collect();
            let once = deduplicate_tool_calls(calls);
            let twice = deduplicate_tool_calls(once.clone());
            prop_assert_eq!(once, twice);
        }
    }
}
