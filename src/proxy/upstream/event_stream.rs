// Incremental parser for the upstream response body.
//
// The upstream concatenates JSON event objects between binary framing bytes.
// Parsing is pattern-driven: scan for one of the known object prefixes, then
// brace-match (string- and escape-aware) to extract the complete object.
// Incomplete tails stay buffered for the next feed.

use serde_json::Value;
use tracing::debug;

use super::json_repair::loads_tolerant;
use super::parsers::{
    deduplicate_tool_calls, find_matching_brace, parse_bracket_tool_calls, ToolCall,
};
use super::utils::new_tool_use_id;

/// Events surfaced to the translation pipeline. Tool invocations are
/// reassembled internally and retrieved with [`EventStreamParser::finish`].
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    Content(String),
    Usage(Value),
    ContextUsage(f64),
}

#[derive(Clone, Copy, Debug)]
enum EventKind {
    Content,
    ToolStart,
    ToolInput,
    ToolStop,
    FollowupPrompt,
    Usage,
    ContextUsage,
}

const PATTERNS: &[(&str, EventKind)] = &[
    ("{\"content\":", EventKind::Content),
    ("{\"name\":", EventKind::ToolStart),
    ("{\"input\":", EventKind::ToolInput),
    ("{\"stop\":", EventKind::ToolStop),
    ("{\"followupPrompt\":", EventKind::FollowupPrompt),
    ("{\"usage\":", EventKind::Usage),
    ("{\"contextUsagePercentage\":", EventKind::ContextUsage),
];

#[derive(Default)]
pub struct EventStreamParser {
    buffer: String,
    last_content: Option<String>,
    current_tool: Option<ToolCall>,
    completed: Vec<ToolCall>,
}

impl EventStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and extract every complete recognized event.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<UpstreamEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut events = Vec::new();
        loop {
            let (pos, kind) = match find_next_pattern(&self.buffer) {
                Some(found) => found,
                None => {
                    self.discard_garbage();
                    break;
                }
            };

            if pos > 0 {
                // Binary framing bytes before the object are noise.
                self.buffer.drain(..pos);
            }

            let end = match find_matching_brace(&self.buffer, 0) {
                Some(end) => end,
                None => break, // incomplete object, wait for more bytes
            };

            let json_str: String = self.buffer.drain(..=end).collect();
            match serde_json::from_str::<Value>(&json_str) {
                Ok(val) => {
                    if let Some(event) = self.handle_object(kind, val) {
                        events.push(event);
                    }
                }
                Err(e) => debug!("Dropping malformed upstream event: {}", e),
            }
        }

        events
    }

    fn handle_object(&mut self, kind: EventKind, val: Value) -> Option<UpstreamEvent> {
        match kind {
            EventKind::Content => {
                if val.get("followupPrompt").is_some() {
                    return None;
                }
                let content = val.get("content").and_then(|v| v.as_str()).unwrap_or("");
                if self.last_content.as_deref() == Some(content) {
                    return None;
                }
                self.last_content = Some(content.to_string());
                Some(UpstreamEvent::Content(content.to_string()))
            }
            EventKind::FollowupPrompt => None,
            EventKind::ToolStart => {
                // A new start implicitly finalizes any open invocation.
                self.finalize_current_tool();

                let id = val
                    .get("toolUseId")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())
                    .unwrap_or_else(new_tool_use_id);
                let name = val
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                self.current_tool = Some(ToolCall {
                    id,
                    name,
                    arguments: input_fragment(&val),
                });

                if val.get("stop").and_then(|v| v.as_bool()).unwrap_or(false) {
                    self.finalize_current_tool();
                }
                None
            }
            EventKind::ToolInput => {
                let Some(tool) = self.current_tool.as_mut() else {
                    return None;
                };
                match val.get("input") {
                    Some(Value::String(fragment)) => tool.arguments.push_str(fragment),
                    Some(obj @ Value::Object(_)) => {
                        let mut merged =
                            loads_tolerant(&tool.arguments).unwrap_or_else(|| Value::Object(Default::default()));
                        deep_merge(&mut merged, obj);
                        tool.arguments =
                            serde_json::to_string(&merged).unwrap_or_else(|_| "{}".to_string());
                    }
                    _ => {}
                }
                None
            }
            EventKind::ToolStop => {
                if val.get("stop").and_then(|v| v.as_bool()).unwrap_or(false) {
                    self.finalize_current_tool();
                }
                None
            }
            EventKind::Usage => val.get("usage").cloned().map(UpstreamEvent::Usage),
            EventKind::ContextUsage => val
                .get("contextUsagePercentage")
                .and_then(|v| v.as_f64())
                .map(UpstreamEvent::ContextUsage),
        }
    }

    /// Close the provisional invocation; arguments go through the tolerant
    /// parser and collapse to `"{}"` when unusable.
    fn finalize_current_tool(&mut self) {
        let Some(mut tool) = self.current_tool.take() else {
            return;
        };
        tool.arguments = match loads_tolerant(&tool.arguments) {
            Some(parsed @ Value::Object(_)) => {
                serde_json::to_string(&parsed).unwrap_or_else(|_| "{}".to_string())
            }
            _ => {
                if !tool.arguments.trim().is_empty() {
                    debug!(
                        "Tool '{}' arguments did not parse, defaulting to empty object",
                        tool.name
                    );
                }
                "{}".to_string()
            }
        };
        self.completed.push(tool);
    }

    /// Finalize the stream: close any open invocation, recover bracket-form
    /// calls from the accumulated assistant text, and deduplicate.
    pub fn finish(&mut self, assistant_text: &str) -> Vec<ToolCall> {
        self.finalize_current_tool();
        let mut all = std::mem::take(&mut self.completed);
        all.extend(parse_bracket_tool_calls(assistant_text));
        deduplicate_tool_calls(all)
    }

    /// No recognizable pattern in the buffer: drop everything except a tail
    /// that could still be the beginning of one, so binary noise cannot grow
    /// the buffer without bound.
    fn discard_garbage(&mut self) {
        let keep = longest_partial_pattern_suffix(&self.buffer);
        if keep < self.buffer.len() {
            let start = self.buffer.len() - keep;
            self.buffer.drain(..start);
        }
    }
}

fn find_next_pattern(buffer: &str) -> Option<(usize, EventKind)> {
    let mut earliest: Option<(usize, EventKind)> = None;
    for (pattern, kind) in PATTERNS {
        if let Some(pos) = buffer.find(pattern) {
            if earliest.map(|(p, _)| pos < p).unwrap_or(true) {
                earliest = Some((pos, *kind));
            }
        }
    }
    earliest
}

fn longest_partial_pattern_suffix(buffer: &str) -> usize {
    let mut longest = 0;
    for (pattern, _) in PATTERNS {
        let max = pattern.len().min(buffer.len());
        for len in (1..=max).rev() {
            if buffer.is_char_boundary(buffer.len() - len)
                && buffer[buffer.len() - len..] == pattern[..len]
            {
                longest = longest.max(len);
                break;
            }
        }
    }
    longest
}

/// Initial tool input may arrive inline on the start event, as a string or
/// an object.
fn input_fragment(val: &Value) -> String {
    match val.get("input") {
        Some(Value::String(s)) => s.clone(),
        Some(obj @ Value::Object(_)) | Some(obj @ Value::Array(_)) => {
            serde_json::to_string(obj).unwrap_or_else(|_| "{}".to_string())
        }
        _ => String::new(),
    }
}

fn deep_merge(base: &mut Value, incoming: &Value) {
    match (base, incoming) {
        (Value::Object(base_map), Value::Object(incoming_map)) => {
            for (key, value) in incoming_map {
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base_slot, other) => *base_slot = other.clone(),
    }
}
