// Canonical request model.
//
// All three client dialects normalize into this shape; the upstream payload
// builder consumes it. After canonicalization no two adjacent messages share
// a role and every tool-role message has been promoted into a synthetic user
// message of tool_result blocks.

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        media_type: String,
        data: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: Value,
        is_error: bool,
    },
    Thinking {
        thinking: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// Plain text view: text and thinking blocks joined with newlines.
    pub fn to_text(&self) -> String {
        match self {
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
                        _ => {}
                    }
                }
                parts.join("\n")
            }
        }
    }

    pub fn into_blocks(self) -> Vec<ContentBlock> {
        match self {
            MessageContent::Text(s) => {
                if s.is_empty() {
                    Vec::new()
                } else {
                    vec![ContentBlock::Text { text: s }]
                }
            }
            MessageContent::Blocks(blocks) => blocks,
        }
    }

    /// Merge another message's content into this one:
    /// string+string newline-joined, array+array concatenated, mixed → array.
    fn merge(&mut self, other: MessageContent) {
        let current = std::mem::replace(self, MessageContent::Text(String::new()));
        *self = match (current, other) {
            (MessageContent::Text(mut a), MessageContent::Text(b)) => {
                if !b.is_empty() {
                    if !a.is_empty() {
                        a.push('\n');
                    }
                    a.push_str(&b);
                }
                MessageContent::Text(a)
            }
            (MessageContent::Blocks(mut a), MessageContent::Blocks(b)) => {
                a.extend(b);
                MessageContent::Blocks(a)
            }
            (text @ MessageContent::Text(_), blocks @ MessageContent::Blocks(_)) => {
                let mut merged = text.into_blocks();
                merged.extend(blocks.into_blocks());
                MessageContent::Blocks(merged)
            }
            (MessageContent::Blocks(mut a), MessageContent::Text(b)) => {
                if !b.is_empty() {
                    a.push(ContentBlock::Text { text: b });
                }
                MessageContent::Blocks(a)
            }
        };
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalMessage {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Clone)]
pub struct CanonicalRequest {
    pub model: String,
    pub messages: Vec<CanonicalMessage>,
    pub system_prompt: String,
    pub tools: Vec<NormalizedTool>,
    pub tool_choice: Option<Value>,
    pub stream: bool,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub stop: Vec<String>,
}

/// Canonicalize a raw message sequence:
/// 1. separate system messages, newline-concatenating their text;
/// 2. promote tool-role messages into synthetic user messages of tool_result
///    blocks, grouping consecutive ones;
/// 3. merge adjacent same-role messages.
pub fn canonicalize_messages(raw: Vec<CanonicalMessage>) -> (String, Vec<CanonicalMessage>) {
    let mut system_parts: Vec<String> = Vec::new();
    let mut rest: Vec<CanonicalMessage> = Vec::new();

    for msg in raw {
        if msg.role == Role::System {
            let text = msg.content.to_text();
            if !text.is_empty() {
                system_parts.push(text);
            }
        } else {
            rest.push(msg);
        }
    }

    let mut promoted: Vec<CanonicalMessage> = Vec::new();
    let mut pending_results: Vec<ContentBlock> = Vec::new();

    for msg in rest {
        if msg.role == Role::Tool {
            pending_results.extend(msg.content.into_blocks());
            continue;
        }
        if !pending_results.is_empty() {
            promoted.push(CanonicalMessage {
                role: Role::User,
                content: MessageContent::Blocks(std::mem::take(&mut pending_results)),
            });
        }
        promoted.push(msg);
    }
    if !pending_results.is_empty() {
        promoted.push(CanonicalMessage {
            role: Role::User,
            content: MessageContent::Blocks(pending_results),
        });
    }

    let mut merged: Vec<CanonicalMessage> = Vec::new();
    for msg in promoted {
        match merged.last_mut() {
            Some(last) if last.role == msg.role => last.content.merge(msg.content),
            _ => merged.push(msg),
        }
    }

    (system_parts.join("\n"), merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text_msg(role: Role, text: &str) -> CanonicalMessage {
        CanonicalMessage {
            role,
            content: MessageContent::Text(text.to_string()),
        }
    }

    fn tool_result_msg(id: &str, content: &str) -> CanonicalMessage {
        CanonicalMessage {
            role: Role::Tool,
            content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
                tool_use_id: id.to_string(),
                content: json!(content),
                is_error: false,
            }]),
        }
    }

    #[test]
    fn test_system_messages_concatenated() {
        let (system, messages) = canonicalize_messages(vec![
            text_msg(Role::System, "You are helpful."),
            text_msg(Role::User, "Hi"),
            text_msg(Role::System, "Be brief."),
        ]);
        assert_eq!(system, "You are helpful.\nBe brief.");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
    }

    #[test]
    fn test_adjacent_same_role_strings_newline_joined() {
        let (_, messages) = canonicalize_messages(vec![
            text_msg(Role::User, "first"),
            text_msg(Role::User, "second"),
        ]);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, MessageContent::Text("first\nsecond".into()));
    }

    #[test]
    fn test_mixed_merge_becomes_blocks() {
        let (_, messages) = canonicalize_messages(vec![
            text_msg(Role::User, "hello"),
            CanonicalMessage {
                role: Role::User,
                content: MessageContent::Blocks(vec![ContentBlock::Image {
                    media_type: "image/png".into(),
                    data: "aGk=".into(),
                }]),
            },
        ]);
        assert_eq!(messages.len(), 1);
        match &messages[0].content {
            MessageContent::Blocks(blocks) => {
                assert_eq!(blocks.len(), 2);
                assert!(matches!(blocks[0], ContentBlock::Text { .. }));
                assert!(matches!(blocks[1], ContentBlock::Image { .. }));
            }
            other => panic!("expected blocks, got {:?}", other),
        }
    }

    #[test]
    fn test_consecutive_tool_messages_grouped() {
        let (_, messages) = canonicalize_messages(vec![
            text_msg(Role::User, "run both tools"),
            text_msg(Role::Assistant, "ok"),
            tool_result_msg("t1", "result one"),
            tool_result_msg("t2", "result two"),
            text_msg(Role::Assistant, "done"),
        ]);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[2].role, Role::User);
        match &messages[2].content {
            MessageContent::Blocks(blocks) => {
                assert_eq!(blocks.len(), 2);
                assert!(blocks
                    .iter()
                    .all(|b| matches!(b, ContentBlock::ToolResult { .. })));
            }
            other => panic!("expected blocks, got {:?}", other),
        }
    }

    #[test]
    fn test_trailing_tool_message_promoted() {
        let (_, messages) = canonicalize_messages(vec![
            text_msg(Role::Assistant, "calling"),
            tool_result_msg("t1", "r"),
        ]);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, Role::User);
    }

    #[test]
    fn test_assistant_tool_use_blocks_concatenate_on_merge() {
        let tool_use = |id: &str| ContentBlock::ToolUse {
            id: id.into(),
            name: "f".into(),
            input: json!({}),
        };
        let (_, messages) = canonicalize_messages(vec![
            CanonicalMessage {
                role: Role::Assistant,
                content: MessageContent::Blocks(vec![tool_use("a")]),
            },
            CanonicalMessage {
                role: Role::Assistant,
                content: MessageContent::Blocks(vec![tool_use("b")]),
            },
        ]);
        assert_eq!(messages.len(), 1);
        match &messages[0].content {
            MessageContent::Blocks(blocks) => assert_eq!(blocks.len(), 2),
            other => panic!("expected blocks, got {:?}", other),
        }
    }

    #[test]
    fn test_to_text_includes_thinking() {
        let content = MessageContent::Blocks(vec![
            ContentBlock::Thinking {
                thinking: "hmm".into(),
            },
            ContentBlock::Text { text: "answer".into() },
        ]);
        assert_eq!(content.to_text(), "hmm\nanswer");
    }

    use proptest::prelude::*;

    fn arb_role() -> impl Strategy<Value = Role> {
        prop_oneof![
            Just(Role::System),
            Just(Role::User),
            Just(Role::Assistant),
            Just(Role::Tool),
        ]
    }

    proptest! {
        /// Property 1: canonicalization leaves no adjacent same-role pairs
        /// and no tool-role messages, whatever the input sequence.
        #[test]
        fn prop_canonical_invariants(
            roles in proptest::collection::vec(arb_role(), 0..20),
            texts in proptest::collection::vec("[a-z ]{1,10}", 0..20),
        ) {
            let raw: Vec<CanonicalMessage> = roles
                .iter()
                .enumerate()
                .map(|(i, role)| {
                    let text = texts.get(i % texts.len().max(1)).cloned().unwrap_or_default();
                    if *role == Role::Tool {
                        CanonicalMessage {
                            role: Role::Tool,
                            content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
                                tool_use_id: format!("t{}", i),
                                content: serde_json::json!(text),
                                is_error: false,
                            }]),
                        }
                    } else {
                        CanonicalMessage {
                            role: *role,
                            content: MessageContent::Text(text),
                        }
                    }
                })
                .collect();

            let (_, messages) = canonicalize_messages(raw);
            for msg in &messages {
                prop_assert_ne!(msg.role, Role::Tool);
                prop_assert_ne!(msg.role, Role::System);
            }
            for pair in messages.windows(2) {
                prop_assert_ne!(pair[0].role, pair[1].role);
            }
        }

        /// Property: canonicalization is idempotent on its own output.
        #[test]
        fn prop_canonicalize_idempotent(
            roles in proptest::collection::vec(arb_role(), 0..12),
        ) {
            let raw: Vec<CanonicalMessage> = roles
                .iter()
                .enumerate()
                .map(|(i, role)| CanonicalMessage {
                    role: if *role == Role::Tool { Role::User } else { *role },
                    content: MessageContent::Text(format!("m{}", i)),
                })
                .collect();
            let (_, once) = canonicalize_messages(raw);
            let (_, twice) = canonicalize_messages(once.clone());
            prop_assert_eq!(once, twice);
        }
    }
}
