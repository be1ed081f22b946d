// Identifier minting for gateway-issued objects.

use rand::Rng;
use sha2::{Digest, Sha256};

use crate::proxy::mappers::canonical::CanonicalMessage;

/// Random alphanumeric tail appended to every id prefix.
const ID_SUFFIX_LEN: usize = 24;

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(ID_SUFFIX_LEN)
        .map(char::from)
        .collect()
}

/// Tool-use id in the Anthropic wire convention.
pub fn new_tool_use_id() -> String {
    format!("toolu_{}", random_suffix())
}

/// Message id in the Anthropic wire convention.
pub fn new_message_id() -> String {
    format!("msg_{}", random_suffix())
}

/// Completion id in the OpenAI wire convention.
pub fn new_completion_id() -> String {
    format!("chatcmpl-{}", random_suffix())
}

/// Deterministic conversation id: a UUID-shaped rendering of a SHA-256
/// digest over every canonical turn's role and text.
///
/// Retrying the same canonical conversation therefore reuses the same
/// upstream conversation id, while any change to any turn produces a new
/// one. Empty conversations fall back to a random UUID.
pub fn conversation_id(messages: &[CanonicalMessage]) -> String {
    if messages.is_empty() {
        return uuid::Uuid::new_v4().to_string();
    }

    let mut hasher = Sha256::new();
    for msg in messages {
        let text = msg.content.to_text();
        hasher.update(msg.role.as_str().as_bytes());
        // Length prefix keeps (role, text) pairs unambiguous.
        hasher.update((text.len() as u64).to_le_bytes());
        hasher.update(text.as_bytes());
    }
    let digest = hasher.finalize();

    let hex: String = digest.iter().take(16).map(|b| format!("{:02x}", b)).collect();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..]
    )
}
