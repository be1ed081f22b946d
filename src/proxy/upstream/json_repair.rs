// Tolerant JSON parsing for upstream fragments.
//
// Repairs are attempted in order, each on top of the previous; the first
// candidate that parses wins:
//   1. verbatim
//   2. trailing commas stripped
//   3. unquoted keys and bare identifier values quoted (true/false/null kept)
//   4. dangling `\` or incomplete `\uXXXX` escape truncated at the tail
//   5. raw control characters replaced with their \uXXXX escapes

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static TRAILING_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r",\s*([}\]])").unwrap());
static UNQUOTED_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([{,]\s*)([A-Za-z_][A-Za-z0-9_]*)\s*:").unwrap());
static UNQUOTED_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r":\s*([A-Za-z_][A-Za-z0-9_]*)\s*([,}\]])").unwrap());

pub fn loads_tolerant(input: &str) -> Option<Value> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(v) = serde_json::from_str(trimmed) {
        return Some(v);
    }

    let mut candidate = strip_trailing_commas(trimmed);
    if let Ok(v) = serde_json::from_str(&candidate) {
        return Some(v);
    }

    candidate = quote_unquoted(&candidate);
    if let Ok(v) = serde_json::from_str(&candidate) {
        return Some(v);
    }

    candidate = truncate_dangling_escape(&candidate);
    if let Ok(v) = serde_json::from_str(&candidate) {
        return Some(v);
    }

    candidate = escape_control_chars(&candidate);
    serde_json::from_str(&candidate).ok()
}

fn strip_trailing_commas(input: &str) -> String {
    TRAILING_COMMA.replace_all(input, "$1").to_string()
}

fn quote_unquoted(input: &str) -> String {
    let keyed = UNQUOTED_KEY.replace_all(input, "$1\"$2\":").to_string();
    UNQUOTED_VALUE
        .replace_all(&keyed, |caps: &regex::Captures| {
            let word = &caps[1];
            if matches!(word, "true" | "false" | "null") {
                caps[0].to_string()
            } else {
                format!(": \"{}\"{}", word, &caps[2])
            }
        })
        .to_string()
}

/// Cut an incomplete escape sequence off the end of the buffer: a bare `\`
/// or a `\u` with fewer than four hex digits.
fn truncate_dangling_escape(input: &str) -> String {
    let bytes = input.as_bytes();

    // Count trailing backslashes; an odd count means the last one is dangling.
    let mut trailing = 0;
    for &b in bytes.iter().rev() {
        if b == b'\\' {
            trailing += 1;
        } else {
            break;
        }
    }
    if trailing % 2 == 1 {
        return input[..input.len() - 1].to_string();
    }

    // Incomplete \uXXXX at the tail.
    for short in 0..4usize {
        let suffix_len = 2 + short; // "\u" + 0..3 hex digits
        if bytes.len() < suffix_len {
            continue;
        }
        let tail = &input[input.len() - suffix_len..];
        if tail.starts_with("\\u") && tail[2..].chars().all(|c| c.is_ascii_hexdigit()) {
            // Preceding backslashes must leave this escape active.
            let before = &input[..input.len() - suffix_len];
            let mut backslashes = 0;
            for &b in before.as_bytes().iter().rev() {
                if b == b'\\' {
                    backslashes += 1;
                } else {
                    break;
                }
            }
            if backslashes % 2 == 0 {
                return before.to_string();
            }
        }
    }

    input.to_string()
}

fn escape_control_chars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        if (ch as u32) < 0x20 {
            out.push_str(&format!("\\u{:04x}", ch as u32));
        } else {
            out.push(ch);
        }
    }
    out
}
