//! Chat-metadata blocks embedded in message content.
//!
//! Clients may tag a request with a `<CHAT_METADATA>{...}</CHAT_METADATA>`
//! block carrying `chat` (`"Character Name - <timestamp>"`) and
//! `operation` fields. The block is stripped before forwarding and its
//! fields route audit logs into per-chat folders. A malformed block is
//! never fatal; it only loses the folder routing.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

lazy_static! {
    static ref METADATA_RE: Regex =
        Regex::new(r"(?s)<CHAT_METADATA>\s*(\{.*?\})\s*</CHAT_METADATA>").unwrap();
    static ref STRIP_RE: Regex = Regex::new(r"(?s)<CHAT_METADATA>.*?</CHAT_METADATA>\s*").unwrap();
    static ref UNSAFE_CHARS_RE: Regex = Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).unwrap();
    static ref UNDERSCORE_RUN_RE: Regex = Regex::new(r"_+").unwrap();
}

/// Character/chat/operation triple used to organize audit logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatContext {
    pub character: String,
    pub timestamp: String,
    pub operation: String,
}

/// Parse the first metadata block in a message content, if any.
pub fn parse_metadata(content: &str) -> Option<Value> {
    let captures = METADATA_RE.captures(content)?;
    match serde_json::from_str(&captures[1]) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, "failed to parse chat metadata block");
            None
        }
    }
}

/// Remove all metadata blocks from a message content.
pub fn strip_metadata(content: &str) -> String {
    STRIP_RE.replace_all(content, "").trim().to_string()
}

/// Extract the first metadata block across all messages and return the
/// cleaned message list. Messages that were nothing but metadata are
/// dropped entirely.
pub fn extract_from_messages(messages: &[Value]) -> (Option<Value>, Vec<Value>) {
    let mut metadata = None;
    let mut cleaned = Vec::with_capacity(messages.len());

    for message in messages {
        let content = match message.get("content").and_then(|c| c.as_str()) {
            Some(c) if !c.is_empty() => c,
            _ => {
                cleaned.push(message.clone());
                continue;
            }
        };

        if metadata.is_none() {
            metadata = parse_metadata(content);
        }

        let stripped = strip_metadata(content);
        if stripped.is_empty() {
            continue;
        }
        let mut updated = message.clone();
        updated["content"] = Value::String(stripped);
        cleaned.push(updated);
    }

    (metadata, cleaned)
}

/// Split `"Character Name - <timestamp>"` from the end, since the
/// character name itself may contain `" - "`.
pub fn parse_chat_name(chat: &str) -> (String, String) {
    match chat.rfind(" - ") {
        Some(idx) => (chat[..idx].to_string(), chat[idx + 3..].to_string()),
        None => (chat.to_string(), "unknown".to_string()),
    }
}

/// Derive the audit-folder context from request messages, if tagged.
pub fn chat_context(messages: &[Value]) -> Option<ChatContext> {
    let (metadata, _) = extract_from_messages(messages);
    let metadata = metadata?;

    let chat = metadata.get("chat").and_then(|c| c.as_str())?;
    let operation = metadata
        .get("operation")
        .and_then(|o| o.as_str())
        .unwrap_or("chat");

    let (character, timestamp) = parse_chat_name(chat);
    Some(ChatContext {
        character: sanitize_for_filesystem(&character, 100),
        timestamp: sanitize_for_filesystem(&timestamp, 100),
        operation: sanitize_for_filesystem(operation, 100),
    })
}

/// Make a string safe to use as a single path component.
pub fn sanitize_for_filesystem(name: &str, max_length: usize) -> String {
    let replaced = UNSAFE_CHARS_RE.replace_all(name, "_");
    let trimmed = replaced.trim_matches(|c: char| c == ' ' || c == '.');
    let collapsed = UNDERSCORE_RUN_RE.replace_all(trimmed, "_");

    let mut sanitized: String = collapsed.chars().take(max_length).collect();
    while sanitized.ends_with('_') {
        sanitized.pop();
    }

    if sanitized.is_empty() {
        "unknown".to_string()
    } else {
        sanitized
    }
}
