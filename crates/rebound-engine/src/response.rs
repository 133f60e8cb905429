//! Raw upstream responses and their schema-tolerant decoded forms.
//!
//! Upstream bodies arrive as arbitrary text. Decoding never fails: a body
//! is a completion-shaped JSON value, an error-shaped JSON value, or kept
//! as raw text. Unexpected shapes degrade, they do not raise.

use serde_json::Value;

/// What the upstream actually sent back: declared status plus body text.
///
/// The client layer never raises on non-2xx; interpreting the status is
/// the engine's job.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Interesting fields of an error-shaped body, extracted tolerantly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorDetail {
    pub error_type: Option<String>,
    pub code: Option<String>,
    pub message: Option<String>,
}

/// A decoded upstream body.
#[derive(Debug, Clone)]
pub enum ResponseBody {
    /// Parsed JSON without a top-level `error` object (includes
    /// chat-completion bodies and models lists).
    Completion(Value),
    /// Parsed JSON carrying a top-level `error` object.
    Error { value: Value, detail: ErrorDetail },
    /// Body text that is not valid JSON.
    Unparseable { raw: String },
}

impl ResponseBody {
    /// Decode a body. Never fails; malformed JSON becomes `Unparseable`.
    pub fn decode(raw: &str) -> Self {
        let value: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(_) => {
                return Self::Unparseable {
                    raw: raw.to_string(),
                }
            }
        };

        if value.get("error").is_some() {
            let detail = extract_error_detail(&value);
            Self::Error { value, detail }
        } else {
            Self::Completion(value)
        }
    }

    /// The parsed JSON value, when there is one.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Completion(v) => Some(v),
            Self::Error { value, .. } => Some(value),
            Self::Unparseable { .. } => None,
        }
    }

    /// Take ownership of the parsed JSON value, when there is one.
    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Completion(v) => Some(v),
            Self::Error { value, .. } => Some(value),
            Self::Unparseable { .. } => None,
        }
    }
}

fn extract_error_detail(value: &Value) -> ErrorDetail {
    let error = &value["error"];
    match error {
        // `"error": "something went wrong"` shorthand used by some upstreams
        Value::String(s) => ErrorDetail {
            message: Some(s.clone()),
            ..Default::default()
        },
        Value::Object(map) => ErrorDetail {
            error_type: map.get("type").and_then(|v| v.as_str()).map(String::from),
            code: map.get("code").and_then(|v| v.as_str()).map(String::from),
            message: map
                .get("message")
                .and_then(|v| v.as_str())
                .map(String::from),
        },
        _ => ErrorDetail::default(),
    }
}

/// Parse an error body for relay to the caller, wrapping non-JSON text
/// (e.g. an HTML error page) so the caller always receives JSON.
pub fn relay_body(status: u16, raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(v) => v,
        Err(_) => serde_json::json!({
            "error": {
                "message": format!("HTTP {} error", status),
                "type": "non_json_error",
                "response_text": truncate(raw, 1000),
            }
        }),
    }
}

/// Bounded excerpt of a body for error payloads and logs.
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_completion_body() {
        let body = ResponseBody::decode(r#"{"object":"chat.completion","choices":[]}"#);
        assert!(matches!(body, ResponseBody::Completion(_)));
    }

    #[test]
    fn test_decode_error_object() {
        let raw = r#"{"error":{"type":"rate_limit_error","code":"too_many_requests","message":"Too many requests"}}"#;
        match ResponseBody::decode(raw) {
            ResponseBody::Error { detail, .. } => {
                assert_eq!(detail.error_type.as_deref(), Some("rate_limit_error"));
                assert_eq!(detail.code.as_deref(), Some("too_many_requests"));
                assert_eq!(detail.message.as_deref(), Some("Too many requests"));
            }
            other => panic!("expected error body, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_error_string_shorthand() {
        match ResponseBody::decode(r#"{"error":"upstream exploded"}"#) {
            ResponseBody::Error { detail, .. } => {
                assert_eq!(detail.message.as_deref(), Some("upstream exploded"));
                assert_eq!(detail.error_type, None);
            }
            other => panic!("expected error body, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_garbage_is_unparseable() {
        let body = ResponseBody::decode("<html>502 Bad Gateway</html>");
        assert!(matches!(body, ResponseBody::Unparseable { .. }));
    }

    #[test]
    fn test_relay_body_wraps_non_json() {
        let v = relay_body(502, "<html>Bad Gateway</html>");
        assert_eq!(v["error"]["type"], "non_json_error");
        assert_eq!(v["error"]["message"], "HTTP 502 error");
    }

    #[test]
    fn test_relay_body_passes_json_through() {
        let v = relay_body(400, r#"{"error":{"message":"bad request"}}"#);
        assert_eq!(v["error"]["message"], "bad request");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "é".repeat(2000);
        let out = truncate(&text, 1000);
        assert_eq!(out.chars().count(), 1000);
    }
}
