//! Blank and refusal detection for otherwise-successful completions.
//!
//! Some upstreams return HTTP 200 with a syntactically valid completion
//! whose content is empty, a canned refusal, or truncated to nothing.
//! Those responses should be retried exactly like a 429, up to a small
//! sub-budget owned by the retry engine.

use crate::response::truncate;
use serde_json::Value;

/// Why a completion was judged blank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlankReason {
    EmptyContent,
    PatternMatch,
    MaxTokensLowOutput,
}

impl BlankReason {
    /// Human-readable label used in audit notes.
    pub fn label(&self) -> &'static str {
        match self {
            Self::EmptyContent => "empty content",
            Self::PatternMatch => "content matched refusal pattern",
            Self::MaxTokensLowOutput => "early stop with minimal output",
        }
    }
}

/// Details of a blank verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlankDetection {
    pub reason: BlankReason,
    pub matched_pattern: Option<String>,
    pub content_preview: Option<String>,
}

/// Detects blank/refused/truncated completion content.
#[derive(Debug, Clone)]
pub struct BlankDetector {
    refusal_prefixes: Vec<String>,
}

/// Completions that stopped on MAX_TOKENS with fewer tokens than this are
/// considered truncated-to-nothing.
const LOW_OUTPUT_TOKENS: u64 = 10;

const DEFAULT_REFUSAL_PREFIXES: &[&str] = &[
    "i cannot",
    "i can't",
    "i'm sorry",
    "i am sorry",
    "i apologize",
    "as an ai",
];

impl Default for BlankDetector {
    fn default() -> Self {
        Self::new(
            DEFAULT_REFUSAL_PREFIXES
                .iter()
                .map(|p| p.to_string())
                .collect(),
        )
    }
}

impl BlankDetector {
    pub fn new(refusal_prefixes: Vec<String>) -> Self {
        Self { refusal_prefixes }
    }

    /// Inspect a parsed body. Returns `None` unless the body is a
    /// chat-completion object with blank/refused content.
    ///
    /// Rules, first match per the first choice:
    /// 1. empty or whitespace-only content,
    /// 2. content starting with a configured refusal prefix,
    /// 3. `finish_reason == "MAX_TOKENS"` with negligible output tokens.
    pub fn detect(&self, body: &Value) -> Option<BlankDetection> {
        if body.get("object").and_then(|v| v.as_str()) != Some("chat.completion") {
            return None;
        }

        let first_choice = body.get("choices").and_then(|c| c.get(0))?;

        if let Some(content) = first_choice
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
        {
            if content.trim().is_empty() {
                return Some(BlankDetection {
                    reason: BlankReason::EmptyContent,
                    matched_pattern: None,
                    content_preview: Some(content.to_string()),
                });
            }

            let lowered = content.trim().to_lowercase();
            for prefix in &self.refusal_prefixes {
                if lowered.starts_with(&prefix.to_lowercase()) {
                    return Some(BlankDetection {
                        reason: BlankReason::PatternMatch,
                        matched_pattern: Some(prefix.clone()),
                        content_preview: Some(truncate(content, 1000)),
                    });
                }
            }
        } else {
            // `content` missing or null counts as empty
            return Some(BlankDetection {
                reason: BlankReason::EmptyContent,
                matched_pattern: None,
                content_preview: None,
            });
        }

        let finish_reason = first_choice
            .get("finish_reason")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let completion_tokens = body
            .get("usage")
            .and_then(|u| u.get("completion_tokens"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        if finish_reason == "MAX_TOKENS" && completion_tokens < LOW_OUTPUT_TOKENS {
            let preview = first_choice
                .get("message")
                .and_then(|m| m.get("content"))
                .and_then(|c| c.as_str())
                .map(|c| truncate(c, 1000));
            return Some(BlankDetection {
                reason: BlankReason::MaxTokensLowOutput,
                matched_pattern: None,
                content_preview: preview,
            });
        }

        None
    }
}
