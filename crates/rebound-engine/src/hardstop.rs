//! Hard-stop conditions: configured patterns that abort all retries.
//!
//! A hard-stop match takes precedence over every retry path. The request
//! terminates immediately with a synthesized OpenAI-style error object
//! carrying the configured user message and the original upstream error
//! for diagnostics.

use regex::RegexBuilder;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

/// Stable error code on every synthesized hard-stop response.
pub const HARD_STOP_CODE: &str = "hard_stop_condition_met";

const FALLBACK_MESSAGE: &str = "Request failed due to downstream provider error";

/// One configured hard-stop rule, tested in declared order.
#[derive(Debug, Clone, Deserialize)]
pub struct HardStopRule {
    /// Case-insensitive regex tested against the raw response text.
    pub pattern: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub add_user_message: bool,
    #[serde(default)]
    pub user_message: Option<String>,
}

struct CompiledHardStop {
    rule: HardStopRule,
    regex: regex::Regex,
}

/// Evaluates hard-stop rules against raw response bodies.
pub struct HardStopEvaluator {
    rules: Vec<CompiledHardStop>,
}

impl HardStopEvaluator {
    /// Compile the configured rules; invalid patterns are skipped with a
    /// warning so one bad rule cannot disable the rest.
    pub fn new(rules: Vec<HardStopRule>) -> Self {
        let rules = rules
            .into_iter()
            .filter_map(|rule| {
                match RegexBuilder::new(&rule.pattern).case_insensitive(true).build() {
                    Ok(regex) => Some(CompiledHardStop { rule, regex }),
                    Err(e) => {
                        warn!(pattern = %rule.pattern, error = %e, "skipping invalid hard-stop rule");
                        None
                    }
                }
            })
            .collect();
        Self { rules }
    }

    /// An evaluator with no rules (hard stops disabled).
    pub fn disabled() -> Self {
        Self { rules: Vec::new() }
    }

    /// Test the raw body against each rule in order; first match wins.
    pub fn evaluate(&self, body: &str) -> Option<&HardStopRule> {
        self.rules
            .iter()
            .find(|c| c.regex.is_match(body))
            .map(|c| &c.rule)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Build the terminal response body for a matched rule, attaching the
/// upstream error payload when one can be extracted.
pub fn build_hard_stop_body(rule: &HardStopRule, raw_body: &str) -> Value {
    let message = if rule.add_user_message {
        rule.user_message
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| FALLBACK_MESSAGE.to_string())
    } else {
        FALLBACK_MESSAGE.to_string()
    };

    let mut error = json!({
        "message": message,
        "type": "hard_stop_error",
        "code": HARD_STOP_CODE,
    });

    match serde_json::from_str::<Value>(raw_body) {
        Ok(original) => {
            if let Some(orig_error) = original.get("error") {
                let detail = if orig_error.is_object() {
                    orig_error.clone()
                } else {
                    json!({"message": orig_error})
                };
                error["original_error"] = detail;
            }
        }
        Err(_) => {
            error["original_error"] = json!({"message": raw_body});
        }
    }

    json!({ "error": error })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(pattern: &str) -> HardStopRule {
        HardStopRule {
            pattern: pattern.to_string(),
            description: Some("test rule".to_string()),
            add_user_message: false,
            user_message: None,
        }
    }

    #[test]
    fn test_match_is_case_insensitive() {
        let evaluator = HardStopEvaluator::new(vec![rule("quota exhausted")]);
        assert!(evaluator
            .evaluate(r#"{"error":{"message":"QUOTA EXHAUSTED for project"}}"#)
            .is_some());
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let evaluator = HardStopEvaluator::new(vec![rule("first"), rule("second")]);
        let body = "matches first and second";
        let matched = evaluator.evaluate(body).unwrap();
        assert_eq!(matched.pattern, "first");
    }

    #[test]
    fn test_no_match_returns_none() {
        let evaluator = HardStopEvaluator::new(vec![rule("quota exhausted")]);
        assert!(evaluator.evaluate("all fine here").is_none());
    }

    #[test]
    fn test_invalid_rule_is_skipped() {
        let evaluator = HardStopEvaluator::new(vec![rule("([unclosed"), rule("works")]);
        assert!(evaluator.evaluate("this works").is_some());
    }

    #[test]
    fn test_body_carries_user_message_and_code() {
        let matched = HardStopRule {
            pattern: "banned".to_string(),
            description: None,
            add_user_message: true,
            user_message: Some("The provider rejected this key.".to_string()),
        };
        let body = build_hard_stop_body(&matched, r#"{"error":{"message":"key banned"}}"#);
        assert_eq!(body["error"]["code"], HARD_STOP_CODE);
        assert_eq!(body["error"]["type"], "hard_stop_error");
        assert_eq!(body["error"]["message"], "The provider rejected this key.");
        assert_eq!(body["error"]["original_error"]["message"], "key banned");
    }

    #[test]
    fn test_body_without_user_message_uses_fallback() {
        let body = build_hard_stop_body(&rule("x"), "not json");
        assert_eq!(body["error"]["message"], FALLBACK_MESSAGE);
        assert_eq!(body["error"]["original_error"]["message"], "not json");
    }

    #[test]
    fn test_string_error_is_wrapped() {
        let body = build_hard_stop_body(&rule("x"), r#"{"error":"plain string"}"#);
        assert_eq!(body["error"]["original_error"]["message"], "plain string");
    }
}
