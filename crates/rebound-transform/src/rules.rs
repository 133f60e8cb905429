//! Regex replacement rules for outbound messages and inbound responses.

use regex::RegexBuilder;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

/// One replacement rule from config.
#[derive(Debug, Clone, Deserialize)]
pub struct TransformRule {
    pub pattern: String,
    #[serde(default)]
    pub replacement: String,
    /// Subset of regex flags: `i`, `m`, `s`, `x`.
    #[serde(default)]
    pub flags: String,
    /// `all` or a specific message role (`system`, `user`, `assistant`).
    #[serde(default = "default_apply_to")]
    pub apply_to: String,
}

fn default_apply_to() -> String {
    "all".to_string()
}

impl TransformRule {
    fn applies_to_role(&self, role: &str) -> bool {
        let target = self.apply_to.to_lowercase();
        target == "all" || target == role.to_lowercase()
    }
}

/// Apply the rules to a text in declared order. An invalid pattern is
/// skipped with a warning; one bad rule never disables the rest.
pub fn apply_rules(text: &str, rules: &[TransformRule]) -> String {
    let mut result = text.to_string();
    for rule in rules {
        let compiled = RegexBuilder::new(&rule.pattern)
            .case_insensitive(rule.flags.contains('i'))
            .multi_line(rule.flags.contains('m'))
            .dot_matches_new_line(rule.flags.contains('s'))
            .ignore_whitespace(rule.flags.contains('x'))
            .build();
        match compiled {
            Ok(re) => {
                result = re
                    .replace_all(&result, rule.replacement.as_str())
                    .into_owned();
            }
            Err(e) => {
                warn!(pattern = %rule.pattern, error = %e, "skipping invalid transform rule");
            }
        }
    }
    result
}

/// Apply rules to each message's `content`, respecting `apply_to` role
/// filters. Returns a new message list; inputs are not mutated.
pub fn process_messages(messages: &[Value], rules: &[TransformRule]) -> Vec<Value> {
    if rules.is_empty() {
        return messages.to_vec();
    }

    messages
        .iter()
        .map(|message| {
            let role = message
                .get("role")
                .and_then(|r| r.as_str())
                .unwrap_or("")
                .to_lowercase();
            let content = message.get("content").and_then(|c| c.as_str());

            let content = match content {
                Some(c) if !c.is_empty() => c,
                _ => return message.clone(),
            };

            let applicable: Vec<TransformRule> = rules
                .iter()
                .filter(|r| r.applies_to_role(&role))
                .cloned()
                .collect();
            if applicable.is_empty() {
                return message.clone();
            }

            let mut updated = message.clone();
            updated["content"] = Value::String(apply_rules(content, &applicable));
            updated
        })
        .collect()
}

/// Apply rules to every `choices[i].message.content` of a completion
/// body, returning a new body.
pub fn process_response(body: &Value, rules: &[TransformRule]) -> Value {
    if rules.is_empty() {
        return body.clone();
    }

    let mut updated = body.clone();
    if let Some(choices) = updated.get_mut("choices").and_then(|c| c.as_array_mut()) {
        for choice in choices {
            if let Some(content) = choice
                .get("message")
                .and_then(|m| m.get("content"))
                .and_then(|c| c.as_str())
            {
                let replaced = apply_rules(content, rules);
                choice["message"]["content"] = Value::String(replaced);
            }
        }
    }
    updated
}
