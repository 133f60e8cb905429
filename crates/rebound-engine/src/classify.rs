//! Status recategorization based on response-body inspection.
//!
//! Some upstreams return HTTP 200 with a body that encodes a rate-limit or
//! server error. The classifier applies an ordered rule list against the
//! parsed body and, on the first match, overrides the declared status with
//! the rule's logical one. Everything downstream (retry decisions, relayed
//! status) uses the effective status.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

/// One recategorization rule, in config order.
///
/// A rule matches either by field equality (`field` + `equals`, where
/// `field` is a dotted path like `error.type`) or by a case-sensitive
/// regex over the raw body text (`pattern`). First match wins.
#[derive(Debug, Clone, Deserialize)]
pub struct DetectionRule {
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub equals: Option<String>,
    #[serde(default)]
    pub pattern: Option<String>,
    pub status: u16,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Outcome of classifying one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationResult {
    pub original_status: u16,
    pub effective_status: u16,
    pub recategorized: bool,
    pub reason: Option<String>,
    pub description: Option<String>,
}

impl ClassificationResult {
    fn unchanged(status: u16) -> Self {
        Self {
            original_status: status,
            effective_status: status,
            recategorized: false,
            reason: None,
            description: None,
        }
    }
}

struct CompiledRule {
    rule: DetectionRule,
    pattern: Option<Regex>,
}

/// Applies an ordered rule list to upstream responses. Pure: classifying
/// the same body twice yields the same result.
pub struct ResponseClassifier {
    rules: Vec<CompiledRule>,
}

lazy_static! {
    static ref BUILTIN_RULES: Vec<DetectionRule> = vec![
        DetectionRule {
            field: Some("error.type".into()),
            equals: Some("rate_limit_error".into()),
            pattern: None,
            status: 429,
            reason: Some("rate_limit_error".into()),
            description: Some("Body reports a rate-limit error".into()),
        },
        DetectionRule {
            field: Some("error.code".into()),
            equals: Some("too_many_requests".into()),
            pattern: None,
            status: 429,
            reason: Some("too_many_requests".into()),
            description: Some("Body reports too many requests".into()),
        },
        DetectionRule {
            field: Some("error.type".into()),
            equals: Some("overloaded_error".into()),
            pattern: None,
            status: 503,
            reason: Some("overloaded_error".into()),
            description: Some("Body reports the upstream is overloaded".into()),
        },
    ];
}

impl ResponseClassifier {
    /// Build a classifier from configured rules. Rules with invalid regex
    /// patterns are skipped with a warning rather than failing startup.
    pub fn new(rules: Vec<DetectionRule>) -> Self {
        let rules = rules
            .into_iter()
            .filter_map(|rule| {
                let pattern = match rule.pattern.as_deref() {
                    Some(p) => match Regex::new(p) {
                        Ok(re) => Some(re),
                        Err(e) => {
                            warn!(pattern = %p, error = %e, "skipping invalid detection rule");
                            return None;
                        }
                    },
                    None => None,
                };
                Some(CompiledRule { rule, pattern })
            })
            .collect();
        Self { rules }
    }

    /// The built-in rule set used when config enables parsing without
    /// supplying rules.
    pub fn with_builtin_rules() -> Self {
        Self::new(BUILTIN_RULES.clone())
    }

    /// A classifier that never recategorizes.
    pub fn disabled() -> Self {
        Self { rules: Vec::new() }
    }

    /// Inspect `body` and decide the effective status for `declared_status`.
    ///
    /// Bodies that fail to parse as JSON are left alone. On the first
    /// matching rule the effective status becomes the rule's status and
    /// `recategorized` is set, regardless of what the upstream declared.
    pub fn classify(&self, body: &str, declared_status: u16) -> ClassificationResult {
        if self.rules.is_empty() {
            return ClassificationResult::unchanged(declared_status);
        }

        let value: Value = match serde_json::from_str(body) {
            Ok(v) => v,
            Err(_) => return ClassificationResult::unchanged(declared_status),
        };

        for compiled in &self.rules {
            if rule_matches(compiled, &value, body) {
                return ClassificationResult {
                    original_status: declared_status,
                    effective_status: compiled.rule.status,
                    recategorized: true,
                    reason: compiled.rule.reason.clone().or_else(|| {
                        compiled
                            .rule
                            .field
                            .clone()
                            .or_else(|| compiled.rule.pattern.clone())
                    }),
                    description: compiled.rule.description.clone(),
                };
            }
        }

        ClassificationResult::unchanged(declared_status)
    }
}

fn rule_matches(compiled: &CompiledRule, value: &Value, raw: &str) -> bool {
    if let (Some(field), Some(expected)) = (&compiled.rule.field, &compiled.rule.equals) {
        if field_equals(value, field, expected) {
            return true;
        }
    }
    if let Some(re) = &compiled.pattern {
        if re.is_match(raw) {
            return true;
        }
    }
    false
}

fn field_equals(value: &Value, path: &str, expected: &str) -> bool {
    let mut current = value;
    for segment in path.split('.') {
        match current.get(segment) {
            Some(v) => current = v,
            None => return false,
        }
    }
    match current {
        Value::String(s) => s == expected,
        Value::Number(n) => n.to_string() == expected,
        Value::Bool(b) => b.to_string() == expected,
        _ => false,
    }
}
