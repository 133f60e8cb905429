//! The per-request retry state machine.
//!
//! One logical request is a sequence of attempts, each of which lands in
//! exactly one of: success, retry scheduled, permanent failure, or hard
//! stop. Terminal states end the loop; a scheduled retry sleeps through
//! the backoff delay and loops. The blank-content sub-budget is explicit
//! loop state with its own fixed cap, independent of the HTTP retry
//! budget.

use crate::audit::{AuditTrail, OutcomeSummary, RetryNote};
use crate::backoff::delay_for;
use crate::blank::BlankDetector;
use crate::classify::ResponseClassifier;
use crate::hardstop::{build_hard_stop_body, HardStopEvaluator};
use crate::response::{relay_body, truncate, RawResponse, ResponseBody};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::future::Future;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Maximum internal retries for blank/refused content per logical request.
pub const BLANK_RETRY_CAP: u32 = 3;

/// A genuine transport-level failure (DNS, connection refused, timeout).
/// Treated exactly like a retryable 5xx, consuming one attempt.
#[derive(Debug, Clone, Error)]
#[error("transport failure: {0}")]
pub struct TransportFailure(pub String);

/// Retry tunables, supplied per request from config.
#[derive(Debug, Clone)]
pub struct RetrySettings {
    /// Retries allowed after the initial attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub retry_codes: HashSet<u16>,
    pub fail_codes: HashSet<u16>,
    /// Retried like `retry_codes`; kept separate so operators can tune
    /// the two sets independently.
    pub conditional_retry_codes: HashSet<u16>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            retry_codes: [429, 502, 503, 504].into_iter().collect(),
            fail_codes: [400, 401, 403].into_iter().collect(),
            conditional_retry_codes: [404, 411, 412].into_iter().collect(),
        }
    }
}

/// How one attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    RetryableError,
    PermanentError,
    HardStop,
}

/// Record of one upstream call. Immutable once pushed onto the history.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub attempt_number: u32,
    pub started_at: SystemTime,
    pub outcome: AttemptOutcome,
    pub http_status: Option<u16>,
    pub delay_before_next: Option<Duration>,
}

/// What to do after evaluating one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    Retry,
    Succeed,
    FailPermanently,
    HardStop,
}

/// Single output of the policy's per-attempt evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryDecision {
    pub action: RetryAction,
    pub delay: Option<Duration>,
    pub next_attempt_number: Option<u32>,
}

/// Terminal result of one logical request.
#[derive(Debug, Clone)]
pub enum FinalOutcome {
    /// Upstream body to relay as-is (possibly a blank completion that
    /// exhausted its sub-budget).
    Success { body: Value },
    /// Error to relay with the given status; the body is the last
    /// observed upstream response, never a synthesized summary.
    UpstreamError { status: u16, body: Value },
    /// Synthesized terminal error from a matched hard-stop rule.
    HardStop { body: Value },
}

/// Outcome plus the full attempt history for audit purposes.
#[derive(Debug)]
pub struct RequestResult {
    pub outcome: FinalOutcome,
    pub attempts: Vec<Attempt>,
}

enum StatusClass {
    Success,
    Retryable,
    Permanent,
}

/// Drives attempts through hard-stop, classification, and retry decisions.
pub struct RetryEngine {
    settings: RetrySettings,
    classifier: ResponseClassifier,
    hard_stop: HardStopEvaluator,
    blank: BlankDetector,
}

impl RetryEngine {
    pub fn new(
        settings: RetrySettings,
        classifier: ResponseClassifier,
        hard_stop: HardStopEvaluator,
        blank: BlankDetector,
    ) -> Self {
        Self {
            settings,
            classifier,
            hard_stop,
            blank,
        }
    }

    pub fn settings(&self) -> &RetrySettings {
        &self.settings
    }

    fn status_class(&self, status: u16) -> StatusClass {
        if (200..300).contains(&status) {
            StatusClass::Success
        } else if self.settings.fail_codes.contains(&status) {
            StatusClass::Permanent
        } else if self.settings.retry_codes.contains(&status)
            || self.settings.conditional_retry_codes.contains(&status)
            || (500..600).contains(&status)
        {
            StatusClass::Retryable
        } else {
            StatusClass::Permanent
        }
    }

    /// Evaluate the HTTP-level decision for an effective status, given how
    /// many retries have been consumed so far.
    pub fn decide(
        &self,
        effective_status: u16,
        retries_used: u32,
        attempt_number: u32,
    ) -> RetryDecision {
        match self.status_class(effective_status) {
            StatusClass::Success => RetryDecision {
                action: RetryAction::Succeed,
                delay: None,
                next_attempt_number: None,
            },
            StatusClass::Permanent => RetryDecision {
                action: RetryAction::FailPermanently,
                delay: None,
                next_attempt_number: None,
            },
            StatusClass::Retryable => {
                if retries_used >= self.settings.max_retries {
                    RetryDecision {
                        action: RetryAction::FailPermanently,
                        delay: None,
                        next_attempt_number: None,
                    }
                } else {
                    RetryDecision {
                        action: RetryAction::Retry,
                        delay: Some(delay_for(
                            retries_used,
                            self.settings.base_delay,
                            self.settings.max_delay,
                        )),
                        next_attempt_number: Some(attempt_number + 1),
                    }
                }
            }
        }
    }

    /// Run the full retry loop for one logical request.
    ///
    /// `operation` receives the attempt number (0-based) and performs the
    /// upstream call. Attempts are strictly sequential: attempt `n + 1`
    /// never starts before attempt `n` is fully classified. The backoff
    /// sleep and the in-flight call are ordinary futures, so dropping the
    /// returned future (client disconnect) cancels both.
    pub async fn run<F, Fut>(&self, mut operation: F, audit: &dyn AuditTrail) -> RequestResult
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<RawResponse, TransportFailure>>,
    {
        let mut attempts: Vec<Attempt> = Vec::new();
        let mut http_retries: u32 = 0;
        let mut blank_retries: u32 = 0;
        let mut attempt_number: u32 = 0;

        loop {
            let started_at = SystemTime::now();
            debug!(attempt = attempt_number, "issuing upstream attempt");

            let raw = match operation(attempt_number).await {
                Ok(raw) => raw,
                Err(err) => {
                    let decision = self.decide(502, http_retries, attempt_number);
                    if decision.action != RetryAction::Retry {
                        warn!(
                            attempt = attempt_number,
                            error = %err,
                            "retries exhausted on transport failure"
                        );
                        attempts.push(Attempt {
                            attempt_number,
                            started_at,
                            outcome: AttemptOutcome::PermanentError,
                            http_status: None,
                            delay_before_next: None,
                        });
                        audit.record_outcome(&OutcomeSummary {
                            total_attempts: attempt_number + 1,
                            final_status: Some(502),
                            error_type: Some("upstream_unreachable".to_string()),
                            error_message: Some(err.to_string()),
                        });
                        let body = json!({
                            "error": {
                                "message": err.to_string(),
                                "type": "upstream_unreachable",
                            }
                        });
                        return RequestResult {
                            outcome: FinalOutcome::UpstreamError { status: 502, body },
                            attempts,
                        };
                    }

                    let delay = decision.delay.unwrap_or_default();
                    http_retries += 1;
                    let attempt = Attempt {
                        attempt_number,
                        started_at,
                        outcome: AttemptOutcome::RetryableError,
                        http_status: None,
                        delay_before_next: Some(delay),
                    };
                    warn!(
                        attempt = attempt_number,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transport failure, retrying after delay"
                    );
                    audit.record_retry(
                        &attempt,
                        &RetryNote {
                            reason: err.to_string(),
                            delay: Some(delay),
                            matched_pattern: None,
                            content_preview: None,
                            next_attempt_number: attempt_number + 1,
                        },
                    );
                    attempts.push(attempt);
                    sleep(delay).await;
                    attempt_number += 1;
                    continue;
                }
            };

            // Hard stop wins over everything, including retryable statuses.
            if let Some(rule) = self.hard_stop.evaluate(&raw.body) {
                warn!(
                    attempt = attempt_number,
                    pattern = %rule.pattern,
                    description = rule.description.as_deref().unwrap_or("-"),
                    "hard-stop condition matched, aborting retries"
                );
                attempts.push(Attempt {
                    attempt_number,
                    started_at,
                    outcome: AttemptOutcome::HardStop,
                    http_status: Some(raw.status),
                    delay_before_next: None,
                });
                audit.record_outcome(&OutcomeSummary {
                    total_attempts: attempt_number + 1,
                    final_status: Some(raw.status),
                    error_type: Some("hard_stop_error".to_string()),
                    error_message: rule.description.clone(),
                });
                let body = build_hard_stop_body(rule, &raw.body);
                return RequestResult {
                    outcome: FinalOutcome::HardStop { body },
                    attempts,
                };
            }

            let class = self.classifier.classify(&raw.body, raw.status);
            if class.recategorized {
                info!(
                    original = class.original_status,
                    effective = class.effective_status,
                    reason = class.reason.as_deref().unwrap_or("-"),
                    "response status recategorized"
                );
            }
            let effective = class.effective_status;

            let decision = self.decide(effective, http_retries, attempt_number);
            match decision.action {
                RetryAction::Succeed => {
                    let value = match ResponseBody::decode(&raw.body) {
                        ResponseBody::Completion(v) => v,
                        ResponseBody::Error { value, .. } => value,
                        ResponseBody::Unparseable { .. } => {
                            warn!(
                                status = raw.status,
                                "success status with non-JSON body, failing request"
                            );
                            attempts.push(Attempt {
                                attempt_number,
                                started_at,
                                outcome: AttemptOutcome::PermanentError,
                                http_status: Some(raw.status),
                                delay_before_next: None,
                            });
                            audit.record_outcome(&OutcomeSummary {
                                total_attempts: attempt_number + 1,
                                final_status: Some(502),
                                error_type: Some("fallback_error".to_string()),
                                error_message: Some("Unexpected non-JSON response".to_string()),
                            });
                            let body = json!({
                                "error": {
                                    "message": "Unexpected non-JSON response",
                                    "type": "fallback_error",
                                    "response_text": truncate(&raw.body, 1000),
                                }
                            });
                            return RequestResult {
                                outcome: FinalOutcome::UpstreamError { status: 502, body },
                                attempts,
                            };
                        }
                    };

                    if let Some(blank) = self.blank.detect(&value) {
                        if blank_retries < BLANK_RETRY_CAP {
                            blank_retries += 1;
                            let mut reason = blank.reason.label().to_string();
                            if let Some(pattern) = &blank.matched_pattern {
                                reason.push_str(&format!(" - pattern '{}'", pattern));
                            }
                            warn!(
                                attempt = attempt_number,
                                blank_retry = blank_retries,
                                reason = %reason,
                                "blank response detected, retrying"
                            );
                            let attempt = Attempt {
                                attempt_number,
                                started_at,
                                outcome: AttemptOutcome::RetryableError,
                                http_status: Some(raw.status),
                                delay_before_next: None,
                            };
                            audit.record_retry(
                                &attempt,
                                &RetryNote {
                                    reason,
                                    delay: None,
                                    matched_pattern: blank.matched_pattern.clone(),
                                    content_preview: blank.content_preview.clone(),
                                    next_attempt_number: attempt_number + 1,
                                },
                            );
                            attempts.push(attempt);
                            attempt_number += 1;
                            continue;
                        }
                        warn!(
                            attempt = attempt_number,
                            "blank-response retry limit reached, returning blank response"
                        );
                    }

                    attempts.push(Attempt {
                        attempt_number,
                        started_at,
                        outcome: AttemptOutcome::Success,
                        http_status: Some(raw.status),
                        delay_before_next: None,
                    });
                    audit.record_outcome(&OutcomeSummary {
                        total_attempts: attempt_number + 1,
                        final_status: Some(raw.status),
                        error_type: None,
                        error_message: None,
                    });
                    return RequestResult {
                        outcome: FinalOutcome::Success { body: value },
                        attempts,
                    };
                }

                RetryAction::Retry => {
                    let delay = decision.delay.unwrap_or_default();
                    http_retries += 1;
                    let mut reason = format!("HTTP {}", effective);
                    if let Some(description) = &class.description {
                        reason.push_str(&format!(" - {}", description));
                    }
                    warn!(
                        attempt = attempt_number,
                        status = effective,
                        delay_ms = delay.as_millis() as u64,
                        "retryable upstream error, retrying after delay"
                    );
                    let attempt = Attempt {
                        attempt_number,
                        started_at,
                        outcome: AttemptOutcome::RetryableError,
                        http_status: Some(effective),
                        delay_before_next: Some(delay),
                    };
                    audit.record_retry(
                        &attempt,
                        &RetryNote {
                            reason,
                            delay: Some(delay),
                            matched_pattern: None,
                            content_preview: None,
                            next_attempt_number: attempt_number + 1,
                        },
                    );
                    attempts.push(attempt);
                    sleep(delay).await;
                    attempt_number += 1;
                }

                RetryAction::FailPermanently => {
                    let exhausted = !matches!(self.status_class(effective), StatusClass::Permanent);
                    if exhausted {
                        warn!(
                            attempt = attempt_number,
                            status = effective,
                            "retries exhausted, surfacing last upstream response"
                        );
                    } else {
                        info!(
                            attempt = attempt_number,
                            status = effective,
                            "permanent upstream error, relaying response body"
                        );
                    }
                    attempts.push(Attempt {
                        attempt_number,
                        started_at,
                        outcome: AttemptOutcome::PermanentError,
                        http_status: Some(effective),
                        delay_before_next: None,
                    });
                    let detail = match ResponseBody::decode(&raw.body) {
                        ResponseBody::Error { detail, .. } => detail,
                        _ => Default::default(),
                    };
                    let body = relay_body(effective, &raw.body);
                    let fallback_type = if exhausted {
                        "retries_exhausted"
                    } else {
                        "client_error"
                    };
                    audit.record_outcome(&OutcomeSummary {
                        total_attempts: attempt_number + 1,
                        final_status: Some(effective),
                        error_type: Some(
                            detail
                                .error_type
                                .unwrap_or_else(|| fallback_type.to_string()),
                        ),
                        error_message: detail
                            .message
                            .or_else(|| body["error"]["message"].as_str().map(String::from)),
                    });
                    return RequestResult {
                        outcome: FinalOutcome::UpstreamError {
                            status: effective,
                            body,
                        },
                        attempts,
                    };
                }

                // `decide` never returns HardStop; that path is handled
                // before classification.
                RetryAction::HardStop => unreachable!("hard stop handled before decide"),
            }
        }
    }
}
