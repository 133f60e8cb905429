//! Per-request lifecycle logs.
//!
//! One markdown file per request: created when handling begins, appended
//! with a note per retry, and completed with the final outcome and
//! response. Files for metadata-tagged requests are routed into
//! `characters/<character>/<timestamp>/`; everything else lands in
//! `unsorted/`.

use chrono::Local;
use rebound_engine::{Attempt, AuditTrail, OutcomeSummary, RetryNote};
use rebound_transform::ChatContext;
use rebound_upstream::sanitize_headers_for_logging;
use serde_json::Value;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

use crate::sequence::SequenceAllocator;

/// Writes request lifecycle logs. Cheap to share; all methods swallow
/// their own I/O failures.
pub struct RequestLogger {
    enabled: bool,
    base_folder: PathBuf,
    sequencer: Arc<SequenceAllocator>,
}

impl RequestLogger {
    pub fn new(enabled: bool, folder: impl Into<PathBuf>, sequencer: Arc<SequenceAllocator>) -> Self {
        Self {
            enabled,
            base_folder: folder.into(),
            sequencer,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    fn folder_for(&self, context: Option<&ChatContext>) -> PathBuf {
        match context {
            Some(c) => self
                .base_folder
                .join("characters")
                .join(&c.character)
                .join(&c.timestamp),
            None => self.base_folder.join("unsorted"),
        }
    }

    /// Open the log for a new request and write the request section.
    /// Returns the claimed file path, or `None` when logging is disabled
    /// or the claim failed.
    pub fn start(
        &self,
        request_id: &str,
        endpoint: &str,
        request_data: &Value,
        headers: &[(String, String)],
        context: Option<&ChatContext>,
    ) -> Option<PathBuf> {
        if !self.enabled {
            return None;
        }

        let operation = context
            .map(|c| c.operation.as_str())
            .unwrap_or("chat")
            .to_string();
        let folder = self.folder_for(context);
        let path = match self.sequencer.claim(&folder, &operation) {
            Ok(path) => path,
            Err(e) => {
                error!(error = %e, folder = %folder.display(), "failed to claim request log file");
                return None;
            }
        };

        let mut content = String::new();
        content.push_str(&format!("# Request {}\n\n", request_id));
        content.push_str(&format!("- Endpoint: `{}`\n", endpoint));
        content.push_str(&format!("- Started: {}\n", now()));
        content.push_str("\n## Request Headers\n\n```\n");
        for (name, value) in sanitize_headers_for_logging(headers) {
            content.push_str(&format!("{}: {}\n", name, value));
        }
        content.push_str("```\n\n## Request Data\n\n```json\n");
        content.push_str(&pretty(request_data));
        content.push_str("\n```\n");

        if let Err(e) = std::fs::write(&path, content) {
            error!(error = %e, path = %path.display(), "failed to write request log");
        }
        Some(path)
    }

    /// Append one retry note.
    pub fn append_retry_note(&self, path: &Path, attempt: &Attempt, note: &RetryNote) {
        let mut section = String::new();
        section.push_str(&format!(
            "\n## Retry scheduled (attempt {} -> {})\n\n",
            attempt.attempt_number, note.next_attempt_number
        ));
        section.push_str(&format!("- Time: {}\n", now()));
        section.push_str(&format!("- Reason: {}\n", note.reason));
        if let Some(status) = attempt.http_status {
            section.push_str(&format!("- HTTP status: {}\n", status));
        }
        if let Some(delay) = note.delay {
            section.push_str(&format!("- Delay: {:.3}s\n", delay.as_secs_f64()));
        }
        if let Some(pattern) = &note.matched_pattern {
            section.push_str(&format!("- Matched pattern: `{}`\n", pattern));
        }
        if let Some(preview) = &note.content_preview {
            section.push_str(&format!("\n```\n{}\n```\n", preview));
        }
        self.append(path, &section);
    }

    /// Append the engine's final outcome summary.
    pub fn append_outcome(&self, path: &Path, summary: &OutcomeSummary) {
        let mut section = String::new();
        section.push_str("\n## Final Outcome\n\n");
        section.push_str(&format!("- Total attempts: {}\n", summary.total_attempts));
        if let Some(status) = summary.final_status {
            section.push_str(&format!("- Final status: {}\n", status));
        }
        if let Some(error_type) = &summary.error_type {
            section.push_str(&format!("- Error type: {}\n", error_type));
        }
        if let Some(message) = &summary.error_message {
            section.push_str(&format!("- Error message: {}\n", message));
        }
        self.append(path, &section);
    }

    /// Append the response body and timing once the request is done.
    pub fn complete(&self, path: &Path, response_data: Option<&Value>, duration: Duration) {
        let mut section = String::new();
        if let Some(data) = response_data {
            section.push_str("\n## Final Response Data\n\n```json\n");
            section.push_str(&pretty(data));
            section.push_str("\n```\n");
        }
        section.push_str(&format!(
            "\n- Completed: {}\n- Duration: {:.3}s\n",
            now(),
            duration.as_secs_f64()
        ));
        self.append(path, &section);
    }

    /// One-shot log for a `/models` request.
    pub fn log_models_request(
        &self,
        request_id: &str,
        headers: &[(String, String)],
        response_data: Option<&Value>,
        error_message: Option<&str>,
        context: Option<&ChatContext>,
    ) {
        if !self.enabled {
            return;
        }

        let folder = self.folder_for(context);
        let path = match self.sequencer.claim(&folder, "models") {
            Ok(path) => path,
            Err(e) => {
                error!(error = %e, "failed to claim models log file");
                return;
            }
        };

        let mut content = String::new();
        content.push_str(&format!("# Models Request {}\n\n", request_id));
        content.push_str(&format!("- Time: {}\n", now()));
        content.push_str("\n## Request Headers\n\n```\n");
        for (name, value) in sanitize_headers_for_logging(headers) {
            content.push_str(&format!("{}: {}\n", name, value));
        }
        content.push_str("```\n");
        if let Some(message) = error_message {
            content.push_str(&format!("\n## Error\n\n{}\n", message));
        } else if let Some(data) = response_data {
            content.push_str("\n## Response Data\n\n```json\n");
            content.push_str(&pretty(data));
            content.push_str("\n```\n");
        }

        if let Err(e) = std::fs::write(&path, content) {
            error!(error = %e, path = %path.display(), "failed to write models log");
        }
    }

    fn append(&self, path: &Path, section: &str) {
        if !self.enabled {
            return;
        }
        let result = OpenOptions::new()
            .append(true)
            .open(path)
            .and_then(|mut file| file.write_all(section.as_bytes()));
        if let Err(e) = result {
            error!(error = %e, path = %path.display(), "failed to append to request log");
        }
    }
}

/// Per-request adapter the engine reports into.
pub struct RequestAudit {
    logger: Arc<RequestLogger>,
    filepath: Option<PathBuf>,
}

impl RequestAudit {
    pub fn new(logger: Arc<RequestLogger>, filepath: Option<PathBuf>) -> Self {
        Self { logger, filepath }
    }

    pub fn filepath(&self) -> Option<&Path> {
        self.filepath.as_deref()
    }
}

impl AuditTrail for RequestAudit {
    fn record_retry(&self, attempt: &Attempt, note: &RetryNote) {
        if let Some(path) = &self.filepath {
            self.logger.append_retry_note(path, attempt, note);
        }
    }

    fn record_outcome(&self, summary: &OutcomeSummary) {
        if let Some(path) = &self.filepath {
            self.logger.append_outcome(path, summary);
        }
    }
}

fn now() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "Unable to serialize".to_string())
}
