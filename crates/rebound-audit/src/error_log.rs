//! Independent error logs with size-bounded rotation.

use chrono::Local;
use rebound_transform::ChatContext;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::error;

use crate::sequence::SequenceAllocator;

/// Bytes of serialized detail kept per entry.
const MAX_DETAIL_CHARS: usize = 4000;

/// Writes error/retry diagnostics to their own folder, rotating old
/// files out once `max_files` is exceeded. Failures are swallowed.
pub struct ErrorLogger {
    enabled: bool,
    base_folder: PathBuf,
    max_file_size_mb: u64,
    max_files: usize,
    sequencer: Arc<SequenceAllocator>,
}

impl ErrorLogger {
    pub fn new(
        enabled: bool,
        folder: impl Into<PathBuf>,
        max_file_size_mb: u64,
        max_files: usize,
        sequencer: Arc<SequenceAllocator>,
    ) -> Self {
        Self {
            enabled,
            base_folder: folder.into(),
            max_file_size_mb,
            max_files,
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
            None => self.base_folder.clone(),
        }
    }

    /// Record one error entry. `operation` names the request kind for the
    /// filename; `context_label` says where in the pipeline it happened.
    pub fn log_error(
        &self,
        operation: &str,
        context_label: &str,
        message: &str,
        details: Option<&Value>,
        chat: Option<&ChatContext>,
    ) {
        if !self.enabled {
            return;
        }

        let folder = self.folder_for(chat);
        let path = match self
            .sequencer
            .claim(&folder, &format!("{}-ERROR", operation))
        {
            Ok(path) => path,
            Err(e) => {
                error!(error = %e, "failed to claim error log file");
                return;
            }
        };

        let mut content = String::new();
        content.push_str(&format!(
            "# Error: {}\n\n- Time: {}\n- Context: {}\n- Message: {}\n",
            operation,
            Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            context_label,
            message
        ));
        if let Some(details) = details {
            let serialized = serde_json::to_string_pretty(details)
                .unwrap_or_else(|_| "Unable to serialize".to_string());
            let bounded: String = serialized.chars().take(MAX_DETAIL_CHARS).collect();
            content.push_str(&format!("\n## Details\n\n```json\n{}\n```\n", bounded));
        }

        if let Err(e) = fs::write(&path, content) {
            error!(error = %e, path = %path.display(), "failed to write error log");
        }

        self.rotate(&folder);
    }

    /// Delete the oldest log files while the folder exceeds `max_files`
    /// or the combined size exceeds `max_file_size_mb`.
    fn rotate(&self, folder: &Path) {
        let entries = match fs::read_dir(folder) {
            Ok(entries) => entries,
            Err(_) => return,
        };

        let mut files: Vec<(SystemTime, u64, PathBuf)> = entries
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("md") {
                    return None;
                }
                let metadata = entry.metadata().ok()?;
                let modified = metadata.modified().ok()?;
                Some((modified, metadata.len(), path))
            })
            .collect();

        files.sort_by_key(|(modified, _, _)| *modified);

        let max_bytes = self.max_file_size_mb.saturating_mul(1024 * 1024);
        let mut total_bytes: u64 = files.iter().map(|(_, size, _)| size).sum();
        let mut count = files.len();

        for (_, size, path) in files {
            if count <= self.max_files && total_bytes <= max_bytes {
                break;
            }
            if let Err(e) = fs::remove_file(&path) {
                error!(error = %e, path = %path.display(), "failed to rotate error log");
                break;
            }
            count -= 1;
            total_bytes = total_bytes.saturating_sub(size);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn logger(dir: &TempDir, max_files: usize) -> ErrorLogger {
        ErrorLogger::new(
            true,
            dir.path(),
            10,
            max_files,
            Arc::new(SequenceAllocator::new()),
        )
    }

    #[test]
    fn test_error_entry_is_written_with_suffix() {
        let dir = TempDir::new().unwrap();
        let logger = logger(&dir, 10);
        logger.log_error(
            "chat",
            "forward_request",
            "connection refused",
            Some(&json!({"url": "http://u.test"})),
            None,
        );

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().flatten().collect();
        assert_eq!(entries.len(), 1);
        let name = entries[0].file_name().to_str().unwrap().to_string();
        assert!(name.ends_with("-chat-ERROR.md"), "{}", name);
        let content = fs::read_to_string(entries[0].path()).unwrap();
        assert!(content.contains("connection refused"));
        assert!(content.contains("forward_request"));
    }

    #[test]
    fn test_rotation_deletes_oldest_beyond_cap() {
        let dir = TempDir::new().unwrap();
        let logger = logger(&dir, 3);
        for i in 0..6 {
            logger.log_error("chat", "test", &format!("error {}", i), None, None);
        }
        let count = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(count, 3);
    }

    #[test]
    fn test_disabled_logger_is_silent() {
        let dir = TempDir::new().unwrap();
        let logger = ErrorLogger::new(false, dir.path(), 10, 10, Arc::new(SequenceAllocator::new()));
        logger.log_error("chat", "test", "boom", None, None);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
