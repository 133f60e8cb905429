//! Process-wide shared state.

use rebound_audit::{ErrorLogger, RequestLogger, SequenceAllocator};
use rebound_config::Config;
use std::sync::Arc;

/// Shared across all request workers. Per-route configs are loaded per
/// request; the loggers and the HTTP client are process-wide, and the
/// sequence allocator inside the loggers is the single guarded piece of
/// shared mutable state.
pub struct AppState {
    pub default_config: Config,
    pub client: reqwest::Client,
    pub request_logger: Arc<RequestLogger>,
    pub error_logger: Arc<ErrorLogger>,
}

impl AppState {
    /// Build state from the default config, wiring both loggers to one
    /// sequence allocator so request and error logs share numbering.
    pub fn from_config(default_config: Config, client: reqwest::Client) -> Self {
        let sequencer = Arc::new(SequenceAllocator::new());
        let request_logger = Arc::new(RequestLogger::new(
            default_config.logging.enabled,
            default_config.logging.folder.clone(),
            sequencer.clone(),
        ));
        let error_logger = Arc::new(ErrorLogger::new(
            default_config.error_logging.enabled,
            default_config.error_logging.folder.clone(),
            default_config.error_logging.max_file_size_mb,
            default_config.error_logging.max_files,
            sequencer,
        ));
        Self {
            default_config,
            client,
            request_logger,
            error_logger,
        }
    }
}
