//! Serde schema for the proxy's YAML configuration.
//!
//! Every section except `target_proxy` is optional with the defaults
//! spelled out below. Conversion helpers hand the engine ready-built
//! collaborators so nothing downstream touches raw YAML shapes.

use rebound_engine::{
    BlankDetector, DetectionRule, HardStopEvaluator, HardStopRule, ResponseClassifier,
    RetrySettings,
};
use rebound_transform::TransformRule;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub target_proxy: TargetProxyConfig,
    #[serde(default)]
    pub error_handling: ErrorHandlingConfig,
    #[serde(default)]
    pub response_parsing: ResponseParsingConfig,
    #[serde(default)]
    pub blank_detection: BlankDetectionConfig,
    #[serde(default)]
    pub regex_replacement: TransformConfig,
    #[serde(default)]
    pub response_processing: TransformConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub error_logging: ErrorLoggingConfig,
}

impl Config {
    pub fn target(&self) -> &TargetProxyConfig {
        &self.target_proxy
    }

    pub fn error_handling(&self) -> &ErrorHandlingConfig {
        &self.error_handling
    }

    pub fn server(&self) -> &ServerConfig {
        &self.server
    }

    /// Retry tunables in the engine's terms.
    pub fn retry_settings(&self) -> RetrySettings {
        let eh = &self.error_handling;
        RetrySettings {
            max_retries: eh.max_retries,
            base_delay: Duration::from_secs_f64(eh.base_delay.max(0.0)),
            max_delay: Duration::from_secs_f64(eh.max_delay.max(eh.base_delay.max(0.0))),
            retry_codes: eh.retry_codes.iter().copied().collect(),
            fail_codes: eh.fail_codes.iter().copied().collect(),
            conditional_retry_codes: eh.conditional_retry_codes.iter().copied().collect(),
        }
    }

    /// Status recategorization rules. Disabled parsing yields a classifier
    /// that never recategorizes; enabled without rules uses the built-ins.
    pub fn classifier(&self) -> ResponseClassifier {
        if !self.response_parsing.enabled {
            return ResponseClassifier::disabled();
        }
        if self.response_parsing.rules.is_empty() {
            ResponseClassifier::with_builtin_rules()
        } else {
            ResponseClassifier::new(self.response_parsing.rules.clone())
        }
    }

    pub fn hard_stop(&self) -> HardStopEvaluator {
        let hs = &self.error_handling.hard_stop_conditions;
        if hs.enabled {
            HardStopEvaluator::new(hs.rules.clone())
        } else {
            HardStopEvaluator::disabled()
        }
    }

    pub fn blank_detector(&self) -> BlankDetector {
        match &self.blank_detection.refusal_prefixes {
            Some(prefixes) => BlankDetector::new(prefixes.clone()),
            None => BlankDetector::default(),
        }
    }

    /// Request-side transform rules, when enabled.
    pub fn request_rules(&self) -> &[TransformRule] {
        if self.regex_replacement.enabled {
            &self.regex_replacement.rules
        } else {
            &[]
        }
    }

    /// Response-side transform rules, when enabled.
    pub fn response_rules(&self) -> &[TransformRule] {
        if self.response_processing.enabled {
            &self.response_processing.rules
        } else {
            &[]
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetProxyConfig {
    pub url: String,
    #[serde(default)]
    pub apikey: Option<String>,
    /// Upstream request timeout in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ErrorHandlingConfig {
    pub max_retries: u32,
    pub base_delay: f64,
    pub max_delay: f64,
    pub retry_codes: Vec<u16>,
    pub fail_codes: Vec<u16>,
    pub conditional_retry_codes: Vec<u16>,
    pub hard_stop_conditions: HardStopConfig,
}

impl Default for ErrorHandlingConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            base_delay: 1.0,
            max_delay: 60.0,
            retry_codes: vec![429, 502, 503, 504],
            fail_codes: vec![400, 401, 403],
            conditional_retry_codes: vec![404, 411, 412],
            hard_stop_conditions: HardStopConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HardStopConfig {
    pub enabled: bool,
    pub rules: Vec<HardStopRule>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResponseParsingConfig {
    pub enabled: bool,
    pub rules: Vec<DetectionRule>,
}

impl Default for ResponseParsingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BlankDetectionConfig {
    /// `None` means the built-in refusal prefixes.
    pub refusal_prefixes: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    pub enabled: bool,
    pub rules: Vec<TransformRule>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub folder: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            folder: "logs".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ErrorLoggingConfig {
    pub enabled: bool,
    pub folder: String,
    pub max_file_size_mb: u64,
    pub max_files: usize,
}

impl Default for ErrorLoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            folder: "logs/errors".to_string(),
            max_file_size_mb: 10,
            max_files: 100,
        }
    }
}
