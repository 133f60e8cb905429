//! Config file loading and per-route resolution.

use crate::schema::Config;
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Map a URL path segment to its config filename:
/// `"my-upstream"` resolves to `config-my-upstream.yaml`, the empty
/// segment to the default `config.yaml`.
pub fn config_name_for_path(segment: &str) -> String {
    let trimmed = segment.trim().trim_matches('/');
    if trimmed.is_empty() {
        "config.yaml".to_string()
    } else {
        format!("config-{}.yaml", trimmed)
    }
}

/// Load and validate a config file.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = serde_yaml_ng::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    if config.target_proxy.url.trim().is_empty() {
        bail!("target_proxy.url is not configured in {}", path.display());
    }

    Ok(config)
}

/// Why a per-route config could not be produced.
#[derive(Debug, Error)]
pub enum RouteConfigError {
    /// The resolved file does not exist; maps to 404 on the HTTP surface.
    #[error("config file not found: {expected_file}")]
    NotFound { expected_file: String },

    /// The file exists but could not be loaded.
    #[error("{0}")]
    Invalid(String),
}

/// Resolve and load the config for a `/{name}/...` route.
pub fn load_for_route(segment: &str) -> Result<Config, RouteConfigError> {
    let name = config_name_for_path(segment);
    if !Path::new(&name).exists() {
        return Err(RouteConfigError::NotFound {
            expected_file: name,
        });
    }
    let config =
        load_config(&name).map_err(|e| RouteConfigError::Invalid(format!("{:#}", e)))?;
    info!(config = %name, "loaded per-route config");
    Ok(config)
}
