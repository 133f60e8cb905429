//! Configuration for the rebound proxy.
//!
//! One YAML file per upstream target. The default `config.yaml` serves
//! the bare routes; a request under `/{name}/...` resolves
//! `config-{name}.yaml` instead, so one proxy instance can front several
//! upstream configurations.

pub mod loader;
pub mod schema;

pub use loader::{config_name_for_path, load_config, load_for_route, RouteConfigError};
pub use schema::{
    BlankDetectionConfig, Config, ErrorHandlingConfig, ErrorLoggingConfig, HardStopConfig,
    LoggingConfig, ResponseParsingConfig, ServerConfig, TargetProxyConfig, TransformConfig,
};
