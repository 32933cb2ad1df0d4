//! Configuration module for pimetrics.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Scheduling defaults (default probe interval)
//! - Probe definitions (file, sysfs, process, http)
//! - Probe include directory

mod app;
mod probe;
mod validation;

pub use app::{AppConfig, DEFAULT_INTERVAL};
pub use probe::{HttpSourceConfig, ProbeConfig, ProbesConfig, SourceConfig};
pub use validation::{ConfigError, expand_env_vars, parse_duration};
