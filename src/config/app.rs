//! Application configuration structures.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::probe::{ProbeConfig, ProbesConfig, validate_probes};
use super::validation::{ConfigError, read_yaml};

// =============================================================================
// Constants
// =============================================================================

/// Default probe interval (10 seconds).
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

fn default_interval() -> Duration {
    DEFAULT_INTERVAL
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Interval of probes that do not set their own (default: 10s).
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub default_interval: Duration,

    /// Directory with additional probe definition files.
    #[serde(default)]
    pub probe_path: Option<PathBuf>,

    /// Probe definitions.
    #[serde(default)]
    pub probes: Vec<ProbeConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_interval: DEFAULT_INTERVAL,
            probe_path: None,
            probes: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: Self = read_yaml(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration including every probe file in `probe_path`.
    ///
    /// A relative `probe_path` is resolved against the directory of the
    /// main configuration file.
    pub fn load_with_probe_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config: Self = read_yaml(path)?;

        if let Some(probe_dir) = &config.probe_path {
            let probe_dir = match path.parent() {
                Some(base) if probe_dir.is_relative() => base.join(probe_dir),
                _ => probe_dir.clone(),
            };
            let additional = ProbesConfig::load_from_dir(&probe_dir)?;
            config.probes.extend(additional.probes);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "default_interval must be greater than zero".to_string(),
            ));
        }

        validate_probes(&self.probes)
    }

    /// Enabled probes paired with their effective interval.
    pub fn scheduled_probes(&self) -> impl Iterator<Item = (&ProbeConfig, Duration)> {
        self.probes
            .iter()
            .filter(|p| p.enabled)
            .map(|p| (p, p.interval_or(self.default_interval)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_app_config_defaults() {
        let config: AppConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.default_interval, DEFAULT_INTERVAL);
        assert!(config.probe_path.is_none());
        assert!(config.probes.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_app_config_zero_default_interval() {
        let config = AppConfig {
            default_interval: Duration::ZERO,
            ..AppConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("default_interval"));
    }

    #[test]
    fn test_scheduled_probes_skip_disabled() {
        let config: AppConfig = serde_yaml::from_str(
            r#"
default_interval: 5s
probes:
  - name: load
    kind: file
    path: /proc/loadavg
  - name: temp
    kind: sysfs
    path: /sys/class/thermal/thermal_zone0/temp
    divisor: 1000
    interval: 30s
  - name: ping
    kind: process
    command: ping 127.0.0.1
    enabled: false
"#,
        )
        .unwrap();

        let scheduled: Vec<_> = config
            .scheduled_probes()
            .map(|(p, interval)| (p.name.as_str(), interval))
            .collect();
        assert_eq!(
            scheduled,
            vec![
                ("load", Duration::from_secs(5)),
                ("temp", Duration::from_secs(30)),
            ]
        );
    }

    #[test]
    fn test_load_with_probe_path() {
        let dir = tempdir().unwrap();
        let probes_dir = dir.path().join("probes.d");
        std::fs::create_dir(&probes_dir).unwrap();
        std::fs::write(
            probes_dir.join("thermal.yaml"),
            "probes:\n  - name: temp\n    kind: sysfs\n    path: /sys/class/thermal/thermal_zone0/temp\n",
        )
        .unwrap();

        let main = dir.path().join("pimetrics.yaml");
        std::fs::write(
            &main,
            "probe_path: probes.d\nprobes:\n  - name: load\n    kind: file\n    path: /proc/loadavg\n",
        )
        .unwrap();

        let config = AppConfig::load_with_probe_path(&main).unwrap();
        let names: Vec<_> = config.probes.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["load", "temp"]);
    }

    #[test]
    fn test_load_rejects_duplicates_across_files() {
        let dir = tempdir().unwrap();
        let probes_dir = dir.path().join("probes.d");
        std::fs::create_dir(&probes_dir).unwrap();
        std::fs::write(
            probes_dir.join("dup.yml"),
            "probes:\n  - name: load\n    kind: file\n    path: /proc/loadavg\n",
        )
        .unwrap();

        let main = dir.path().join("pimetrics.yaml");
        std::fs::write(
            &main,
            format!(
                "probe_path: {}\nprobes:\n  - name: load\n    kind: file\n    path: /proc/loadavg\n",
                probes_dir.display()
            ),
        )
        .unwrap();

        let err = AppConfig::load_with_probe_path(&main).unwrap_err();
        assert!(err.to_string().contains("duplicate probe name"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let err = AppConfig::load(dir.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("missing.yaml"));
    }
}
