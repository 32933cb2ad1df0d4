//! Probe definitions and their construction.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json_path::JsonPath;

use crate::probe::api::{
    ApiConfig, ApiEndpointProbe, ApiProbe, ApiRequest, DEFAULT_TIMEOUT, HttpMethod, Payload,
};
use crate::probe::file::{DEFAULT_DIVISOR, DividedFileProbe, FileProbe};
use crate::probe::process::{LineAggregate, NumericProcessProbe, ProcessProbe};
use crate::probe::{ProbeError, Runnable};
use crate::sink::{Reported, Sink};

use super::validation::{ConfigError, expand_env_vars, read_yaml};

fn default_enabled() -> bool {
    true
}

fn default_divisor() -> f64 {
    DEFAULT_DIVISOR
}

fn default_json() -> bool {
    true
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

/// A single probe definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Unique probe name, used as the sample name.
    pub name: String,

    /// Whether the probe is scheduled (default: true).
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Run interval (default: the application's `default_interval`).
    #[serde(default, with = "humantime_serde")]
    pub interval: Option<Duration>,

    /// Static tags attached to every sample.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    /// What the probe measures.
    #[serde(flatten)]
    pub source: SourceConfig,
}

/// Measured source, tagged by `kind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceConfig {
    /// Whole file; the first whitespace-separated token is reported.
    File { path: PathBuf },

    /// Single numeric value divided for unit conversion.
    Sysfs {
        path: PathBuf,
        #[serde(default = "default_divisor")]
        divisor: f64,
    },

    /// Long-running command whose output lines are folded into one value.
    ///
    /// The command is split into program and arguments unless `shell` is
    /// set, in which case it runs through `sh -c`.
    Process {
        command: String,
        #[serde(default)]
        shell: bool,
        #[serde(default)]
        aggregate: LineAggregate,
        #[serde(default)]
        pattern: Option<String>,
    },

    /// HTTP API call.
    Http(HttpSourceConfig),
}

impl SourceConfig {
    /// Kind name as written in YAML.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::File { .. } => "file",
            Self::Sysfs { .. } => "sysfs",
            Self::Process { .. } => "process",
            Self::Http(_) => "http",
        }
    }
}

/// HTTP API source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSourceConfig {
    /// Base URL of the API.
    pub url: String,

    /// Path appended to the base URL.
    #[serde(default)]
    pub endpoint: String,

    /// HTTP method (default: GET).
    #[serde(default)]
    pub method: HttpMethod,

    /// Proxy server; supports `${VAR}` expansion.
    #[serde(default)]
    pub proxy: Option<String>,

    /// Decode responses as JSON (default: true).
    #[serde(default = "default_json")]
    pub json: bool,

    /// Request timeout (default: 10s).
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Request headers; values support `${VAR}` expansion.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Request body.
    #[serde(default)]
    pub body: Option<serde_json::Value>,

    /// Query parameters.
    #[serde(default)]
    pub params: BTreeMap<String, String>,

    /// JSONPath selecting the reported number (default: the whole body).
    #[serde(default)]
    pub value: Option<String>,
}

impl HttpSourceConfig {
    fn api_config(&self) -> ApiConfig {
        let mut config = ApiConfig::new(&self.url)
            .with_json(self.json)
            .with_timeout(self.timeout);
        if let Some(proxy) = &self.proxy {
            config = config.with_proxy(expand_env_vars(proxy));
        }
        config
    }

    fn request(&self) -> ApiRequest {
        let mut request = ApiRequest::new(&self.endpoint);
        for (key, value) in &self.headers {
            request = request.with_header(key, expand_env_vars(value));
        }
        for (key, value) in &self.params {
            request = request.with_param(key, value);
        }
        if let Some(body) = &self.body {
            request = request.with_body(body.clone());
        }
        request
    }
}

impl ProbeConfig {
    /// Interval to schedule at, falling back to `default_interval`.
    pub fn interval_or(&self, default_interval: Duration) -> Duration {
        self.interval.unwrap_or(default_interval)
    }

    /// Validate values that deserialization cannot check.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("probe name cannot be empty".to_string());
        }
        if self.interval.is_some_and(|i| i.is_zero()) {
            return Err("interval must be greater than zero".to_string());
        }

        match &self.source {
            SourceConfig::File { .. } => {}
            SourceConfig::Sysfs { divisor, .. } => {
                if !divisor.is_finite() || *divisor <= 0.0 {
                    return Err(format!("divisor must be a positive number, got {divisor}"));
                }
            }
            SourceConfig::Process {
                command,
                shell,
                pattern,
                ..
            } => {
                if command.trim().is_empty() {
                    return Err("command cannot be empty".to_string());
                }
                if !shell && shlex::split(command).is_none() {
                    return Err(format!("unbalanced quoting in command '{command}'"));
                }
                if let Some(pattern) = pattern {
                    Regex::new(pattern).map_err(|e| format!("invalid pattern '{pattern}': {e}"))?;
                }
            }
            SourceConfig::Http(http) => {
                url::Url::parse(&http.url)
                    .map_err(|e| format!("invalid URL '{}': {}", http.url, e))?;
                if let Some(value) = &http.value {
                    JsonPath::parse(value)
                        .map_err(|e| format!("invalid JSONPath '{value}': {e}"))?;
                }
            }
        }
        Ok(())
    }

    /// Construct the probe, reporting numeric values into `sink`.
    ///
    /// # Errors
    /// Returns the probe's construction error (missing file, missing
    /// executable, invalid HTTP client settings).
    pub fn build(&self, sink: Arc<dyn Sink>) -> Result<Box<dyn Runnable>, ProbeError> {
        let name = self.name.clone();
        let tags = self.tags.clone();

        let probe: Box<dyn Runnable> = match &self.source {
            SourceConfig::File { path } => Box::new(
                Reported::new(FileProbe::new(path)?, sink, |content: &String| {
                    first_number(content)
                })
                .with_name(name)
                .with_tags(tags),
            ),
            SourceConfig::Sysfs { path, divisor } => Box::new(
                Reported::new(
                    DividedFileProbe::with_divisor(path, *divisor)?,
                    sink,
                    |value: &f64| Some(*value),
                )
                .with_name(name)
                .with_tags(tags),
            ),
            SourceConfig::Process {
                command,
                shell,
                aggregate,
                pattern,
            } => {
                let process = if *shell {
                    ProcessProbe::shell(command)?
                } else {
                    ProcessProbe::from_command_line(command)?
                };
                let mut probe = NumericProcessProbe::new(process, *aggregate);
                if let Some(pattern) = pattern {
                    let regex = Regex::new(pattern)
                        .map_err(|e| ProbeError::Config(format!("invalid pattern: {e}")))?;
                    probe = probe.with_pattern(regex);
                }
                Box::new(
                    Reported::new(probe, sink, |value: &Option<f64>| *value)
                        .with_name(name)
                        .with_tags(tags),
                )
            }
            SourceConfig::Http(http) => {
                let path = http
                    .value
                    .as_deref()
                    .map(JsonPath::parse)
                    .transpose()
                    .map_err(|e| ProbeError::Config(format!("invalid JSONPath: {e}")))?;
                let client = ApiProbe::new(http.api_config())?;
                let probe = ApiEndpointProbe::new(name.clone(), client, http.request(), http.method);
                Box::new(
                    Reported::new(probe, sink, move |payload: &Option<Payload>| {
                        payload_number(payload.as_ref()?, path.as_ref())
                    })
                    .with_name(name)
                    .with_tags(tags),
                )
            }
        };
        Ok(probe)
    }
}

/// First whitespace-separated token of `text` parsed as a number.
fn first_number(text: &str) -> Option<f64> {
    text.split_whitespace().next()?.parse().ok()
}

/// Number selected from a payload, optionally through a JSONPath.
fn payload_number(payload: &Payload, path: Option<&JsonPath>) -> Option<f64> {
    match payload {
        Payload::Json(json) => {
            let node = match path {
                Some(path) => path.query(json).first()?,
                None => json,
            };
            match node {
                serde_json::Value::Number(n) => n.as_f64(),
                serde_json::Value::String(s) => s.trim().parse().ok(),
                serde_json::Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
                _ => None,
            }
        }
        Payload::Text(text) => first_number(text),
    }
}

/// Validate each probe definition and the uniqueness of names.
pub(crate) fn validate_probes(probes: &[ProbeConfig]) -> Result<(), ConfigError> {
    let mut seen_names = HashSet::new();
    for probe in probes {
        probe.validate().map_err(|e| {
            ConfigError::Invalid(format!(
                "{} probe '{}': {}",
                probe.source.kind(),
                probe.name,
                e
            ))
        })?;
        if !seen_names.insert(&probe.name) {
            return Err(ConfigError::Invalid(format!(
                "duplicate probe name: '{}'",
                probe.name
            )));
        }
    }
    Ok(())
}

/// Probe definitions, as found in the main config or a probe directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbesConfig {
    #[serde(default)]
    pub probes: Vec<ProbeConfig>,
}

impl ProbesConfig {
    /// Append the probes of `other`.
    #[must_use]
    pub fn merge(mut self, other: ProbesConfig) -> Self {
        self.probes.extend(other.probes);
        self
    }

    /// Validate every probe and the uniqueness of names.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_probes(&self.probes)
    }

    /// Load probe definitions from every YAML file in a directory.
    ///
    /// Files are read in name order so merging is deterministic.
    pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(ConfigError::Invalid(format!(
                "probe_path '{}' is not a directory",
                dir.display()
            )));
        }

        let mut paths = Vec::new();
        let entries = std::fs::read_dir(dir).map_err(|e| ConfigError::read(dir, e))?;
        for entry in entries {
            let path = entry.map_err(|e| ConfigError::read(dir, e))?.path();
            let is_yaml = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| ext == "yaml" || ext == "yml");
            if path.is_file() && is_yaml {
                paths.push(path);
            }
        }
        paths.sort();

        let mut merged = Self::default();
        for path in paths {
            tracing::debug!(path = %path.display(), "Loading probe config");
            let file_config: Self = read_yaml(&path)?;
            merged = merged.merge(file_config);
        }
        Ok(merged)
    }
}
