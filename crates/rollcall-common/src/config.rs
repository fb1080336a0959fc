//! ---
//! rollcall_section: "01-core-functionality"
//! rollcall_subsection: "module"
//! rollcall_type: "source"
//! rollcall_scope: "code"
//! rollcall_description: "Shared primitives and utilities for the core runtime."
//! rollcall_version: "v0.0.0-prealpha"
//! rollcall_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use tracing::debug;
use url::Url;

use crate::logging::LogFormat;

/// Last-resort backend address used when neither probing nor configuration yields one.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

fn default_ttl() -> Duration {
    Duration::from_secs(300)
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_probe_timeout() -> Duration {
    Duration::from_millis(5000)
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_monitor_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_history_capacity() -> usize {
    5
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 9464))
}

/// Primary configuration object for the rollcall runtime.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: Option<PathBuf>,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "ROLLCALL_CONFIG";
    pub const ENV_FALLBACK_URL: &str = "ROLLCALL_API_URL";

    /// Load configuration from disk, respecting the `ROLLCALL_CONFIG` override.
    ///
    /// Falls back to built-in defaults when none of the candidates exist. Environment
    /// overrides are applied in every case.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            let path = candidate.as_ref();
            if path.exists() {
                let config = Self::from_path(path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path.to_path_buf()),
                });
            }
        }

        debug!("no configuration file found; using built-in defaults");
        let mut config = AppConfig::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(LoadedAppConfig {
            config,
            source: None,
        })
    }

    /// Load configuration, discarding the source path.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let mut config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Replace the configured fallback URL with `ROLLCALL_API_URL` when it is set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(Self::ENV_FALLBACK_URL) {
            let url = url.trim();
            if !url.is_empty() {
                self.detection.fallback_url = Some(url.to_owned());
            }
        }
    }

    /// Candidates sorted ascending by priority; ties keep declaration order.
    pub fn ordered_endpoints(&self) -> Vec<EndpointConfig> {
        let mut endpoints = self.endpoints.clone();
        endpoints.sort_by_key(|endpoint| endpoint.priority);
        endpoints
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        let mut labels = HashSet::new();
        for endpoint in &self.endpoints {
            endpoint.validate()?;
            if !labels.insert(endpoint.label.as_str()) {
                return Err(anyhow!("duplicate endpoint label '{}'", endpoint.label));
            }
        }
        self.detection.validate()?;
        self.monitor.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// One candidate backend base address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointConfig {
    pub url: String,
    pub label: String,
    #[serde(default)]
    pub priority: i32,
}

impl EndpointConfig {
    pub fn new(url: impl Into<String>, label: impl Into<String>, priority: i32) -> Self {
        Self {
            url: url.into(),
            label: label.into(),
            priority,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.label.trim().is_empty() {
            return Err(anyhow!("endpoint '{}' must have a label", self.url));
        }
        validate_url(&self.url)
            .with_context(|| format!("endpoint '{}' has an invalid url", self.label))
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    #[serde(default = "default_ttl")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub ttl: Duration,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_probe_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub probe_timeout: Duration,
    #[serde(default)]
    pub fallback_url: Option<String>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            ttl: default_ttl(),
            failure_threshold: default_failure_threshold(),
            probe_timeout: default_probe_timeout(),
            fallback_url: None,
        }
    }
}

impl DetectionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.ttl.is_zero() {
            return Err(anyhow!("detection.ttl must be greater than zero"));
        }
        if self.failure_threshold == 0 {
            return Err(anyhow!("detection.failure_threshold must be at least 1"));
        }
        if self.probe_timeout.is_zero() {
            return Err(anyhow!("detection.probe_timeout must be greater than zero"));
        }
        if let Some(url) = &self.fallback_url {
            validate_url(url).context("detection.fallback_url is invalid")?;
        }
        Ok(())
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_initial_delay")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub initial_delay: Duration,
    #[serde(default = "default_monitor_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub interval: Duration,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            initial_delay: default_initial_delay(),
            interval: default_monitor_interval(),
            history_capacity: default_history_capacity(),
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(anyhow!("monitor.interval must be greater than zero"));
        }
        if self.history_capacity == 0 {
            return Err(anyhow!("monitor.history_capacity must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: None,
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}

fn validate_url(raw: &str) -> Result<()> {
    let parsed = Url::parse(raw).with_context(|| format!("'{}' is not a valid url", raw))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(anyhow!("unsupported url scheme '{}' in '{}'", other, raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[[endpoints]]
url = "http://10.0.0.5:8000"
label = "campus-lan"
priority = 2

[[endpoints]]
url = "http://localhost:8000"
label = "local"
priority = 1

[detection]
ttl = 120
failure_threshold = 4
probe_timeout = 2500
fallback_url = "https://attendance.example.edu"

[monitor]
initial_delay = 1
interval = 60
"#;

    #[test]
    fn parses_sample_configuration() {
        let config: AppConfig = SAMPLE.parse().unwrap();
        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.detection.ttl, Duration::from_secs(120));
        assert_eq!(config.detection.failure_threshold, 4);
        assert_eq!(config.detection.probe_timeout, Duration::from_millis(2500));
        assert_eq!(config.monitor.interval, Duration::from_secs(60));
        assert_eq!(config.monitor.history_capacity, 5);
        let ordered = config.ordered_endpoints();
        assert_eq!(ordered[0].label, "local");
        assert_eq!(ordered[1].label, "campus-lan");
    }

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.detection.failure_threshold, 3);
        assert_eq!(config.detection.probe_timeout, Duration::from_millis(5000));
        assert_eq!(config.monitor.interval, Duration::from_secs(300));
    }

    #[test]
    fn rejects_duplicate_labels_and_bad_urls() {
        let duplicate = r#"
[[endpoints]]
url = "http://a:8000"
label = "lan"

[[endpoints]]
url = "http://b:8000"
label = "lan"
"#;
        let err = duplicate.parse::<AppConfig>().unwrap_err();
        assert!(err.to_string().contains("duplicate endpoint label"));

        let bad_scheme = r#"
[[endpoints]]
url = "ftp://files:21"
label = "ftp"
"#;
        assert!(bad_scheme.parse::<AppConfig>().is_err());
    }

    #[test]
    fn rejects_zero_threshold() {
        let content = "[detection]\nfailure_threshold = 0\n";
        let err = content.parse::<AppConfig>().unwrap_err();
        assert!(err.to_string().contains("failure_threshold"));
    }

    #[test]
    fn loads_first_existing_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollcall.toml");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let missing = dir.path().join("missing.toml");
        let loaded = AppConfig::load_with_source(&[missing, path.clone()]).unwrap();
        assert_eq!(loaded.source.as_deref(), Some(path.as_path()));
        assert_eq!(loaded.config.endpoints.len(), 2);
    }
}
