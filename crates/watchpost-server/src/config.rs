//! Configuration loading and validation for the Watchpost server.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use validator::{Validate, ValidationError, ValidationErrors};

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(#[from] ValidationErrors),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub environments: Vec<EnvironmentSettings>,

    #[serde(default)]
    pub probes: Vec<ProbeSettings>,

    #[serde(default)]
    pub logging: LoggingSettings,

    #[serde(default)]
    pub telemetry: TelemetrySettings,
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerSettings {
    /// Listen address for the agent feed
    #[validate(length(min = 1), custom = "validate_listen_addr")]
    pub listen: String,
}

/// Engine-level settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EngineSettings {
    /// Name of the environment this instance runs in
    #[validate(length(min = 1))]
    pub execution_environment: String,

    /// Worker threads for synchronous checks (default: 2x CPU count)
    #[validate(range(min = 1, max = 1024))]
    pub workers: Option<usize>,

    /// TTL for checks that do not declare cache_for themselves
    #[serde(default, with = "humantime_serde::option")]
    pub default_cache_for: Option<Duration>,

    /// Soft deadline attached to every check execution
    #[serde(default, with = "humantime_serde::option")]
    pub check_deadline: Option<Duration>,

    /// RFC1123 hostname coercion
    #[serde(default = "default_true")]
    pub rfc1123: bool,
}

/// Result cache settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Optional on-disk tier; results survive restarts when set
    pub directory: Option<PathBuf>,
}

/// One known environment
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EnvironmentSettings {
    #[validate(length(min = 1))]
    pub name: String,

    pub hostname: Option<String>,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// One built-in probe check
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ProbeSettings {
    #[validate(length(min = 1))]
    pub name: String,

    /// Service name; defaults to the probe name
    pub service: Option<String>,

    #[validate(length(min = 1))]
    pub target_environments: Vec<String>,

    /// Check-level cache duration, e.g. "5m"
    pub cache_for: Option<String>,

    #[serde(default = "default_probe_timeout", with = "humantime_serde")]
    #[validate(custom = "validate_probe_timeout")]
    pub timeout: Duration,

    #[serde(flatten)]
    pub kind: ProbeKind,
}

/// Probe-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProbeKind {
    Tcp {
        address: String,
    },
    Http {
        url: String,
        #[serde(default = "default_http_method")]
        method: String,
        #[serde(default = "default_expected_codes")]
        expected_codes: Vec<u16>,
    },
}

/// Logging settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub level: Option<String>,
    pub format: Option<String>,
}

/// OpenTelemetry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_otlp_endpoint")]
    pub otlp_endpoint: String,
}

fn default_true() -> bool {
    true
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_http_method() -> String {
    "GET".to_string()
}

fn default_expected_codes() -> Vec<u16> {
    vec![200]
}

fn default_otlp_endpoint() -> String {
    "http://localhost:4317".to_string()
}

// Default implementations

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8462".to_string(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            execution_environment: "default".to_string(),
            workers: None,
            default_cache_for: None,
            check_deadline: None,
            rfc1123: true,
        }
    }
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: default_otlp_endpoint(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            engine: EngineSettings::default(),
            cache: CacheSettings::default(),
            environments: vec![EnvironmentSettings {
                name: "default".to_string(),
                hostname: None,
                metadata: BTreeMap::new(),
            }],
            probes: Vec::new(),
            logging: LoggingSettings::default(),
            telemetry: TelemetrySettings::default(),
        }
    }
}

// Custom validators

fn validate_listen_addr(listen: &str) -> Result<(), ValidationError> {
    if listen.trim().is_empty() {
        return Err(ValidationError::new("listen_empty"));
    }
    Ok(())
}

fn validate_probe_timeout(timeout: &Duration) -> Result<(), ValidationError> {
    let millis = timeout.as_millis();
    if !(10..=60_000).contains(&millis) {
        return Err(ValidationError::new("probe_timeout_out_of_range"));
    }
    Ok(())
}

impl Validate for Config {
    fn validate(&self) -> Result<(), ValidationErrors> {
        self.server.validate()?;
        self.engine.validate()?;
        for env in &self.environments {
            env.validate()?;
        }
        for probe in &self.probes {
            probe.validate()?;
        }

        // Cross-field checks the per-section derives cannot express.
        let mut errors = ValidationErrors::new();
        if self.environments.is_empty() {
            errors.add("environments", ValidationError::new("no_environments"));
        }
        let mut names = HashSet::new();
        for env in &self.environments {
            if !names.insert(env.name.as_str()) {
                errors.add(
                    "environments",
                    ValidationError::new("environment_name_duplicate"),
                );
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

// Configuration loading implementation

impl Config {
    /// Load configuration from default search paths
    pub fn load() -> Result<Self, ConfigError> {
        match Self::find_config_file() {
            Some(path) => {
                tracing::info!("Loading configuration from: {}", path.display());
                Self::load_from_file(&path)
            }
            None => {
                tracing::info!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/watchpost/watchpost.yaml")];

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".config/watchpost/watchpost.yaml"));
        }

        paths.push(PathBuf::from("./watchpost.yaml"));

        paths.into_iter().find(|p| p.exists() && p.is_file())
    }
}
