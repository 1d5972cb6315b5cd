//! Suite runner configuration.
//!
//! Configuration is loaded from environment variables. Every setting has a
//! default so a bare `sqltests` invocation runs against the baseline
//! ClickHouse version over the native protocol.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default ClickHouse server image tag.
pub const DEFAULT_CLICKHOUSE_VERSION: &str = "23.8";

/// Default maximum number of readiness probes.
pub const DEFAULT_READINESS_ATTEMPTS: u32 = 30;

/// Default fixed sleep between readiness probes in milliseconds.
pub const DEFAULT_READINESS_INTERVAL_MS: u64 = 1000;

/// Baseline fixture directory used when `SQLTESTS_FIXTURES_DIR` is unset
/// and this directory exists. Resolved against the working directory.
pub const DEFAULT_FIXTURES_DIR: &str = "tests/fixtures";

/// Default `TF_LOG` level for `terraform apply`.
pub const DEFAULT_TF_LOG: &str = "debug";

/// Transport the provider under test uses to reach ClickHouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    #[default]
    Native,
    Http,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Native => "native",
            Protocol::Http => "http",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" => Ok(Protocol::Native),
            "http" => Ok(Protocol::Http),
            other => Err(ConfigError::InvalidProtocol(format!(
                "CLICKHOUSE_PROTOCOL must be 'native' or 'http', got '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid protocol configuration: {0}")]
    InvalidProtocol(String),

    #[error("Invalid readiness configuration: {0}")]
    InvalidReadiness(String),

    #[error("Invalid configuration: {0}")]
    InvalidValue(String),
}

/// Suite runner configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Transport used by the generated provider configuration (default: native).
    pub protocol: Protocol,

    /// ClickHouse image tag pinned at bring-up (default: "23.8").
    pub clickhouse_version: String,

    /// Baseline fixture directory copied into every working directory.
    pub fixtures_dir: Option<PathBuf>,

    /// Maximum number of readiness probes before giving up.
    pub readiness_attempts: u32,

    /// Fixed sleep between readiness probes.
    pub readiness_interval: Duration,

    /// Infra CLI binary (default: "terraform").
    pub terraform_binary: String,

    /// Container CLI binary (default: "docker").
    pub docker_binary: String,

    /// `TF_LOG` value exported to `terraform apply`.
    pub tf_log: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            protocol: Protocol::default(),
            clickhouse_version: DEFAULT_CLICKHOUSE_VERSION.to_string(),
            fixtures_dir: None,
            readiness_attempts: DEFAULT_READINESS_ATTEMPTS,
            readiness_interval: Duration::from_millis(DEFAULT_READINESS_INTERVAL_MS),
            terraform_binary: "terraform".to_string(),
            docker_binary: "docker".to_string(),
            tf_log: DEFAULT_TF_LOG.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::from_vars_in(vars, Path::new(""))
    }

    /// Load configuration, resolving default paths against `base_dir`.
    pub fn from_vars_in(
        vars: &HashMap<String, String>,
        base_dir: &Path,
    ) -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let protocol = match vars.get("CLICKHOUSE_PROTOCOL") {
            Some(value) => value.parse()?,
            None => defaults.protocol,
        };

        let clickhouse_version = match vars.get("CLICKHOUSE_VERSION") {
            Some(value) if value.trim().is_empty() => {
                return Err(ConfigError::InvalidValue(
                    "CLICKHOUSE_VERSION must not be empty".to_string(),
                ));
            }
            Some(value) => value.trim().to_string(),
            None => defaults.clickhouse_version,
        };

        // An empty value disables baseline fixtures.
        let fixtures_dir = match vars.get("SQLTESTS_FIXTURES_DIR") {
            Some(value) if value.is_empty() => None,
            Some(value) => Some(PathBuf::from(value)),
            None => {
                let candidate = base_dir.join(DEFAULT_FIXTURES_DIR);
                candidate.is_dir().then_some(candidate)
            }
        };

        let readiness_attempts = if let Some(value_str) = vars.get("SQLTESTS_READINESS_ATTEMPTS")
        {
            let value: u32 = value_str.parse().map_err(|e| {
                ConfigError::InvalidReadiness(format!(
                    "SQLTESTS_READINESS_ATTEMPTS must be a valid positive integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value == 0 {
                return Err(ConfigError::InvalidReadiness(
                    "SQLTESTS_READINESS_ATTEMPTS must be greater than 0".to_string(),
                ));
            }

            value
        } else {
            defaults.readiness_attempts
        };

        let readiness_interval =
            if let Some(value_str) = vars.get("SQLTESTS_READINESS_INTERVAL_MS") {
                let value: u64 = value_str.parse().map_err(|e| {
                    ConfigError::InvalidReadiness(format!(
                        "SQLTESTS_READINESS_INTERVAL_MS must be a valid integer, got '{}': {}",
                        value_str, e
                    ))
                })?;
                Duration::from_millis(value)
            } else {
                defaults.readiness_interval
            };

        let terraform_binary = vars
            .get("TERRAFORM_BINARY")
            .cloned()
            .unwrap_or(defaults.terraform_binary);

        let docker_binary = vars
            .get("DOCKER_BINARY")
            .cloned()
            .unwrap_or(defaults.docker_binary);

        let tf_log = vars
            .get("SQLTESTS_TF_LOG")
            .cloned()
            .unwrap_or(defaults.tf_log);

        Ok(Config {
            protocol,
            clickhouse_version,
            fixtures_dir,
            readiness_attempts,
            readiness_interval,
            terraform_binary,
            docker_binary,
            tf_log,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vars_success_with_defaults() {
        let base = tempfile::tempdir().unwrap();
        let config = Config::from_vars_in(&HashMap::new(), base.path())
            .expect("Config should load successfully");

        assert_eq!(config.protocol, Protocol::Native);
        assert_eq!(config.clickhouse_version, DEFAULT_CLICKHOUSE_VERSION);
        assert_eq!(config.fixtures_dir, None);
        assert_eq!(config.readiness_attempts, DEFAULT_READINESS_ATTEMPTS);
        assert_eq!(
            config.readiness_interval,
            Duration::from_millis(DEFAULT_READINESS_INTERVAL_MS)
        );
        assert_eq!(config.terraform_binary, "terraform");
        assert_eq!(config.docker_binary, "docker");
        assert_eq!(config.tf_log, "debug");
    }

    #[test]
    fn test_fixtures_dir_defaults_to_existing_tests_fixtures() {
        let base = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(base.path().join(DEFAULT_FIXTURES_DIR)).unwrap();

        let config = Config::from_vars_in(&HashMap::new(), base.path()).unwrap();
        assert_eq!(
            config.fixtures_dir,
            Some(base.path().join(DEFAULT_FIXTURES_DIR))
        );

        let explicit = HashMap::from([(
            "SQLTESTS_FIXTURES_DIR".to_string(),
            "/srv/fixtures".to_string(),
        )]);
        let config = Config::from_vars_in(&explicit, base.path()).unwrap();
        assert_eq!(config.fixtures_dir, Some(PathBuf::from("/srv/fixtures")));

        let disabled = HashMap::from([("SQLTESTS_FIXTURES_DIR".to_string(), String::new())]);
        let config = Config::from_vars_in(&disabled, base.path()).unwrap();
        assert_eq!(config.fixtures_dir, None);
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let vars = HashMap::from([
            ("CLICKHOUSE_PROTOCOL".to_string(), "HTTP".to_string()),
            ("CLICKHOUSE_VERSION".to_string(), "24.3".to_string()),
            (
                "SQLTESTS_FIXTURES_DIR".to_string(),
                "/srv/fixtures".to_string(),
            ),
            ("SQLTESTS_READINESS_ATTEMPTS".to_string(), "5".to_string()),
            (
                "SQLTESTS_READINESS_INTERVAL_MS".to_string(),
                "250".to_string(),
            ),
            ("TERRAFORM_BINARY".to_string(), "tofu".to_string()),
            ("DOCKER_BINARY".to_string(), "podman".to_string()),
            ("SQLTESTS_TF_LOG".to_string(), "trace".to_string()),
        ]);

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.protocol, Protocol::Http);
        assert_eq!(config.clickhouse_version, "24.3");
        assert_eq!(config.fixtures_dir, Some(PathBuf::from("/srv/fixtures")));
        assert_eq!(config.readiness_attempts, 5);
        assert_eq!(config.readiness_interval, Duration::from_millis(250));
        assert_eq!(config.terraform_binary, "tofu");
        assert_eq!(config.docker_binary, "podman");
        assert_eq!(config.tf_log, "trace");
    }

    #[test]
    fn test_unknown_protocol_rejected() {
        let vars = HashMap::from([("CLICKHOUSE_PROTOCOL".to_string(), "grpc".to_string())]);

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidProtocol(msg)) if msg.contains("grpc")));
    }

    #[test]
    fn test_readiness_attempts_rejects_zero() {
        let vars = HashMap::from([(
            "SQLTESTS_READINESS_ATTEMPTS".to_string(),
            "0".to_string(),
        )]);

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidReadiness(_))));
    }

    #[test]
    fn test_readiness_interval_rejects_garbage() {
        let vars = HashMap::from([(
            "SQLTESTS_READINESS_INTERVAL_MS".to_string(),
            "soon".to_string(),
        )]);

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidReadiness(msg)) if msg.contains("soon")));
    }

    #[test]
    fn test_empty_version_rejected() {
        let vars = HashMap::from([("CLICKHOUSE_VERSION".to_string(), "  ".to_string())]);

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_protocol_display_round_trips() {
        assert_eq!(Protocol::Native.to_string(), "native");
        assert_eq!("http".parse::<Protocol>().unwrap(), Protocol::Http);
    }
}
