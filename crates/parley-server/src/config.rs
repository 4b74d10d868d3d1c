//! Server configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file (`PARLEY_CONFIG`, or the default paths)
//! - Environment variables (`PARLEY_*`, nested keys joined with `__`)

use anyhow::{ensure, Context, Result};
use parley_core::store::Backoff;
use parley_core::{StorePolicy, SweeperConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an explicit config file.
const CONFIG_PATH_VAR: &str = "PARLEY_CONFIG";

/// Prefix of environment overrides.
const ENV_PREFIX: &str = "PARLEY";

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Expiry sweep configuration.
    #[serde(default)]
    pub sweeper: SweepConfig,

    /// Store call limits.
    #[serde(default)]
    pub store: StoreConfig,

    /// HTTP layer configuration.
    #[serde(default)]
    pub http: HttpConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Expiry sweep configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Sweep interval in milliseconds.
    #[serde(default = "default_sweep_interval")]
    pub interval_ms: u64,

    /// Silence after which a participant is evicted, in milliseconds.
    #[serde(default = "default_stale_after")]
    pub stale_after_ms: u64,
}

/// Store call limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Per-attempt timeout in milliseconds.
    #[serde(default = "default_store_timeout")]
    pub timeout_ms: u64,

    /// Attempts per call, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial retry delay in milliseconds, doubled per attempt.
    #[serde(default = "default_backoff")]
    pub backoff_ms: u64,
}

/// HTTP layer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Allow cross-origin requests from any origin.
    #[serde(default = "default_true")]
    pub cors: bool,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_true() -> bool {
    true
}

fn default_sweep_interval() -> u64 {
    15_000 // 15 seconds
}

fn default_stale_after() -> u64 {
    10_000 // 10 seconds
}

fn default_store_timeout() -> u64 {
    2_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff() -> u64 {
    50
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            sweeper: SweepConfig::default(),
            store: StoreConfig::default(),
            http: HttpConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_sweep_interval(),
            stale_after_ms: default_stale_after(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_store_timeout(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { cors: true }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl SweepConfig {
    /// Convert to the core sweeper settings.
    #[must_use]
    pub fn to_sweeper_config(&self) -> SweeperConfig {
        SweeperConfig {
            interval: Duration::from_millis(self.interval_ms),
            stale_after: Duration::from_millis(self.stale_after_ms),
        }
    }
}

impl StoreConfig {
    /// Convert to the core store policy.
    #[must_use]
    pub fn to_policy(&self) -> StorePolicy {
        StorePolicy {
            op_timeout: Duration::from_millis(self.timeout_ms),
            max_attempts: self.max_attempts,
            backoff: Backoff::exponential(Duration::from_millis(self.backoff_ms)),
        }
    }
}

/// The config file to load, if any.
///
/// An explicit `PARLEY_CONFIG` is returned even if the file is missing.
fn config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_VAR) {
        return Some(PathBuf::from(shellexpand::tilde(&path).into_owned()));
    }

    let config_paths = [
        "parley.toml",
        "/etc/parley/parley.toml",
        "~/.config/parley/parley.toml",
    ];

    config_paths
        .iter()
        .map(|p| PathBuf::from(shellexpand::tilde(p).into_owned()))
        .find(|p| p.exists())
}

impl Config {
    /// Load configuration from file and environment, falling back to defaults.
    ///
    /// The file named by `PARLEY_CONFIG`, or the first default path that
    /// exists, is the base. `PARLEY_*` variables override it.
    ///
    /// # Errors
    ///
    /// Returns an error if `PARLEY_CONFIG` names a missing or malformed file,
    /// an environment override has the wrong type, or a value is out of range.
    pub fn load() -> Result<Self> {
        let base = match config_path() {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        base.with_env(None)
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or holds an
    /// out-of-range value.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Layer `PARLEY_*` overrides on top of `self`.
    ///
    /// `vars` replaces the process environment when given.
    fn with_env(self, vars: Option<::config::Map<String, String>>) -> Result<Self> {
        let base = ::config::Config::try_from(&self)
            .context("Failed to serialize base configuration")?;
        let env = ::config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .source(vars);

        let config: Config = ::config::Config::builder()
            .add_source(base)
            .add_source(env)
            .build()
            .context("Failed to assemble configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the server cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.sweeper.interval_ms > 0,
            "sweeper.interval_ms must be greater than zero"
        );
        ensure!(
            self.store.timeout_ms > 0,
            "store.timeout_ms must be greater than zero"
        );
        ensure!(
            self.store.max_attempts > 0,
            "store.max_attempts must be at least 1"
        );
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 5000);
        assert_eq!(config.sweeper.interval_ms, 15_000);
        assert_eq!(config.sweeper.stale_after_ms, 10_000);
        assert!(config.http.cors);
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config::default();
        let addr = config.bind_addr().unwrap();
        assert_eq!(addr.port(), 5000);
    }

    #[test]
    fn test_invalid_bind_addr() {
        let config = Config {
            host: "not a host".into(),
            ..Config::default()
        };
        assert!(config.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [sweeper]
            stale_after_ms = 30000

            [store]
            max_attempts = 5
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.sweeper.stale_after_ms, 30_000);
        assert_eq!(config.sweeper.interval_ms, 15_000);
        assert_eq!(config.store.max_attempts, 5);
        assert_eq!(config.store.timeout_ms, 2_000);
    }

    #[test]
    fn test_conversions() {
        let config = Config::default();
        let sweeper = config.sweeper.to_sweeper_config();
        assert_eq!(sweeper.stale_after, Duration::from_secs(10));

        let policy = config.store.to_policy();
        assert_eq!(policy.op_timeout, Duration::from_secs(2));
        assert_eq!(policy.backoff.delay_at(2), Duration::from_millis(100));
    }

    fn env(pairs: &[(&str, &str)]) -> Option<::config::Map<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_from_file() {
        let file = write_config(
            r#"
            port = 7000

            [sweeper]
            interval_ms = 500
        "#,
        );

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.sweeper.interval_ms, 500);
        assert_eq!(config.sweeper.stale_after_ms, 10_000);
    }

    #[test]
    fn test_from_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::from_file(dir.path().join("absent.toml")).is_err());
    }

    #[test]
    fn test_from_file_malformed() {
        let file = write_config("port = \"not a number\"");
        assert!(Config::from_file(file.path()).is_err());
    }

    #[test]
    fn test_env_overrides_file() {
        let file = write_config(
            r#"
            port = 7000

            [sweeper]
            stale_after_ms = 30000
        "#,
        );
        let base = Config::from_file(file.path()).unwrap();

        let config = base
            .with_env(env(&[
                ("PARLEY_PORT", "8080"),
                ("PARLEY_SWEEPER__STALE_AFTER_MS", "20000"),
                ("UNRELATED_PORT", "1"),
            ]))
            .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.sweeper.stale_after_ms, 20_000);
        assert_eq!(config.sweeper.interval_ms, 15_000);
        assert_eq!(config.host, "127.0.0.1");
    }

    #[test]
    fn test_env_without_overrides_keeps_base() {
        let config = Config::default().with_env(env(&[])).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.store.max_attempts, 3);
    }

    #[test]
    fn test_env_override_wrong_type() {
        assert!(Config::default()
            .with_env(env(&[("PARLEY_PORT", "eighty")]))
            .is_err());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let err = Config::default()
            .with_env(env(&[("PARLEY_SWEEPER__INTERVAL_MS", "0")]))
            .unwrap_err();
        assert!(err.to_string().contains("interval_ms"));

        let file = write_config("[sweeper]\ninterval_ms = 0\n");
        assert!(Config::from_file(file.path()).is_err());
    }

    #[test]
    fn test_zero_store_limits_rejected() {
        let mut config = Config::default();
        config.store.timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.store.max_attempts = 0;
        assert!(config.validate().is_err());

        assert!(Config::default().validate().is_ok());
    }
}
