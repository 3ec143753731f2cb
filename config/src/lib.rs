//! Configuration for assay, loaded from an optional TOML file.
//!
//! Lookup order: an explicit path, then `ASSAY_CONFIG`, then
//! `~/.assay/config.toml`. A missing file yields the defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use assay_types::{Backoff, DependencyMode, RetryPolicy};
use serde::Deserialize;

/// Environment variable naming an alternate config file.
pub const CONFIG_ENV: &str = "ASSAY_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config at {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config at {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AssayConfig {
    pub conductor: ConductorConfig,
    pub retry: RetryConfig,
    pub preflight: PreflightConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConductorConfig {
    pub max_concurrent_executions: usize,
    /// What the scheduler does with steps whose dependencies never resolve.
    pub dependency_mode: DependencyMode,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: 10,
            dependency_mode: DependencyMode::Strict,
        }
    }
}

/// Wall-clock backoff schedule shared by step and preflight retries.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn backoff(&self) -> Backoff {
        Backoff {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms.max(self.initial_delay_ms)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PreflightConfig {
    pub max_attempts: u32,
    pub backoff_factor: f64,
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_factor: 1.0,
        }
    }
}

impl PreflightConfig {
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            backoff_factor: self.backoff_factor,
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_owned(),
        }
    }
}

impl AssayConfig {
    /// Load from the discovered location. No file means defaults.
    pub fn load() -> Result<Self, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load from `path`. A missing file means defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(config),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|path| !path.is_empty()) {
        return Some(PathBuf::from(path));
    }
    dirs::home_dir().map(|home| home.join(".assay").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Duration;

    use assay_types::DependencyMode;

    use super::{AssayConfig, ConfigError};

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AssayConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, AssayConfig::default());
        assert_eq!(config.conductor.max_concurrent_executions, 10);
        assert_eq!(config.preflight.retry_policy().max_attempts, 3);
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let file = write_config(
            r#"
[conductor]
dependency_mode = "lenient"

[retry]
initial_delay_ms = 50
"#,
        );
        let config = AssayConfig::load_from(file.path()).unwrap();
        assert_eq!(config.conductor.dependency_mode, DependencyMode::Lenient);
        assert_eq!(config.conductor.max_concurrent_executions, 10);
        let backoff = config.retry.backoff();
        assert_eq!(backoff.initial_delay, Duration::from_millis(50));
        assert_eq!(backoff.max_delay, Duration::from_secs(10));
    }

    #[test]
    fn max_delay_never_undercuts_initial_delay() {
        let file = write_config("[retry]\ninitial_delay_ms = 5000\nmax_delay_ms = 10\n");
        let backoff = AssayConfig::load_from(file.path()).unwrap().retry.backoff();
        assert_eq!(backoff.max_delay, Duration::from_secs(5));
    }

    #[test]
    fn parse_error_carries_path() {
        let file = write_config("[conductor\nmax_concurrent_executions = 3\n");
        let err = AssayConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert_eq!(err.path(), file.path());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let file = write_config("[conductor]\nworkers = 3\n");
        assert!(matches!(
            AssayConfig::load_from(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn config_error_path_accessor() {
        let path = std::path::PathBuf::from("/tmp/assay-config.toml");
        let err = ConfigError::Read {
            path: path.clone(),
            source: std::io::Error::other("boom"),
        };
        assert_eq!(err.path(), path.as_path());
        assert!(err.to_string().contains("boom"));
    }
}
