//! ---
//! corral_section: "01-core-functionality"
//! corral_subsection: "module"
//! corral_type: "source"
//! corral_scope: "code"
//! corral_description: "Shared primitives and utilities for the fleet runtime."
//! corral_version: "v0.1.0-alpha"
//! corral_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::identity::{ProfileId, VersionId};
use crate::logging::LogFormat;

fn default_lock_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_permit_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_dispatcher_workers() -> usize {
    4
}

fn default_version() -> VersionId {
    VersionId::new("1.0").expect("valid default version")
}

fn default_profile() -> ProfileId {
    ProfileId::new("default").expect("valid default profile")
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

/// Primary configuration object for the Corral runtime.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Upper bound for per-container and per-profile-version lock waits.
    #[serde(default = "default_lock_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub lock_timeout: Duration,
    /// Upper bound for permit acquisition against an inactive service.
    #[serde(default = "default_permit_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub permit_timeout: Duration,
    /// Worker threads backing the event dispatcher pool.
    #[serde(default = "default_dispatcher_workers")]
    pub dispatcher_workers: usize,
    /// Profile version assigned to containers started without one.
    #[serde(default = "default_version")]
    pub default_version: VersionId,
    /// Profile assigned to containers started without any.
    #[serde(default = "default_profile")]
    pub default_profile: ProfileId,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "CORRAL_CONFIG";

    /// Load configuration from disk, respecting the `CORRAL_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.dispatcher_workers == 0 {
            return Err(anyhow!("dispatcher_workers must be at least 1"));
        }
        if self.lock_timeout.is_zero() {
            return Err(anyhow!("lock_timeout must be non-zero"));
        }
        if self.permit_timeout.is_zero() {
            return Err(anyhow!("permit_timeout must be non-zero"));
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            lock_timeout: default_lock_timeout(),
            permit_timeout: default_permit_timeout(),
            dispatcher_workers: default_dispatcher_workers(),
            default_version: default_version(),
            default_profile: default_profile(),
            logging: LoggingConfig::default(),
        }
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

/// Logging sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            directory: default_logging_directory(),
            file_prefix: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_empty_document() {
        let config: AppConfig = "".parse().expect("empty config parses");
        assert_eq!(config.lock_timeout, Duration::from_secs(5));
        assert_eq!(config.permit_timeout, Duration::from_secs(10));
        assert_eq!(config.dispatcher_workers, 4);
        assert_eq!(config.default_version.as_str(), "1.0");
        assert_eq!(config.default_profile.canonical(), "default");
    }

    #[test]
    fn overrides_parse_and_validate() {
        let config: AppConfig = r#"
            lock_timeout = 2
            dispatcher_workers = 8
            default_version = "2.0"
            default_profile = "fleet-base"

            [logging]
            format = "pretty"
        "#
        .parse()
        .expect("config parses");
        assert_eq!(config.lock_timeout, Duration::from_secs(2));
        assert_eq!(config.dispatcher_workers, 8);
        assert_eq!(config.default_version.as_str(), "2.0");
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn zero_workers_rejected() {
        let parsed: std::result::Result<AppConfig, _> = "dispatcher_workers = 0".parse();
        assert!(parsed.is_err());
    }

    #[test]
    fn invalid_default_identity_rejected() {
        let parsed: std::result::Result<AppConfig, _> = "default_profile = \"not valid\"".parse();
        assert!(parsed.is_err());
    }
}
