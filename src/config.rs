//! Configuration management for wagerpool
//!
//! TOML file plus `WAGERPOOL_*` environment overrides, validated before use.

use crate::errors::{ConfigurationError, WagerResult};
use crate::settings::Settings;
use crate::types::Identity;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default wait before a stuck draw may be recovered
pub const DEFAULT_RECOVERY_TIMEOUT_SECS: u64 = 3_600;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WagerPoolConfig {
    pub engine: EngineConfig,
    pub settings: Settings,
    pub oracle: OracleConfig,
    pub logging: LoggingConfig,
}

/// Engine identity, owner and recovery timeout
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Identity the engine presents to oracle adapters
    pub identity: Identity,
    pub owner: Identity,
    pub recovery_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            identity: Identity::new("lottery"),
            owner: Identity::new("owner"),
            recovery_timeout_secs: DEFAULT_RECOVERY_TIMEOUT_SECS,
        }
    }
}

impl EngineConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }
}

/// How randomness reaches the engine
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OracleKind {
    /// Operator loop polls the adapter and pushes values
    Poll,
    /// External VRF service calls back against request ids
    Subscription,
}

impl std::str::FromStr for OracleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "poll" => Ok(OracleKind::Poll),
            "subscription" => Ok(OracleKind::Subscription),
            other => Err(format!("unknown oracle kind '{}'", other)),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OracleConfig {
    pub kind: OracleKind,
    pub identity: Identity,
    /// Owns the adapter; runs the poll loop for poll-based oracles
    pub operator: Identity,
    /// VRF service identity for subscription-based oracles
    pub coordinator: Identity,
    pub poll_interval_ms: u64,
    pub fulfillment_delay_ms: u64,
    pub subscription_id: u64,
    pub key_hash: String,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            kind: OracleKind::Poll,
            identity: Identity::new("randomizer"),
            operator: Identity::new("operator"),
            coordinator: Identity::new("vrf-coordinator"),
            poll_interval_ms: 1_000,
            fulfillment_delay_ms: 0,
            subscription_id: 1,
            key_hash: "0x79d3d8832d904592c0bf9818b621522c988bb8b0c05cdc3b15aea1b6e8db0c15".to_string(),
        }
    }
}

impl OracleConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn fulfillment_delay(&self) -> Duration {
        Duration::from_millis(self.fulfillment_delay_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive, `RUST_LOG` wins if set
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "wagerpool=info".to_string(),
        }
    }
}

/// Configuration loader with environment variable support
#[derive(Default)]
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> WagerResult<WagerPoolConfig> {
        let mut config = match &self.config_path {
            Some(path) => self.load_from_file(path)?,
            None => WagerPoolConfig::default(),
        };

        self.apply_env_overrides(&mut config)?;
        self.validate(&config)?;

        Ok(config)
    }

    fn load_from_file(&self, path: &Path) -> WagerResult<WagerPoolConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Ok(toml::from_str(&content)?)
    }

    fn apply_env_overrides(&self, config: &mut WagerPoolConfig) -> WagerResult<()> {
        if let Ok(owner) = env::var("WAGERPOOL_OWNER") {
            config.engine.owner = Identity::new(owner);
        }
        if let Ok(kind) = env::var("WAGERPOOL_ORACLE_KIND") {
            config.oracle.kind = kind.parse().map_err(|reason| ConfigurationError::InvalidValue {
                field: "WAGERPOOL_ORACLE_KIND".to_string(),
                value: kind.clone(),
                reason,
            })?;
        }
        if let Ok(timeout) = env::var("WAGERPOOL_RECOVERY_TIMEOUT_SECS") {
            config.engine.recovery_timeout_secs =
                timeout.parse().map_err(|_| ConfigurationError::InvalidValue {
                    field: "WAGERPOOL_RECOVERY_TIMEOUT_SECS".to_string(),
                    value: timeout.clone(),
                    reason: "Invalid timeout value".to_string(),
                })?;
        }
        if let Ok(filter) = env::var("WAGERPOOL_LOG") {
            config.logging.filter = filter;
        }
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self, config: &WagerPoolConfig) -> WagerResult<()> {
        config.settings.validate()?;

        for (field, identity) in [
            ("engine.identity", &config.engine.identity),
            ("engine.owner", &config.engine.owner),
            ("oracle.identity", &config.oracle.identity),
            ("oracle.operator", &config.oracle.operator),
        ] {
            if identity.is_empty() {
                return Err(ConfigurationError::MissingRequired(field.to_string()).into());
            }
        }

        if config.engine.recovery_timeout_secs == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "engine.recovery_timeout_secs".to_string(),
                value: "0".to_string(),
                reason: "Recovery timeout cannot be zero".to_string(),
            }
            .into());
        }

        if config.oracle.identity != config.settings.oracle_identity {
            return Err(ConfigurationError::InvalidValue {
                field: "settings.oracle_identity".to_string(),
                value: config.settings.oracle_identity.to_string(),
                reason: format!("does not match oracle.identity '{}'", config.oracle.identity),
            }
            .into());
        }

        if config.oracle.kind == OracleKind::Subscription && config.oracle.coordinator.is_empty() {
            return Err(ConfigurationError::MissingRequired("oracle.coordinator".to_string()).into());
        }

        if config.oracle.kind == OracleKind::Poll && config.oracle.poll_interval_ms == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "oracle.poll_interval_ms".to_string(),
                value: "0".to_string(),
                reason: "Poll interval cannot be zero".to_string(),
            }
            .into());
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, config: &WagerPoolConfig, path: P) -> WagerResult<()> {
        let toml_string = toml::to_string_pretty(config).map_err(|e| {
            ConfigurationError::SaveFailed(format!("Failed to serialize config: {}", e))
        })?;

        std::fs::write(path.as_ref(), toml_string).map_err(|e| {
            ConfigurationError::SaveFailed(format!(
                "Failed to write to {}: {}",
                path.as_ref().display(),
                e
            ))
            .into()
        })
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config<P: AsRef<Path>>(path: P) -> WagerResult<()> {
    ConfigLoader::new().save(&WagerPoolConfig::default(), path)
}
