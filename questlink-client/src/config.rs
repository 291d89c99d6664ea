//! Configuration loading for the Questlink client.
//!
//! Every section has a default, so an empty file is a valid configuration.
//! Unknown keys are rejected.

use questlink_core::XpCurve;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV_VAR: &str = "QUESTLINK_CONFIG";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ClientConfig {
    pub endpoint: EndpointConfig,
    pub auth: AuthConfig,
    pub reconnect: ReconnectConfig,
    pub heartbeat_interval_ms: u64,
    /// Upper bound on the wait for the daemon to answer `auth`.
    pub auth_timeout_ms: u64,
    pub idle: IdleConfig,
    pub leveling: LevelingConfig,
    pub retention: RetentionConfig,
    pub state_path: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            auth: AuthConfig::default(),
            reconnect: ReconnectConfig::default(),
            heartbeat_interval_ms: 30_000,
            auth_timeout_ms: 10_000,
            idle: IdleConfig::default(),
            leveling: LevelingConfig::default(),
            retention: RetentionConfig::default(),
            state_path: PathBuf::from("questlink-state.json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EndpointConfig {
    pub url: String,
    pub name: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:4000/ws".to_string(),
            name: "Local daemon".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AuthConfig {
    pub token: Option<String>,
    pub connection_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ReconnectConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
    pub jitter_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_ms: 1_000,
            max_ms: 30_000,
            multiplier: 2.0,
            jitter_ms: 500,
            max_attempts: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct IdleConfig {
    pub sweep_interval_ms: u64,
    pub threshold_ms: u64,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: 30_000,
            threshold_ms: 300_000,
        }
    }
}

impl IdleConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn threshold(&self) -> Duration {
        Duration::from_millis(self.threshold_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LevelingConfig {
    pub xp_per_level: u64,
}

impl Default for LevelingConfig {
    fn default() -> Self {
        Self {
            xp_per_level: questlink_core::DEFAULT_XP_PER_LEVEL,
        }
    }
}

impl LevelingConfig {
    pub fn curve(&self) -> XpCurve {
        XpCurve::new(self.xp_per_level)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RetentionConfig {
    pub activity_log_cap: usize,
    pub loot_cap: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            activity_log_cap: 200,
            loot_cap: 200,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl ClientConfig {
    /// Load from `--config <path>` or `QUESTLINK_CONFIG`, falling back to
    /// defaults when neither is given.
    pub fn load() -> Result<Self, ConfigError> {
        let config = match config_path_from_args().or_else(config_path_from_env) {
            Some(path) => Self::from_path(&path)?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(contents)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.endpoint.url.trim();
        if url.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "endpoint.url",
                reason: "must not be empty".to_string(),
            });
        }
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(ConfigError::InvalidValue {
                field: "endpoint.url",
                reason: "must use ws:// or wss://".to_string(),
            });
        }
        if self.endpoint.name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "endpoint.name",
                reason: "must not be empty".to_string(),
            });
        }
        if self.reconnect.initial_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "reconnect.initial_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.reconnect.max_ms < self.reconnect.initial_ms {
            return Err(ConfigError::InvalidValue {
                field: "reconnect.max_ms",
                reason: "must be >= initial_ms".to_string(),
            });
        }
        if self.reconnect.multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "reconnect.multiplier",
                reason: "must be >= 1.0".to_string(),
            });
        }
        if self.reconnect.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "reconnect.max_attempts",
                reason: "must be > 0".to_string(),
            });
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "heartbeat_interval_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.auth_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "auth_timeout_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.idle.sweep_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "idle.sweep_interval_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.leveling.xp_per_level == 0 {
            return Err(ConfigError::InvalidValue {
                field: "leveling.xp_per_level",
                reason: "must be > 0".to_string(),
            });
        }
        if self.retention.activity_log_cap == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retention.activity_log_cap",
                reason: "must be > 0".to_string(),
            });
        }
        if self.state_path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "state_path",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = ClientConfig::from_toml("").unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.reconnect.max_attempts, 10);
        assert_eq!(config.heartbeat_interval_ms, 30_000);
        assert_eq!(config.auth_timeout_ms, 10_000);
        assert_eq!(config.idle.threshold_ms, 300_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = ClientConfig::from_toml(
            r#"
            [endpoint]
            url = "wss://desk.example:8443/ws"

            [reconnect]
            max_attempts = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.endpoint.url, "wss://desk.example:8443/ws");
        assert_eq!(config.endpoint.name, "Local daemon");
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.reconnect.initial_ms, 1_000);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let err = ClientConfig::from_toml("surprise = true").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validate_rejects_http_url() {
        let mut config = ClientConfig::default();
        config.endpoint.url = "http://desk:4000".to_string();
        match config.validate() {
            Err(ConfigError::InvalidValue { field, .. }) => assert_eq!(field, "endpoint.url"),
            other => panic!("expected invalid endpoint.url, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_shrinking_backoff() {
        let mut config = ClientConfig::default();
        config.reconnect.multiplier = 0.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "reconnect.multiplier",
                ..
            })
        ));
    }
}
