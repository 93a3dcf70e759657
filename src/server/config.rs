use serde::Deserialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::db::models::Monitor;
use crate::db::services::settings_service::{SystemSettings, DEFAULT_RETENTION_DAYS};
use crate::notifications::models::ChannelBinding;

/// Prefix for environment overrides, e.g. `MONITOR_ENGINE_CLEANUP_HOUR=4`.
pub const ENV_PREFIX: &str = "MONITOR_ENGINE_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse TOML from config file at {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("Failed to load config from environment: {0}")]
    Env(#[from] envy::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Data loaded into the bundled store at startup.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct SeedData {
    #[serde(default)]
    pub settings: SystemSettings,
    #[serde(default)]
    pub monitors: Vec<Monitor>,
    #[serde(default)]
    pub channels: Vec<ChannelBinding>,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub log_dir: String,
    /// Local hour at which the retention sweep runs.
    pub cleanup_hour: u32,
    /// Local hour during which certificate reminders may go out.
    pub cert_reminder_hour: u32,
    pub default_retention_days: u32,
    pub seed: SeedData,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            cleanup_hour: 3,
            cert_reminder_hour: 12,
            default_retention_days: DEFAULT_RETENTION_DAYS,
            seed: SeedData::default(),
        }
    }
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
struct PartialEngineConfig {
    log_dir: Option<String>,
    cleanup_hour: Option<u32>,
    cert_reminder_hour: Option<u32>,
    default_retention_days: Option<u32>,
}

#[derive(Deserialize, Default, Debug)]
struct FileConfig {
    #[serde(flatten)]
    engine: PartialEngineConfig,
    #[serde(flatten)]
    seed: SeedData,
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl EngineConfig {
    /// Layers defaults, the optional TOML file and the environment, in that order.
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        let env_config: PartialEngineConfig = envy::prefixed(ENV_PREFIX).from_env()?;
        Self::layered(config_path, env_config)
    }

    fn layered(config_path: Option<&str>, env_config: PartialEngineConfig) -> Result<Self, ConfigError> {
        let file_config = match config_path.map(Path::new) {
            Some(path) if path.exists() => read_file(path)?,
            _ => FileConfig::default(),
        };
        let defaults = EngineConfig::default();
        let file = file_config.engine;

        let config = EngineConfig {
            log_dir: env_config.log_dir.or(file.log_dir).unwrap_or(defaults.log_dir),
            cleanup_hour: env_config
                .cleanup_hour
                .or(file.cleanup_hour)
                .unwrap_or(defaults.cleanup_hour),
            cert_reminder_hour: env_config
                .cert_reminder_hour
                .or(file.cert_reminder_hour)
                .unwrap_or(defaults.cert_reminder_hour),
            default_retention_days: env_config
                .default_retention_days
                .or(file.default_retention_days)
                .unwrap_or(defaults.default_retention_days),
            seed: file_config.seed,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.cleanup_hour > 23 {
            return Err(ConfigError::Invalid(format!(
                "cleanup_hour must be 0-23, got {}",
                self.cleanup_hour
            )));
        }
        if self.cert_reminder_hour > 23 {
            return Err(ConfigError::Invalid(format!(
                "cert_reminder_hour must be 0-23, got {}",
                self.cert_reminder_hour
            )));
        }
        if self.default_retention_days == 0 {
            return Err(ConfigError::Invalid(
                "default_retention_days must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let display = path.display().to_string();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: display.clone(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: display,
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::MonitorConfig;
    use crate::notifications::models::ChannelConfig;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_without_file() {
        let config = EngineConfig::layered(None, PartialEngineConfig::default()).unwrap();
        assert_eq!(config.log_dir, "logs");
        assert_eq!(config.cleanup_hour, 3);
        assert_eq!(config.cert_reminder_hour, 12);
        assert_eq!(config.default_retention_days, 90);
        assert!(config.seed.monitors.is_empty());

        let missing = EngineConfig::layered(Some("/nonexistent/engine.toml"), PartialEngineConfig::default());
        assert!(missing.is_ok());
    }

    #[test]
    fn test_file_values_and_seed_data() {
        let file = write_config(
            r#"
log_dir = "/var/log/engine"
cleanup_hour = 4

[settings]
dataRetentionDays = 30

[settings.proxy]
enabled = true
server = "10.0.0.1"
port = "3128"

[[monitors]]
id = 1
name = "homepage"
type = "http"
interval = 30

[monitors.config]
url = "https://example.com"

[[monitors]]
id = 2
name = "heartbeat"
type = "push"

[monitors.config]
token = "abc"
pushInterval = 120

[[channels]]
monitorId = 1
channelId = 5
channelName = "ops"

[channels.config]
type = "webhook"
url = "https://hooks.example.com/ops"
"#,
        );
        let path = file.path().to_string_lossy().to_string();
        let config = EngineConfig::layered(Some(&path), PartialEngineConfig::default()).unwrap();

        assert_eq!(config.log_dir, "/var/log/engine");
        assert_eq!(config.cleanup_hour, 4);
        assert_eq!(config.seed.settings.data_retention_days, Some(30));
        assert!(config.seed.settings.proxy.proxy_url().is_some());
        assert_eq!(config.seed.monitors.len(), 2);
        assert_eq!(config.seed.monitors[0].interval, 30);
        assert!(matches!(config.seed.monitors[1].config, MonitorConfig::Push(_)));
        assert!(matches!(
            config.seed.channels[0].config,
            ChannelConfig::Webhook { .. }
        ));
    }

    #[test]
    fn test_environment_wins_over_file() {
        let file = write_config("cleanup_hour = 4\ncert_reminder_hour = 9\n");
        let path = file.path().to_string_lossy().to_string();
        let env = PartialEngineConfig {
            cleanup_hour: Some(1),
            ..Default::default()
        };
        let config = EngineConfig::layered(Some(&path), env).unwrap();
        assert_eq!(config.cleanup_hour, 1);
        assert_eq!(config.cert_reminder_hour, 9);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let file = write_config("cleanup_hour = 25\n");
        let path = file.path().to_string_lossy().to_string();
        let err = EngineConfig::layered(Some(&path), PartialEngineConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let broken = write_config("cleanup_hour = \"three\"\n");
        let path = broken.path().to_string_lossy().to_string();
        let err = EngineConfig::layered(Some(&path), PartialEngineConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
