//! # Settings
//!
//! Application settings loaded from a TOML file in the user's config
//! directory. Missing files are created with defaults on first start so the
//! monitor always has a usable configuration.
//!
//! ```text
//! ~/.config/stationwatch/config.toml
//! ├── [broker]         - WebSocket endpoint details and connection limits
//! ├── [notifications]  - whether alerts are delivered as notifications
//! ├── [alerts]         - repeat-alert policy
//! └── [logging]        - tracing level
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::monitor::AlertPolicy;
use crate::notify::NotificationPermission;

const CONFIG_DIR: &str = "stationwatch";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Failed to access settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Broker endpoint and connection tuning.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct BrokerSettings {
    /// WebSocket port of the broker
    pub port: u16,
    /// HTTP path of the MQTT WebSocket endpoint
    pub path: String,
    pub keep_alive_secs: u64,
    /// Upper bound for the broker to acknowledge a connection
    pub connect_timeout_secs: u64,
    /// Capacity of the rumqttc request queue and the transport event channel
    pub channel_capacity: usize,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            port: 9001,
            path: "/mqtt".to_string(),
            keep_alive_secs: 30,
            connect_timeout_secs: 10,
            channel_capacity: 100,
        }
    }
}

impl BrokerSettings {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct NotificationSettings {
    pub enabled: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl NotificationSettings {
    /// Resolves the notification permission once, at startup.
    pub fn permission(&self) -> NotificationPermission {
        if self.enabled {
            NotificationPermission::Granted
        } else {
            NotificationPermission::Denied
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct AlertSettings {
    pub policy: AlertPolicy,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Complete settings file.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub notifications: NotificationSettings,
    pub alerts: AlertSettings,
    pub logging: LoggingSettings,
}

impl Settings {
    /// Default location of the settings file.
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| {
            warn!("Could not determine config directory, using current directory");
            PathBuf::from(".")
        });
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    /// Reads settings from `path`.
    pub async fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| SettingsError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        toml::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Writes settings to `path`, creating parent directories as needed.
    pub async fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let content = toml::to_string_pretty(self)?;
        let io_err = |source: std::io::Error| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        tokio::fs::write(path, content).await.map_err(io_err)
    }

    /// Loads settings from `path`, writing the defaults there first if no
    /// file exists yet.
    pub async fn load_or_init(path: &Path) -> Result<Self, SettingsError> {
        let exists = tokio::fs::try_exists(path)
            .await
            .map_err(|source| SettingsError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        if !exists {
            info!("No settings at {}, writing defaults", path.display());
            let settings = Self::default();
            settings.save(path).await?;
            return Ok(settings);
        }

        debug!("Loading settings from {}", path.display());
        Self::load(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_broker_endpoint() {
        let settings = Settings::default();
        assert_eq!(settings.broker.port, 9001);
        assert_eq!(settings.broker.path, "/mqtt");
        assert_eq!(settings.broker.connect_timeout(), Duration::from_secs(10));
        assert_eq!(settings.alerts.policy, AlertPolicy::EveryMessage);
        assert_eq!(
            settings.notifications.permission(),
            NotificationPermission::Granted
        );
    }

    #[test]
    fn test_partial_file_falls_back_to_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            [alerts]
            policy = "once-per-outage"

            [notifications]
            enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(settings.alerts.policy, AlertPolicy::OncePerOutage);
        assert_eq!(
            settings.notifications.permission(),
            NotificationPermission::Denied
        );
        assert_eq!(settings.broker, BrokerSettings::default());
        assert_eq!(settings.logging.level, "info");
    }

    #[tokio::test]
    async fn test_load_or_init_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        let settings = Settings::load_or_init(&path).await.unwrap();
        assert_eq!(settings, Settings::default());
        assert!(path.exists());

        let reloaded = Settings::load(&path).await.unwrap();
        assert_eq!(reloaded, settings);
    }

    #[tokio::test]
    async fn test_load_rejects_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        tokio::fs::write(&path, "[broker\nport = ").await.unwrap();

        let err = Settings::load(&path).await.unwrap_err();
        assert!(matches!(err, SettingsError::Parse { .. }));
    }
}
