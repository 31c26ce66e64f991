use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;
use uuid::Uuid;

use crate::core::bluetooth::{
    BREAK_SEARCH_WINDOW, CHUNK_SIZE, CONNECT_TIMEOUT_SECS, DEFAULT_EVENT_CAPACITY, INTER_CHUNK_DELAY_MS,
    UUID_GLASSES_CHAR, UUID_GLASSES_SERVICE,
};

const CONFIG_DIR_NAME: &str = "glasses-link";
const CONFIG_FILE_NAME: &str = "link_config.json";

/// Link layer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// GATT service holding the glasses characteristic
    pub service_uuid: Uuid,
    /// Characteristic used for writes and notifications
    pub characteristic_uuid: Uuid,
    /// Characters per chunk before the break search kicks in
    pub chunk_size: usize,
    /// Number of positions searched backwards for a break character
    pub break_window: usize,
    pub inter_chunk_delay_ms: u64,
    /// Upper bound for connect plus service discovery
    pub connect_timeout_ms: u64,
    /// Whether peripherals without an advertised name are listed
    pub show_nameless: bool,
    /// Peripherals weaker than this are not listed. `None` lists all.
    pub min_rssi: Option<i16>,
    /// Buffered link events per subscriber
    pub event_capacity: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            service_uuid: UUID_GLASSES_SERVICE,
            characteristic_uuid: UUID_GLASSES_CHAR,
            chunk_size: CHUNK_SIZE,
            break_window: BREAK_SEARCH_WINDOW,
            inter_chunk_delay_ms: INTER_CHUNK_DELAY_MS,
            connect_timeout_ms: CONNECT_TIMEOUT_SECS * 1000,
            show_nameless: false,
            min_rssi: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl LinkConfig {
    pub fn inter_chunk_delay(&self) -> Duration {
        Duration::from_millis(self.inter_chunk_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// `<config dir>/glasses-link/link_config.json`, if the platform has a config dir
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Loads the config from a configuration file.
    pub async fn load_config(path: impl AsRef<Path>) -> Result<Self> {
        let file_path = path.as_ref();

        if !fs::try_exists(file_path).await.unwrap_or(false) {
            warn!("Link config file not found at {:?}, using default.", file_path);
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(file_path).await?;
        let config: Self = serde_json::from_str(&config_json)?;

        info!("Link config loaded from {:?}", file_path);
        Ok(config)
    }

    /// Saves the current config to a configuration file.
    pub async fn save_config(&self, path: impl AsRef<Path>) -> Result<()> {
        let file_path = path.as_ref();
        if let Some(parent) = file_path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            if let Err(e) = fs::create_dir_all(parent).await {
                error!("Failed to create config directory {:?}: {}", parent, e);
                return Err(e.into());
            }
        }

        let config_json = match serde_json::to_string_pretty(&self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize link config to JSON: {}", e);
                return Err(e.into());
            }
        };

        fs::write(file_path, config_json).await?;
        info!("Link config saved to {:?}", file_path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_gives_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = LinkConfig::load_config(dir.path().join("absent.json")).await.unwrap();
        assert_eq!(config, LinkConfig::default());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);
        let config = LinkConfig {
            show_nameless: true,
            min_rssi: Some(-80),
            connect_timeout_ms: 2500,
            ..LinkConfig::default()
        };

        config.save_config(&path).await.unwrap();
        let loaded = LinkConfig::load_config(&path).await.unwrap();
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        tokio::fs::write(&path, r#"{ "chunk_size": 40 }"#).await.unwrap();

        let loaded = LinkConfig::load_config(&path).await.unwrap();
        assert_eq!(loaded.chunk_size, 40);
        assert_eq!(loaded.break_window, BREAK_SEARCH_WINDOW);
        assert_eq!(loaded.service_uuid, UUID_GLASSES_SERVICE);
    }

    #[tokio::test]
    async fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        tokio::fs::write(&path, "not json").await.unwrap();
        assert!(LinkConfig::load_config(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_save_overwrites_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        LinkConfig::default().save_config(&path).await.unwrap();
        let changed = LinkConfig {
            chunk_size: 30,
            ..LinkConfig::default()
        };
        changed.save_config(&path).await.unwrap();

        assert_eq!(LinkConfig::load_config(&path).await.unwrap().chunk_size, 30);
    }

    #[test]
    fn test_durations() {
        let config = LinkConfig::default();
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.inter_chunk_delay(), Duration::from_secs(6));
    }

    #[test]
    fn test_default_path_ends_with_file_name() {
        if let Some(path) = LinkConfig::default_config_path() {
            assert!(path.ends_with("glasses-link/link_config.json"));
        }
    }
}
