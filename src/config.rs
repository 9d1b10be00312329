//! Configuration persistence
//!
//! Stores the server address, the storage location and download tuning in
//! ~/.config/tunestash/config.json. The password is kept in the keyring.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use crate::download::parallel::DEFAULT_PARALLELISM;

const APP_DIR: &str = "tunestash";
const CONFIG_FILE: &str = "config.json";

/// Subsonic server account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub url: String,
    pub username: String,
}

/// Tuning of the download manager and the offline library
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Quiet period before parent entities are notified
    pub notify_debounce_ms: u64,
    /// Concurrent lyrics requests during backfill
    pub lyrics_parallelism: usize,
    /// Give up on a lyrics request after this long
    pub lyrics_timeout_secs: u64,
    /// Maximum number of search results
    pub search_limit: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            notify_debounce_ms: 500,
            lyrics_parallelism: DEFAULT_PARALLELISM,
            lyrics_timeout_secs: 30,
            search_limit: 20,
        }
    }
}

impl DownloadConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.notify_debounce_ms)
    }

    pub fn lyrics_timeout(&self) -> Duration {
        Duration::from_secs(self.lyrics_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: Option<ServerConfig>,
    /// Where offline content and the offline store live
    pub storage_dir: Option<PathBuf>,
    pub download: DownloadConfig,
}

impl Config {
    /// Load the configuration from disk, or defaults if there is none
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            debug!("No config found, using defaults");
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;

        let config: Self =
            serde_json::from_str(&contents).with_context(|| "Failed to parse config")?;

        debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Save the configuration to disk
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }

        let contents =
            serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        debug!("Saved config to {:?}", path);
        Ok(())
    }

    /// Directory holding offline content, defaults to the platform data dir
    pub fn storage_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.storage_dir {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
        Ok(data_dir.join(APP_DIR))
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join(APP_DIR).join(CONFIG_FILE))
    }
}
