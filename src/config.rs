//! Configuration management for minimon
//!
//! Persists the tick interval, game-detection tuning and the last-selected
//! device per domain. Selections are stored as plain id strings keyed by the
//! domain name ("GPU", "Disk", "Network") and replayed through
//! `select_device` at startup.

use crate::error::{Error, Result};
use crate::game_activity::GameDisplayMode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// minimon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Tick and history options
    #[serde(default)]
    pub general: GeneralConfig,
    /// Game activity detection
    #[serde(default)]
    pub game: GameConfig,
    /// Persisted device selections
    #[serde(default)]
    pub selection: SelectionConfig,
}

/// General polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Update interval in milliseconds
    #[serde(default = "default_update_interval")]
    pub update_interval_ms: u32,
    /// Number of ticks kept in the display history
    #[serde(default = "default_history_length")]
    pub history_length: usize,
}

/// Game activity detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    #[serde(default)]
    pub display_mode: GameDisplayMode,
    /// Window over which GPU usage must stay high to count as sustained
    #[serde(default = "default_sustained_window")]
    pub sustained_window_ms: u32,
    /// GPU usage percentage considered "high"
    #[serde(default = "default_gpu_threshold")]
    pub gpu_usage_threshold: f32,
    /// Process names added to the built-in game list
    #[serde(default)]
    pub extra_game_processes: Vec<String>,
}

/// Last-selected device id per domain
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectionConfig {
    #[serde(default)]
    pub devices: BTreeMap<String, String>,
}

fn default_update_interval() -> u32 {
    1000
}

fn default_history_length() -> usize {
    60
}

fn default_sustained_window() -> u32 {
    5000
}

fn default_gpu_threshold() -> f32 {
    70.0
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: default_update_interval(),
            history_length: default_history_length(),
        }
    }
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            display_mode: GameDisplayMode::default(),
            sustained_window_ms: default_sustained_window(),
            gpu_usage_threshold: default_gpu_threshold(),
            extra_game_processes: Vec::new(),
        }
    }
}

impl SelectionConfig {
    /// Stored id for a domain; empty strings count as "no selection"
    pub fn get(&self, domain: &str) -> Option<&str> {
        self.devices
            .get(domain)
            .map(String::as_str)
            .filter(|id| !id.is_empty())
    }

    /// Record a selection; `None` clears it
    pub fn set(&mut self, domain: &str, id: Option<&str>) {
        match id {
            Some(id) if !id.is_empty() => {
                self.devices.insert(domain.to_string(), id.to_string());
            }
            _ => {
                self.devices.remove(domain);
            }
        }
    }
}

impl Config {
    /// Get the default configuration directory
    ///
    /// Returns `%APPDATA%\minimon` on Windows and `~/.config/minimon` elsewhere.
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = if cfg!(windows) {
            std::env::var("APPDATA")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("."))
        } else {
            std::env::var("HOME")
                .map(|home| PathBuf::from(home).join(".config"))
                .unwrap_or_else(|_| PathBuf::from(".config"))
        };

        Ok(config_dir.join("minimon"))
    }

    /// Load configuration from the default path, or defaults if none exists
    pub fn load() -> Result<Self> {
        let config_file = Self::default_path()?.join("config.toml");
        if !config_file.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&config_file)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| Error::Parse(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Save configuration to the default path
    pub fn save(&self) -> Result<()> {
        let config_dir = Self::default_path()?;
        std::fs::create_dir_all(&config_dir)?;
        self.save_to(&config_dir.join("config.toml"))
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.general.update_interval_ms, 1000);
        assert_eq!(config.general.history_length, 60);
        assert_eq!(config.game.display_mode, GameDisplayMode::AutoDetect);
        assert_eq!(config.game.sustained_window_ms, 5000);
        assert_eq!(config.game.gpu_usage_threshold, 70.0);
        assert!(config.selection.devices.is_empty());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [general]
            update_interval_ms = 500

            [game]
            display_mode = "always_show"
            "#,
        )
        .unwrap();

        assert_eq!(config.general.update_interval_ms, 500);
        assert_eq!(config.general.history_length, 60);
        assert_eq!(config.game.display_mode, GameDisplayMode::AlwaysShow);
        assert_eq!(config.game.sustained_window_ms, 5000);
    }

    #[test]
    fn test_selection_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.selection.set("Disk", Some("disk-00000000000000ab"));
        config.selection.set("Network", Some(""));
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.selection.get("Disk"), Some("disk-00000000000000ab"));
        assert_eq!(loaded.selection.get("Network"), None);
        assert_eq!(loaded.selection.get("GPU"), None);
    }

    #[test]
    fn test_selection_clear() {
        let mut selection = SelectionConfig::default();
        selection.set("GPU", Some("gpu-1"));
        selection.set("GPU", None);
        assert_eq!(selection.get("GPU"), None);
    }

    #[test]
    fn test_load_from_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "general = [").unwrap();
        assert!(matches!(Config::load_from(&path), Err(Error::Parse(_))));
    }
}
