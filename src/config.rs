//! Player configuration with persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const APP_DIR: &str = "yogo";
const CONFIG_FILE: &str = "player.json";
const SOCKET_FILE: &str = "yogo-mpv.sock";

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("Config I/O error: {0}")]
  Io(#[from] std::io::Error),
  #[error("Config JSON error: {0}")]
  Json(#[from] serde_json::Error),
  #[error("Invalid config: {0}")]
  Invalid(String),
}

/// Flags passed to MPV that control what happens at the end of a file and on quit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackConfig {
  /// Repeat the current file forever.
  #[serde(default)]
  pub loop_file: bool,

  /// Let MPV remember the playback position when it quits.
  #[serde(default)]
  pub save_position_on_quit: bool,
}

/// Player configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerConfig {
  /// Custom MPV executable path (None = auto-detect).
  #[serde(default)]
  pub mpv_path: Option<String>,

  /// Additional MPV command-line arguments.
  #[serde(default)]
  pub mpv_args: Vec<String>,

  /// IPC socket path (None = per-user runtime directory).
  #[serde(default)]
  pub socket_path: Option<String>,

  #[serde(default)]
  pub playback: PlaybackConfig,
}

impl PlayerConfig {
  /// Default location of the config file.
  pub fn default_path() -> PathBuf {
    dirs::config_dir()
      .unwrap_or_else(|| PathBuf::from("."))
      .join(APP_DIR)
      .join(CONFIG_FILE)
  }

  /// Load the config from `path`, writing the defaults there if the file
  /// does not exist yet.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    if !path.exists() {
      log::info!(
        "Config file not found, creating {} with default values",
        path.display()
      );
      let config = Self::default();
      config.save(path)?;
      return Ok(config);
    }

    let text = std::fs::read_to_string(path)?;
    let config: Self = serde_json::from_str(&text)?;
    config.validate().map_err(ConfigError::Invalid)?;
    log::debug!("Loaded player config from {}", path.display());
    Ok(config)
  }

  /// Write the config as pretty JSON, creating parent directories.
  pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(self)?)?;
    Ok(())
  }

  /// The socket path to use, falling back to the runtime or temp directory.
  pub fn resolved_socket_path(&self) -> PathBuf {
    self
      .socket_path
      .as_ref()
      .filter(|s| !s.trim().is_empty())
      .map(PathBuf::from)
      .unwrap_or_else(|| {
        dirs::runtime_dir()
          .unwrap_or_else(std::env::temp_dir)
          .join(SOCKET_FILE)
      })
  }

  /// Validate configuration values.
  pub fn validate(&self) -> Result<(), String> {
    if let Some(path) = &self.socket_path {
      if path.trim().is_empty() {
        return Err("Socket path cannot be blank".to_string());
      }
    }
    if self.mpv_args.iter().any(|a| a.starts_with("--input-ipc-server")) {
      return Err("mpvArgs cannot override the IPC server path".to_string());
    }
    Ok(())
  }
}
