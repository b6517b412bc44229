//! Configuration management for teleterm.
//!
//! This module provides:
//! - TOML configuration file loading from `~/.teleterm/config.toml`
//! - The documented defaults applied to optional session arguments
//! - Worker and logging settings
//!
//! # Configuration File
//!
//! The configuration file is located at `~/.teleterm/config.toml`:
//!
//! ```toml
//! [defaults]
//! port = "23"
//! font_name = "monospace"
//! font_size = 12
//!
//! [display]
//! width = 1024
//! height = 768
//! dpi = 96
//!
//! [worker]
//! poll_interval_ms = 20
//! connect_timeout_secs = 10
//! terminal_type = "linux"
//!
//! [log]
//! level = "info"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Default telnet service port
pub const DEFAULT_PORT: &str = "23";
/// Default terminal font
pub const DEFAULT_FONT_NAME: &str = "monospace";
/// Default terminal font size, in points
pub const DEFAULT_FONT_SIZE: i32 = 12;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Defaults for optional session arguments
    pub defaults: SessionDefaults,
    /// Display fallback when the host announces nothing
    pub display: DisplayConfig,
    /// Session worker settings
    pub worker: WorkerConfig,
    /// Logging settings
    pub log: LogConfig,
}

/// Documented defaults for the optional session arguments
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionDefaults {
    pub port: String,
    pub font_name: String,
    pub font_size: i32,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            font_name: DEFAULT_FONT_NAME.to_string(),
            font_size: DEFAULT_FONT_SIZE,
        }
    }
}

/// Display configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    pub dpi: u32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 768,
            dpi: 96,
        }
    }
}

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Read timeout of the worker loop; bounds how long a stop request waits
    pub poll_interval_ms: u64,
    pub connect_timeout_secs: u64,
    /// Reported to the server during TTYPE negotiation
    pub terminal_type: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 20,
            connect_timeout_secs: 10,
            terminal_type: "linux".to_string(),
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl LogConfig {
    /// Log file path, falling back to `~/.teleterm/teleterm.log`
    pub fn file_path(&self) -> PathBuf {
        if let Some(ref file) = self.file {
            return file.clone();
        }
        config_dir()
            .map(|dir| dir.join("teleterm.log"))
            .unwrap_or_else(|| PathBuf::from("teleterm.log"))
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Self {
        match Self::get_config_path() {
            Some(path) if path.exists() => Self::load_from(&path).unwrap_or_else(|e| {
                warn!("Ignoring config {}: {}", path.display(), e);
                Self::default()
            }),
            _ => Self::default(),
        }
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Get config file path
    fn get_config_path() -> Option<PathBuf> {
        config_dir().map(|dir| dir.join("config.toml"))
    }
}

fn config_dir() -> Option<PathBuf> {
    home_dir().map(|home| home.join(".teleterm"))
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}
