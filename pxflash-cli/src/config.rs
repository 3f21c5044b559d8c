//! Configuration file support for pxflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (PXFLASH_*)
//! 3. Local config file (./pxflash.toml)
//! 4. Global config file (~/.config/pxflash/config.toml)
//!
//! ```toml
//! [port]
//! serial = ["/dev/ttyACM0", "/dev/ttyUSB0"]
//! baud = 115200
//!
//! [upload]
//! wait_secs = 30
//! ```

use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Local config file name, looked up in the working directory.
const LOCAL_CONFIG: &str = "pxflash.toml";

/// Serial port configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PortConfig {
    /// Candidate serial ports, probed in order.
    #[serde(default)]
    pub serial: Vec<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
}

/// Upload configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UploadConfig {
    /// Seconds to wait for the bootloader to appear.
    pub wait_secs: Option<f64>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Port configuration.
    #[serde(default)]
    pub port: PortConfig,
    /// Upload configuration.
    #[serde(default)]
    pub upload: UploadConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Local config overrides global
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => Self::parse(path, &content),
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    fn parse(path: &Path, content: &str) -> Option<Self> {
        match toml::from_str(content) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!("Failed to parse config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "pxflash").map(|dirs| {
            dirs.config_dir()
                .to_path_buf()
        })
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one; set fields in `other` win.
    fn merge(&mut self, other: Self) {
        if !other
            .port
            .serial
            .is_empty()
        {
            self.port
                .serial = other
                .port
                .serial;
        }
        if other
            .port
            .baud
            .is_some()
        {
            self.port
                .baud = other
                .port
                .baud;
        }
        if other
            .upload
            .wait_secs
            .is_some()
        {
            self.upload
                .wait_secs = other
                .upload
                .wait_secs;
        }
    }
}
