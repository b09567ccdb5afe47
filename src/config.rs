//! Application configuration
//!
//! Loaded once from config.json. The file is only ever read; session state is
//! kept in memory.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

use crate::capacity::DVD5_CAPACITY;

/// Global application config
static APP_CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Get the global application config
pub fn get_config() -> &'static AppConfig {
    APP_CONFIG.get_or_init(AppConfig::load)
}

/// Root application configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub capacity: CapacityConfig,
    #[serde(default)]
    pub extract: ExtractConfig,
}

/// Image build defaults
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BuildConfig {
    /// Used when the output name is blank at build time
    #[serde(default = "default_output_name")]
    pub default_output_name: String,
    /// Write a Joliet hierarchy alongside the primary one
    #[serde(default = "default_use_joliet")]
    pub use_joliet: bool,
    /// Place the source tree under a folder named after the source directory
    #[serde(default = "default_wrap_in_source_folder")]
    pub wrap_in_source_folder: bool,
    /// Destination folder offered by default
    #[serde(default)]
    pub default_destination: Option<PathBuf>,
}

fn default_output_name() -> String {
    "OUTPUT".to_string()
}

fn default_use_joliet() -> bool {
    true
}

fn default_wrap_in_source_folder() -> bool {
    true
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            default_output_name: default_output_name(),
            use_joliet: default_use_joliet(),
            wrap_in_source_folder: default_wrap_in_source_folder(),
            default_destination: None,
        }
    }
}

impl BuildConfig {
    /// Configured destination, else the desktop, else home, else the working directory
    pub fn destination(&self) -> PathBuf {
        if let Some(dest) = &self.default_destination {
            return dest.clone();
        }

        let home = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from);

        match home {
            Some(home) => {
                let desktop = home.join("Desktop");
                if desktop.is_dir() {
                    desktop
                } else {
                    home
                }
            }
            None => PathBuf::from("."),
        }
    }
}

/// Capacity readout settings
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CapacityConfig {
    /// Reference capacity in bytes
    #[serde(default = "default_reference_bytes")]
    pub reference_bytes: u64,
}

fn default_reference_bytes() -> u64 {
    DVD5_CAPACITY
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            reference_bytes: default_reference_bytes(),
        }
    }
}

/// Extraction settings
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ExtractConfig {
    /// Staging folder name under the system temp directory
    #[serde(default = "default_staging_dir_name")]
    pub staging_dir_name: String,
}

fn default_staging_dir_name() -> String {
    "IsoExtract".to_string()
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            staging_dir_name: default_staging_dir_name(),
        }
    }
}

impl ExtractConfig {
    pub fn staging_dir(&self) -> PathBuf {
        std::env::temp_dir().join(&self.staging_dir_name)
    }
}

impl AppConfig {
    /// Load configuration from config.json
    pub fn load() -> Self {
        // Try to load from current directory first
        if let Ok(config) = Self::load_from_path("config.json") {
            log::info!("Loaded config from ./config.json");
            return config;
        }

        // Try to load from executable directory
        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                let config_path = exe_dir.join("config.json");
                if let Ok(config) = Self::load_from_path(&config_path) {
                    log::info!("Loaded config from {}", config_path.display());
                    return config;
                }
            }
        }

        log::info!("No config.json found, using defaults");
        Self::default()
    }

    fn load_from_path(path: impl Into<PathBuf>) -> Result<Self, Box<dyn std::error::Error>> {
        let path = path.into();
        let content = fs::read_to_string(&path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }
}
