//! Minimal configuration loading for qrscan.
//!
//! Configuration seeds the defaults a scanning session starts from and the
//! knobs that decide how the camera layer is driven. Everything here is read
//! once at startup; a running session never re-reads it.
//!
//! # Usage
//!
//! ```rust,no_run
//! use scanconf::ScanConfig;
//!
//! let config = ScanConfig::load().expect("Failed to load config");
//!
//! println!("heartbeat: {}ms", config.session.heartbeat_timeout_ms);
//! println!("modern camera api from level {}", config.camera.modern_min_api_level);
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins, key by key):
//! 1. `/etc/qrscan/config.toml` (system)
//! 2. `~/.config/qrscan/config.toml` (user)
//! 3. `./qrscan.toml` (local override, or the path given on the command line)
//! 4. Environment variables (`QRSCAN_*`)
//!
//! # Example Config
//!
//! ```toml
//! [session]
//! target_width = 1280
//! target_height = 720
//! facing = "awayFromUser"
//! heartbeat_timeout_ms = 3000
//!
//! [camera]
//! modern_min_api_level = 21
//! image_buffer_count = 5
//!
//! [telemetry]
//! log_level = "info"
//! ```

pub mod loader;
pub mod settings;

pub use loader::{discover_config_files_with_override, ConfigSources};
pub use settings::{CameraConfig, SessionDefaults, TelemetryConfig};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete qrscan configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ScanConfig {
    /// Defaults applied to a `start` request that leaves fields unset.
    #[serde(default)]
    pub session: SessionDefaults,

    /// Camera backend selection and buffering.
    #[serde(default)]
    pub camera: CameraConfig,

    /// Logging.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl ScanConfig {
    /// Load configuration from all sources.
    ///
    /// Load order (later wins):
    /// 1. Compiled defaults
    /// 2. `/etc/qrscan/config.toml`
    /// 3. `~/.config/qrscan/config.toml`
    /// 4. `./qrscan.toml`
    /// 5. Environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            let table = loader::read_table(&path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path);
        }

        let mut config = loader::table_to_config(merged, Path::new("<merged>"))?;
        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Serialize config to a TOML string.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# qrscan configuration\n\n");

        output.push_str("[session]\n");
        output.push_str(&format!("target_width = {}\n", self.session.target_width));
        output.push_str(&format!("target_height = {}\n", self.session.target_height));
        output.push_str(&format!("facing = \"{}\"\n", self.session.facing));
        output.push_str(&format!(
            "heartbeat_timeout_ms = {}\n",
            self.session.heartbeat_timeout_ms
        ));

        output.push_str("\n[camera]\n");
        output.push_str(&format!(
            "modern_min_api_level = {}\n",
            self.camera.modern_min_api_level
        ));
        output.push_str(&format!(
            "image_buffer_count = {}\n",
            self.camera.image_buffer_count
        ));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!("log_level = \"{}\"\n", self.telemetry.log_level));

        output
    }
}
