//! Configuration sections.

use serde::{Deserialize, Serialize};

/// Defaults for a scanning session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionDefaults {
    /// Requested surface width in pixels.
    /// Default: 640
    #[serde(default = "SessionDefaults::default_target_width")]
    pub target_width: u32,

    /// Requested surface height in pixels.
    /// Default: 480
    #[serde(default = "SessionDefaults::default_target_height")]
    pub target_height: u32,

    /// Lens facing token, `awayFromUser` or `towardsUser`.
    /// Default: awayFromUser
    #[serde(default = "SessionDefaults::default_facing")]
    pub facing: String,

    /// Watchdog timeout; 0 disables it.
    /// Default: 0
    #[serde(default)]
    pub heartbeat_timeout_ms: u64,
}

impl SessionDefaults {
    fn default_target_width() -> u32 {
        640
    }

    fn default_target_height() -> u32 {
        480
    }

    fn default_facing() -> String {
        "awayFromUser".to_string()
    }
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            target_width: Self::default_target_width(),
            target_height: Self::default_target_height(),
            facing: Self::default_facing(),
            heartbeat_timeout_ms: 0,
        }
    }
}

/// Camera backend settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CameraConfig {
    /// Platform camera API level from which the modern backend is used.
    /// Default: 21
    #[serde(default = "CameraConfig::default_modern_min_api_level")]
    pub modern_min_api_level: u32,

    /// Images the modern backend's detection stream may hold at once.
    /// Default: 5
    #[serde(default = "CameraConfig::default_image_buffer_count")]
    pub image_buffer_count: usize,
}

impl CameraConfig {
    fn default_modern_min_api_level() -> u32 {
        21
    }

    fn default_image_buffer_count() -> usize {
        5
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            modern_min_api_level: Self::default_modern_min_api_level(),
            image_buffer_count: Self::default_image_buffer_count(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryConfig {
    /// `tracing-subscriber` env-filter directive.
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}
