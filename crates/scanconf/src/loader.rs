//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, ScanConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/qrscan/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("qrscan/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("qrscan.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a config file as a raw TOML table.
pub fn read_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    contents
        .parse()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Load a single config file on top of compiled defaults.
pub fn load_from_file(path: &Path) -> Result<ScanConfig, ConfigError> {
    let table = read_table(path)?;
    table_to_config(table, path)
}

/// Deep-merge `overlay` into `base`; nested tables merge key by key.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Turn a merged table into a config, filling gaps with defaults.
pub fn table_to_config(table: toml::Table, path: &Path) -> Result<ScanConfig, ConfigError> {
    toml::Value::Table(table)
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut ScanConfig, sources: &mut ConfigSources) {
    if let Ok(v) = env::var("QRSCAN_TARGET_WIDTH") {
        if let Ok(width) = v.parse() {
            config.session.target_width = width;
            sources.env_overrides.push("QRSCAN_TARGET_WIDTH".to_string());
        }
    }
    if let Ok(v) = env::var("QRSCAN_TARGET_HEIGHT") {
        if let Ok(height) = v.parse() {
            config.session.target_height = height;
            sources.env_overrides.push("QRSCAN_TARGET_HEIGHT".to_string());
        }
    }
    if let Ok(v) = env::var("QRSCAN_FACING") {
        config.session.facing = v;
        sources.env_overrides.push("QRSCAN_FACING".to_string());
    }
    if let Ok(v) = env::var("QRSCAN_HEARTBEAT_TIMEOUT_MS") {
        if let Ok(ms) = v.parse() {
            config.session.heartbeat_timeout_ms = ms;
            sources
                .env_overrides
                .push("QRSCAN_HEARTBEAT_TIMEOUT_MS".to_string());
        }
    }

    if let Ok(v) = env::var("QRSCAN_MODERN_MIN_API_LEVEL") {
        if let Ok(level) = v.parse() {
            config.camera.modern_min_api_level = level;
            sources
                .env_overrides
                .push("QRSCAN_MODERN_MIN_API_LEVEL".to_string());
        }
    }
    if let Ok(v) = env::var("QRSCAN_IMAGE_BUFFER_COUNT") {
        if let Ok(count) = v.parse() {
            config.camera.image_buffer_count = count;
            sources
                .env_overrides
                .push("QRSCAN_IMAGE_BUFFER_COUNT".to_string());
        }
    }

    if let Ok(v) = env::var("QRSCAN_LOG_LEVEL") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("QRSCAN_LOG_LEVEL".to_string());
    }
    // Also support RUST_LOG
    if let Ok(v) = env::var("RUST_LOG") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_minimal_toml() {
        let table: toml::Table = "[session]\nheartbeat_timeout_ms = 1500\n".parse().unwrap();
        let config = table_to_config(table, Path::new("test.toml")).unwrap();
        assert_eq!(config.session.heartbeat_timeout_ms, 1500);
        // Other values should be defaults
        assert_eq!(config.session.target_width, 640);
        assert_eq!(config.camera.image_buffer_count, 5);
    }

    #[test]
    fn test_merge_is_key_by_key() {
        let mut base: toml::Table = r#"
[session]
target_width = 1280
target_height = 720

[camera]
modern_min_api_level = 23
"#
        .parse()
        .unwrap();
        let overlay: toml::Table = "[session]\ntarget_width = 1920\n".parse().unwrap();

        merge_tables(&mut base, overlay);
        let config = table_to_config(base, Path::new("merged")).unwrap();

        assert_eq!(config.session.target_width, 1920);
        assert_eq!(config.session.target_height, 720);
        assert_eq!(config.camera.modern_min_api_level, 23);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[camera]\nimage_buffer_count = 2\n\n[telemetry]\nlog_level = \"debug\"").unwrap();

        let config = load_from_file(file.path()).unwrap();
        assert_eq!(config.camera.image_buffer_count, 2);
        assert_eq!(config.telemetry.log_level, "debug");
    }

    #[test]
    fn test_bad_toml_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[session\ntarget_width = ").unwrap();

        let err = load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains(&file.path().display().to_string()));
    }

    #[test]
    fn test_cli_override_is_discovered() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let files = discover_config_files_with_override(Some(file.path()));
        assert_eq!(files.last().map(PathBuf::as_path), Some(file.path()));
    }
}
