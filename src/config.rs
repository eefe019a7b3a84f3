//! TOML configuration for the `fieldtrack` binary.
//!
//! Every field has a default, so a partial file (or none at all) is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use photo_capture::{NormalizeOptions, DEFAULT_MAX_WIDTH, DEFAULT_QUALITY, MAX_PHOTO_BYTES};
use serde::{Deserialize, Serialize};

use crate::database;
use crate::error::AppError;
use crate::services::background_sync::DEFAULT_DRAIN_INTERVAL;
use crate::services::position_sampler::SamplerOptions;
use crate::services::uplink::{
    UplinkConfig, DEFAULT_PHOTO_PATH, DEFAULT_POSITION_PATH, DEFAULT_TIMEOUT_SECS,
};

/// Environment variable that overrides the stored collector token
pub const TOKEN_ENV: &str = "FIELDTRACK_TOKEN";
pub const DEFAULT_CONFIG_PATH: &str = "fieldtrack.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Worker the position pings are reported for
    pub worker_id: String,
    pub collector: CollectorConfig,
    pub photos: PhotoConfig,
    pub sampler: SamplerOptions,
    pub storage: StorageConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub base_url: String,
    pub position_path: String,
    pub photo_path: String,
    pub timeout_secs: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            position_path: DEFAULT_POSITION_PATH.to_string(),
            photo_path: DEFAULT_PHOTO_PATH.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhotoConfig {
    pub max_width: u32,
    pub quality: f32,
    pub max_bytes: u64,
}

impl Default for PhotoConfig {
    fn default() -> Self {
        Self {
            max_width: DEFAULT_MAX_WIDTH,
            quality: DEFAULT_QUALITY,
            max_bytes: MAX_PHOTO_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: database::default_database_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub drain_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            drain_interval_secs: DEFAULT_DRAIN_INTERVAL.as_secs(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            worker_id: String::new(),
            collector: CollectorConfig::default(),
            photos: PhotoConfig::default(),
            sampler: SamplerOptions::default(),
            storage: StorageConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Reads and validates a config file
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)
            .map_err(|e| AppError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Like [`AppConfig::load`], but a missing file yields the defaults
    pub fn load_or_default(path: &Path) -> Result<Self, AppError> {
        if !path.exists() {
            log::info!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.collector.base_url.trim().is_empty() {
            return Err(AppError::Config("collector.base_url is empty".to_string()));
        }
        if self.collector.timeout_secs == 0 {
            return Err(AppError::Config(
                "collector.timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.photos.max_width == 0 {
            return Err(AppError::Config(
                "photos.max_width must be greater than 0".to_string(),
            ));
        }
        if !(self.photos.quality > 0.0 && self.photos.quality <= 1.0) {
            return Err(AppError::Config(format!(
                "photos.quality must be in (0, 1], got {}",
                self.photos.quality
            )));
        }
        Ok(())
    }

    /// Worker id, required for position pings
    pub fn require_worker_id(&self) -> Result<&str, AppError> {
        let id = self.worker_id.trim();
        if id.is_empty() {
            return Err(AppError::Config(
                "worker_id is not set in the configuration".to_string(),
            ));
        }
        Ok(id)
    }

    pub fn normalize_options(&self) -> NormalizeOptions {
        NormalizeOptions {
            max_width: self.photos.max_width,
            quality: self.photos.quality,
        }
    }

    pub fn uplink_config(&self) -> UplinkConfig {
        UplinkConfig {
            base_url: self.collector.base_url.clone(),
            position_path: self.collector.position_path.clone(),
            photo_path: self.collector.photo_path.clone(),
            timeout: Duration::from_secs(self.collector.timeout_secs),
            normalize: self.normalize_options(),
            max_photo_bytes: self.photos.max_bytes,
        }
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_secs(self.sync.drain_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.collector.position_path, "/api/workers/current-position");
        assert_eq!(config.collector.photo_path, "/api/photos/upload");
        assert_eq!(config.collector.timeout_secs, 15);
        assert_eq!(config.photos.max_width, 1920);
        assert_eq!(config.photos.max_bytes, 10 * 1024 * 1024);
        assert_eq!(config.drain_interval(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
worker_id = "worker-7"

[collector]
base_url = "https://collector.example.org"

[sampler]
timeout_ms = 0
"#,
        )
        .unwrap();

        assert_eq!(config.worker_id, "worker-7");
        assert_eq!(config.collector.base_url, "https://collector.example.org");
        assert_eq!(config.collector.timeout_secs, 15);
        assert_eq!(config.sampler.timeout_ms, 0);
        assert!(config.sampler.high_accuracy);
        assert_eq!(config.photos.quality, 0.8);
        assert_eq!(config.require_worker_id().unwrap(), "worker-7");
    }

    #[test]
    fn test_uplink_config_carries_photo_limits() {
        let config = AppConfig::from_toml(
            r#"
[collector]
base_url = "https://c.example.org/"
timeout_secs = 5

[photos]
max_width = 1280
quality = 0.6
max_bytes = 1024
"#,
        )
        .unwrap();

        let uplink = config.uplink_config();
        assert_eq!(uplink.timeout, Duration::from_secs(5));
        assert_eq!(uplink.normalize.max_width, 1280);
        assert_eq!(uplink.normalize.quality, 0.6);
        assert_eq!(uplink.max_photo_bytes, 1024);
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_or_default(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_load_written_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fieldtrack.toml");
        let mut config = AppConfig::default();
        config.worker_id = "w-1".to_string();
        config.sync.drain_interval_secs = 120;
        std::fs::write(&path, config.to_toml().unwrap()).unwrap();

        assert_eq!(AppConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fieldtrack.toml");

        std::fs::write(&path, "[photos]\nquality = 0.0\n").unwrap();
        assert!(matches!(AppConfig::load(&path), Err(AppError::Config(_))));

        std::fs::write(&path, "[collector]\ntimeout_secs = 0\n").unwrap();
        assert!(matches!(AppConfig::load(&path), Err(AppError::Config(_))));

        std::fs::write(&path, "worker_id = [").unwrap();
        assert!(matches!(AppConfig::load(&path), Err(AppError::Config(_))));
    }

    #[test]
    fn test_missing_worker_id() {
        assert!(matches!(
            AppConfig::default().require_worker_id(),
            Err(AppError::Config(_))
        ));
    }
}
