//! Application configuration.
//!
//! Loaded from `config.toml` in the platform data directory. Every section
//! is optional; anything missing falls back to its default.

use crate::metrics::zones::AthleteThresholds;
use crate::recording::types::RecordingConfig;
use crate::sensors::types::SensorConfig;
use crate::trainer::types::HoldRepeatConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application version
    pub version: String,
    /// Data directory path
    #[serde(skip)]
    pub data_dir: PathBuf,
    /// Sensor settings
    pub sensors: SensorSettings,
    /// Trainer control settings
    pub trainer: TrainerSettings,
    /// Recording settings
    pub recording: RecordingSettings,
    /// Athlete thresholds
    pub athlete: AthleteThresholds,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            data_dir: PathBuf::new(),
            sensors: SensorSettings::default(),
            trainer: TrainerSettings::default(),
            recording: RecordingSettings::default(),
            athlete: AthleteThresholds::default(),
        }
    }
}

impl AppConfig {
    /// Path of the activity database.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("activities.db")
    }

    pub fn sensor_config(&self) -> SensorConfig {
        let s = &self.sensors;
        SensorConfig {
            connect_timeout: Duration::from_millis(s.connect_timeout_ms),
            control_write_timeout: Duration::from_millis(s.control_write_timeout_ms),
            reconnect_grace: Duration::from_secs(s.reconnect_grace_secs),
            reading_buffer: s.reading_buffer.max(1),
            wheel_circumference_m: s.wheel_circumference_m,
        }
    }

    pub fn hold_repeat_config(&self) -> HoldRepeatConfig {
        let t = &self.trainer;
        HoldRepeatConfig {
            initial_interval: Duration::from_millis(t.hold_initial_interval_ms),
            min_interval: Duration::from_millis(t.hold_min_interval_ms),
            ramp: Duration::from_millis(t.hold_ramp_ms),
        }
    }

    pub fn recording_config(&self) -> RecordingConfig {
        let r = &self.recording;
        RecordingConfig {
            tick_interval: Duration::from_millis(r.tick_interval_ms.max(1)),
            speed_staleness: Duration::from_millis(r.speed_staleness_ms),
            max_power: r.max_power_filter as f64,
            zone_gap_cap: Duration::from_secs(r.zone_gap_cap_secs),
        }
    }
}

/// Sensor-related settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorSettings {
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Control point write timeout in milliseconds
    pub control_write_timeout_ms: u64,
    /// How long a dropped sensor may reconnect, in seconds
    pub reconnect_grace_secs: u64,
    /// Readings buffered per subscriber
    pub reading_buffer: usize,
    /// Wheel circumference in meters
    pub wheel_circumference_m: f64,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 8000,
            control_write_timeout_ms: 2500,
            reconnect_grace_secs: 10,
            reading_buffer: 1024,
            wheel_circumference_m: 2.105,
        }
    }
}

/// Trainer control settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerSettings {
    /// First repeat interval of a held adjustment
    pub hold_initial_interval_ms: u64,
    /// Fastest repeat interval
    pub hold_min_interval_ms: u64,
    /// Hold time to reach the fastest interval
    pub hold_ramp_ms: u64,
}

impl Default for TrainerSettings {
    fn default() -> Self {
        Self {
            hold_initial_interval_ms: 200,
            hold_min_interval_ms: 50,
            hold_ramp_ms: 2000,
        }
    }
}

/// Recording-related settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingSettings {
    /// Elapsed-time tick interval in milliseconds
    pub tick_interval_ms: u64,
    /// Speed older than this counts as stopped
    pub speed_staleness_ms: u64,
    /// Maximum power filter (values above this are noise)
    pub max_power_filter: u16,
    /// Longest reading gap credited to a zone, in seconds
    pub zone_gap_cap_secs: u64,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            speed_staleness_ms: 3000,
            max_power_filter: 2000,
            zone_gap_cap_secs: 5,
        }
    }
}

/// Get the application data directory.
pub fn get_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "ridelink", "RideLink")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Get the configuration file path.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("config.toml")
}

/// Load application configuration from the default location.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let mut config = load_config_from(&get_config_path())?;
    config.data_dir = get_data_dir();
    Ok(config)
}

/// Load configuration from a file. A missing file yields defaults with the
/// file's directory as data directory.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    let data_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    if !path.exists() {
        tracing::debug!("No config at {}, using defaults", path.display());
        return Ok(AppConfig {
            data_dir,
            ..Default::default()
        });
    }

    let content =
        std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

    let mut config: AppConfig =
        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    config.data_dir = data_dir;

    Ok(config)
}

/// Save configuration to a file.
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
    }

    let content = toml::to_string_pretty(config)
        .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

    Ok(())
}

/// Save configuration to the default location.
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(config, &get_config_path())
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_components() {
        let config = AppConfig::default();

        let sensors = config.sensor_config();
        assert_eq!(sensors.connect_timeout, Duration::from_secs(8));
        assert_eq!(sensors.control_write_timeout, Duration::from_millis(2500));
        assert_eq!(sensors.reconnect_grace, Duration::from_secs(10));

        assert_eq!(config.hold_repeat_config(), HoldRepeatConfig::default());
        assert_eq!(config.recording_config().tick_interval, Duration::from_secs(1));
        assert_eq!(config.athlete, AthleteThresholds::default());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.sensors, SensorSettings::default());
        assert_eq!(config.data_dir, dir.path());
    }

    #[test]
    fn test_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[athlete]\nftp = 250\n\n[sensors]\nwheel_circumference_m = 2.096\n",
        )
        .unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.athlete.ftp, Some(250));
        assert_eq!(config.athlete.threshold_hr, None);
        assert_eq!(config.sensors.wheel_circumference_m, 2.096);
        assert_eq!(config.sensors.connect_timeout_ms, 8000);
        assert_eq!(config.recording, RecordingSettings::default());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.athlete.threshold_hr = Some(168);
        config.trainer.hold_ramp_ms = 1500;
        save_config_to(&config, &path).unwrap();

        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.athlete.threshold_hr, Some(168));
        assert_eq!(loaded.trainer.hold_ramp_ms, 1500);
    }

    #[test]
    fn test_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[sensors\n").unwrap();

        assert!(matches!(load_config_from(&path), Err(ConfigError::ParseError(_))));
    }
}
