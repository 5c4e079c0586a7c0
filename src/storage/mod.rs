//! Storage module for the activity database and configuration.

pub mod config;
pub mod database;
pub mod schema;

pub use config::{
    load_config, load_config_from, save_config, save_config_to, AppConfig, ConfigError,
    RecordingSettings, SensorSettings, TrainerSettings,
};
pub use database::{ActivityStore, DatabaseError, StoredActivity};
