//! RideLink - live activity recording and smart-trainer control
//!
//! Connects cycling sensors over BLE, drives FTMS trainers in ERG, SIM and
//! resistance modes, records structured or free rides into compressed
//! streams, and derives training load from stored activities.

pub mod metrics;
pub mod recording;
pub mod sensors;
pub mod storage;
pub mod streams;
pub mod trainer;
pub mod workouts;

// Re-export commonly used types
pub use metrics::zones::AthleteThresholds;
pub use recording::{RecordingSession, SessionHandle};
pub use sensors::manager::SensorManager;
pub use storage::{ActivityStore, AppConfig};
pub use trainer::TrainerController;
pub use workouts::Plan;
