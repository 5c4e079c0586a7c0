//! Metrics module for training calculations and zones.

pub mod analytics;
pub mod smoothing;
pub mod zones;

pub use zones::{AthleteThresholds, HRZones, PowerZones, ZoneHistogram};

pub use analytics::{
    analyze, fill_gaps, FitnessLevel, Form, StressScore, StressSource, TrainingLoad,
    TrainingLoadError, TrainingLoadPoint,
};
