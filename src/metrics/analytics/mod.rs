//! Training analytics.
//!
//! - Activity stress (TSS / IF)
//! - Training load (CTL/ATL/TSB)

pub mod stress;
pub mod training_load;

pub use stress::{activity_stress, StressScore, StressSource};
pub use training_load::{
    analyze, fill_gaps, history, DailyLoad, FitnessLevel, Form, TrainingLoad, TrainingLoadError,
    TrainingLoadPoint,
};
