//! Workout plans and plan progress.

pub mod cursor;
pub mod types;

pub use cursor::{AdvanceReason, PlanCursor, StepChange, StepCursor, StepRemaining};
pub use types::{
    Intensity, IntensityTarget, Plan, PlanError, PlanStep, StepDuration, TargetMetric, Tolerance,
};
