//! Workout plan types.
//!
//! A [`Plan`] is read-only input: an ordered list of steps, each with a
//! duration and zero or more intensity targets. The recording session only
//! moves its own cursor over it.

use crate::metrics::zones::AthleteThresholds;
use crate::trainer::types::{ControlValue, SimulationParams};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Seconds assumed per repetition when estimating step length for display.
pub const ESTIMATED_SECONDS_PER_REPETITION: u32 = 30;

/// Pace assumed when estimating distance steps for display (seconds per km).
pub const ESTIMATED_SECONDS_PER_KM: u32 = 300;

/// How long a step lasts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepDuration {
    /// Fixed time
    Time { seconds: u32 },
    /// Fixed distance
    Distance { meters: f64 },
    /// Counted repetitions, advanced by hand
    Repetitions { count: u32 },
    /// Open-ended, advanced by hand
    UntilFinished,
}

impl StepDuration {
    /// Whether the session may leave this step without a manual advance.
    pub fn auto_advances(&self) -> bool {
        match self {
            StepDuration::Time { .. } | StepDuration::Distance { .. } => true,
            StepDuration::Repetitions { .. } | StepDuration::UntilFinished => false,
        }
    }

    /// Rough length for schedule display only.
    pub fn estimated_seconds(&self) -> Option<u32> {
        match self {
            StepDuration::Time { seconds } => Some(*seconds),
            StepDuration::Distance { meters } => {
                Some((meters / 1000.0 * ESTIMATED_SECONDS_PER_KM as f64).round() as u32)
            }
            StepDuration::Repetitions { count } => Some(count * ESTIMATED_SECONDS_PER_REPETITION),
            StepDuration::UntilFinished => None,
        }
    }
}

impl std::fmt::Display for StepDuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepDuration::Time { seconds } => write!(f, "{}:{:02}", seconds / 60, seconds % 60),
            StepDuration::Distance { meters } if *meters >= 1000.0 => {
                write!(f, "{:.2} km", meters / 1000.0)
            }
            StepDuration::Distance { meters } => write!(f, "{:.0} m", meters),
            StepDuration::Repetitions { count } => write!(f, "{} reps", count),
            StepDuration::UntilFinished => write!(f, "Until finished"),
        }
    }
}

/// Metric an intensity target refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetMetric {
    Power,
    HeartRate,
    Cadence,
    Grade,
    Resistance,
}

/// Target magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intensity {
    /// Value in the metric's unit
    Absolute { value: f64 },
    /// Percentage of the athlete's threshold (FTP or threshold HR)
    PercentThreshold { percent: f64 },
}

/// Allowed band around the target, in the metric's unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    pub below: f64,
    pub above: f64,
}

/// One target for a step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntensityTarget {
    pub metric: TargetMetric,
    pub intensity: Intensity,
    #[serde(default)]
    pub tolerance: Option<Tolerance>,
}

impl IntensityTarget {
    /// Absolute power target.
    pub fn watts(watts: f64) -> Self {
        Self {
            metric: TargetMetric::Power,
            intensity: Intensity::Absolute { value: watts },
            tolerance: None,
        }
    }

    /// Power target as a percentage of FTP.
    pub fn percent_ftp(percent: f64) -> Self {
        Self {
            metric: TargetMetric::Power,
            intensity: Intensity::PercentThreshold { percent },
            tolerance: None,
        }
    }

    /// Simulated grade target.
    pub fn grade(percent: f64) -> Self {
        Self {
            metric: TargetMetric::Grade,
            intensity: Intensity::Absolute { value: percent },
            tolerance: None,
        }
    }

    /// Add a tolerance band.
    pub fn with_tolerance(mut self, below: f64, above: f64) -> Self {
        self.tolerance = Some(Tolerance { below, above });
        self
    }

    /// Resolve to an absolute value in the metric's unit.
    ///
    /// Percentage targets need the matching threshold; without it the
    /// target cannot be resolved.
    pub fn resolve(&self, thresholds: &AthleteThresholds) -> Option<f64> {
        match (self.intensity, self.metric) {
            (Intensity::Absolute { value }, _) => Some(value),
            (Intensity::PercentThreshold { percent }, TargetMetric::Power) => {
                thresholds.ftp.map(|ftp| ftp as f64 * percent / 100.0)
            }
            (Intensity::PercentThreshold { percent }, TargetMetric::HeartRate) => thresholds
                .threshold_hr
                .map(|lthr| lthr as f64 * percent / 100.0),
            (Intensity::PercentThreshold { .. }, _) => None,
        }
    }

    /// Resolved band `(low, high)` around the target.
    pub fn band(&self, thresholds: &AthleteThresholds) -> Option<(f64, f64)> {
        let value = self.resolve(thresholds)?;
        let tolerance = self.tolerance.unwrap_or(Tolerance {
            below: 0.0,
            above: 0.0,
        });
        Some((value - tolerance.below, value + tolerance.above))
    }
}

/// One step of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub name: String,
    pub duration: StepDuration,
    #[serde(default)]
    pub targets: Vec<IntensityTarget>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl PlanStep {
    /// Create a step without targets.
    pub fn new(name: impl Into<String>, duration: StepDuration) -> Self {
        Self {
            name: name.into(),
            duration,
            targets: Vec::new(),
            notes: None,
        }
    }

    /// Add a target.
    pub fn with_target(mut self, target: IntensityTarget) -> Self {
        self.targets.push(target);
        self
    }

    /// Trainer target implied by the step, if any of its targets is one a
    /// trainer can hold.
    pub fn control_value(&self, thresholds: &AthleteThresholds) -> Option<ControlValue> {
        self.targets.iter().find_map(|target| {
            let value = target.resolve(thresholds)?;
            match target.metric {
                TargetMetric::Power => Some(ControlValue::Power(value)),
                TargetMetric::Grade => Some(ControlValue::Simulation(SimulationParams::grade(value))),
                TargetMetric::Resistance => Some(ControlValue::Resistance(value)),
                TargetMetric::HeartRate | TargetMetric::Cadence => None,
            }
        })
    }
}

/// A structured workout plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub name: String,
    pub steps: Vec<PlanStep>,
}

impl Plan {
    /// Create a plan.
    pub fn new(name: impl Into<String>, steps: Vec<PlanStep>) -> Self {
        Self {
            name: name.into(),
            steps,
        }
    }

    /// Parse a plan from JSON.
    pub fn from_json(json: &str) -> Result<Self, PlanError> {
        let plan: Plan =
            serde_json::from_str(json).map_err(|e| PlanError::Parse(e.to_string()))?;
        plan.validate()?;
        Ok(plan)
    }

    /// Check step durations and targets for values that can never be met.
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.steps.is_empty() {
            return Err(PlanError::Empty);
        }
        for (index, step) in self.steps.iter().enumerate() {
            match step.duration {
                StepDuration::Time { seconds: 0 } => {
                    return Err(PlanError::InvalidStep {
                        index,
                        reason: "time step has zero length".into(),
                    })
                }
                StepDuration::Distance { meters } if !(meters.is_finite() && meters > 0.0) => {
                    return Err(PlanError::InvalidStep {
                        index,
                        reason: format!("distance {} is not positive", meters),
                    })
                }
                StepDuration::Repetitions { count: 0 } => {
                    return Err(PlanError::InvalidStep {
                        index,
                        reason: "zero repetitions".into(),
                    })
                }
                _ => {}
            }
            for target in &step.targets {
                let negative_band = target
                    .tolerance
                    .is_some_and(|t| t.below < 0.0 || t.above < 0.0);
                if negative_band {
                    return Err(PlanError::InvalidStep {
                        index,
                        reason: "negative tolerance".into(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Whether any step expresses intensity relative to FTP.
    pub fn needs_ftp(&self) -> bool {
        self.uses_percent(TargetMetric::Power)
    }

    /// Whether any step expresses intensity relative to threshold HR.
    pub fn needs_threshold_hr(&self) -> bool {
        self.uses_percent(TargetMetric::HeartRate)
    }

    fn uses_percent(&self, metric: TargetMetric) -> bool {
        self.steps.iter().flat_map(|s| &s.targets).any(|t| {
            t.metric == metric && matches!(t.intensity, Intensity::PercentThreshold { .. })
        })
    }

    /// Whether any step carries a target a trainer can hold.
    pub fn has_trainer_targets(&self) -> bool {
        self.steps.iter().flat_map(|s| &s.targets).any(|t| {
            matches!(
                t.metric,
                TargetMetric::Power | TargetMetric::Grade | TargetMetric::Resistance
            )
        })
    }

    /// Whether any step is measured in distance.
    pub fn has_distance_steps(&self) -> bool {
        self.steps
            .iter()
            .any(|s| matches!(s.duration, StepDuration::Distance { .. }))
    }

    /// Estimated plan length for display; open-ended steps count as zero.
    pub fn estimated_seconds(&self) -> u32 {
        self.steps
            .iter()
            .filter_map(|s| s.duration.estimated_seconds())
            .sum()
    }
}

/// Errors in plan structure.
#[derive(Debug, Error, PartialEq)]
pub enum PlanError {
    /// Plan has no steps
    #[error("Plan has no steps")]
    Empty,

    /// Step can never complete or has an impossible target
    #[error("Invalid step {index}: {reason}")]
    InvalidStep { index: usize, reason: String },

    /// Plan JSON could not be parsed
    #[error("Failed to parse plan: {0}")]
    Parse(String),
}
