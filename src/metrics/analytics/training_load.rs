//! Training load (CTL/ATL/TSB).
//!
//! Implements the Performance Management Chart model over a daily stress
//! series:
//! - CTL (Chronic Training Load): 42-day exponentially weighted average
//! - ATL (Acute Training Load): 7-day exponentially weighted average
//! - TSB (Training Stress Balance): CTL - ATL
//!
//! Each day applies `load += α × (stress − load)` with `α = 1 − e^(−1/τ)`.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// CTL time constant in days.
pub const CTL_DAYS: f64 = 42.0;
/// ATL time constant in days.
pub const ATL_DAYS: f64 = 7.0;

/// One calendar day of training stress.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingLoadPoint {
    pub date: NaiveDate,
    pub stress_score: f64,
}

impl TrainingLoadPoint {
    pub fn new(date: NaiveDate, stress_score: f64) -> Self {
        Self { date, stress_score }
    }
}

/// Readiness classification from TSB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Form {
    /// TSB > 25
    Fresh,
    /// 5 <= TSB <= 25
    Optimal,
    /// -10 <= TSB < 5
    Neutral,
    /// -30 <= TSB < -10
    Tired,
    /// TSB < -30
    Overreaching,
}

impl Form {
    pub fn from_tsb(tsb: f64) -> Self {
        if tsb > 25.0 {
            Form::Fresh
        } else if tsb >= 5.0 {
            Form::Optimal
        } else if tsb >= -10.0 {
            Form::Neutral
        } else if tsb >= -30.0 {
            Form::Tired
        } else {
            Form::Overreaching
        }
    }
}

impl std::fmt::Display for Form {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Form::Fresh => write!(f, "Fresh"),
            Form::Optimal => write!(f, "Optimal"),
            Form::Neutral => write!(f, "Neutral"),
            Form::Tired => write!(f, "Tired"),
            Form::Overreaching => write!(f, "Overreaching"),
        }
    }
}

/// Fitness classification from CTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitnessLevel {
    /// CTL < 15
    Untrained,
    /// CTL 15-40
    Recreational,
    /// CTL 40-70
    Trained,
    /// CTL 70-100
    WellTrained,
    /// CTL >= 100
    Elite,
}

impl FitnessLevel {
    pub fn from_ctl(ctl: f64) -> Self {
        if ctl < 15.0 {
            FitnessLevel::Untrained
        } else if ctl < 40.0 {
            FitnessLevel::Recreational
        } else if ctl < 70.0 {
            FitnessLevel::Trained
        } else if ctl < 100.0 {
            FitnessLevel::WellTrained
        } else {
            FitnessLevel::Elite
        }
    }
}

/// Loads after a given day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyLoad {
    pub date: NaiveDate,
    /// Stress recorded that day
    pub stress_score: f64,
    pub ctl: f64,
    pub atl: f64,
    pub tsb: f64,
}

/// Result of [`analyze`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingLoad {
    pub ctl: f64,
    pub atl: f64,
    pub tsb: f64,
    pub form: Form,
    pub fitness_level: FitnessLevel,
}

impl TrainingLoad {
    fn from_loads(ctl: f64, atl: f64) -> Self {
        let tsb = ctl - atl;
        Self {
            ctl,
            atl,
            tsb,
            form: Form::from_tsb(tsb),
            fitness_level: FitnessLevel::from_ctl(ctl),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum TrainingLoadError {
    /// The series skipped, repeated or reordered a day.
    #[error("Series is not one entry per consecutive day: expected {expected}, found {found}")]
    NonContiguousSeries {
        expected: NaiveDate,
        found: NaiveDate,
    },
    #[error("Invalid stress score {score} on {date}")]
    InvalidStress { date: NaiveDate, score: f64 },
}

/// EWMA coefficient for a time constant in days.
pub fn smoothing_factor(days: f64) -> f64 {
    1.0 - (-1.0 / days).exp()
}

/// Per-day trajectory of CTL/ATL/TSB, starting from zero load.
pub fn history(series: &[TrainingLoadPoint]) -> Result<Vec<DailyLoad>, TrainingLoadError> {
    let ctl_alpha = smoothing_factor(CTL_DAYS);
    let atl_alpha = smoothing_factor(ATL_DAYS);

    let mut ctl = 0.0;
    let mut atl = 0.0;
    let mut days = Vec::with_capacity(series.len());

    for (i, point) in series.iter().enumerate() {
        if i > 0 {
            let expected = series[i - 1].date + Duration::days(1);
            if point.date != expected {
                return Err(TrainingLoadError::NonContiguousSeries {
                    expected,
                    found: point.date,
                });
            }
        }
        if !point.stress_score.is_finite() || point.stress_score < 0.0 {
            return Err(TrainingLoadError::InvalidStress {
                date: point.date,
                score: point.stress_score,
            });
        }

        ctl += ctl_alpha * (point.stress_score - ctl);
        atl += atl_alpha * (point.stress_score - atl);

        days.push(DailyLoad {
            date: point.date,
            stress_score: point.stress_score,
            ctl,
            atl,
            tsb: ctl - atl,
        });
    }

    Ok(days)
}

/// Final CTL/ATL/TSB with classifications. An empty series yields zeros.
pub fn analyze(series: &[TrainingLoadPoint]) -> Result<TrainingLoad, TrainingLoadError> {
    let days = history(series)?;
    Ok(match days.last() {
        Some(last) => TrainingLoad::from_loads(last.ctl, last.atl),
        None => TrainingLoad::from_loads(0.0, 0.0),
    })
}

/// Build a contiguous daily series from unordered points.
///
/// Points on the same day are summed; missing days get zero stress.
pub fn fill_gaps(points: &[TrainingLoadPoint]) -> Vec<TrainingLoadPoint> {
    let mut sorted = points.to_vec();
    sorted.sort_by_key(|p| p.date);

    let mut filled: Vec<TrainingLoadPoint> = Vec::with_capacity(sorted.len());
    for point in sorted {
        match filled.last_mut() {
            Some(last) if last.date == point.date => {
                last.stress_score += point.stress_score;
                continue;
            }
            Some(last) => {
                let mut date = last.date + Duration::days(1);
                while date < point.date {
                    filled.push(TrainingLoadPoint::new(date, 0.0));
                    date += Duration::days(1);
                }
            }
            None => {}
        }
        filled.push(point);
    }
    filled
}
