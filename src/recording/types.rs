//! Recording session types.

use crate::metrics::analytics::StressSource;
use crate::metrics::zones::{AthleteThresholds, ZoneHistogram};
use crate::recording::validation::ValidationError;
use crate::sensors::types::{MetricKind, ReadingValue};
use crate::streams::CompressedStream;
use crate::workouts::{PlanStep, StepCursor, StepRemaining};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Lifecycle of a recording session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, not started
    #[default]
    Idle,
    /// Actively recording
    Recording,
    /// Recording paused
    Paused,
    /// Summary computed, awaiting submit or discard
    Finalizing,
    Submitted,
    Discarded,
}

impl SessionState {
    /// No further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Submitted | SessionState::Discarded)
    }

    /// Recording or paused.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Recording | SessionState::Paused)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Recording => write!(f, "Recording"),
            SessionState::Paused => write!(f, "Paused"),
            SessionState::Finalizing => write!(f, "Finalizing"),
            SessionState::Submitted => write!(f, "Submitted"),
            SessionState::Discarded => write!(f, "Discarded"),
        }
    }
}

/// Configuration for recording sessions.
#[derive(Debug, Clone)]
pub struct RecordingConfig {
    /// Interval of the elapsed-time tick
    pub tick_interval: Duration,
    /// Speed readings older than this count as stopped
    pub speed_staleness: Duration,
    /// Maximum power value before filtering as noise
    pub max_power: f64,
    /// Longest gap between readings credited to a zone
    pub zone_gap_cap: Duration,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            speed_staleness: Duration::from_secs(3),
            max_power: 2000.0,
            zone_gap_cap: Duration::from_secs(5),
        }
    }
}

/// Running sum/count/min/max for one metric.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MetricAggregate {
    pub sum: f64,
    pub count: u64,
    pub min: f64,
    pub max: f64,
}

impl MetricAggregate {
    pub fn add(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.sum += value;
        self.count += 1;
    }

    pub fn average(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    pub fn summary(&self) -> Option<MetricSummary> {
        Some(MetricSummary {
            average: self.average()?,
            min: self.min,
            max: self.max,
            samples: self.count,
        })
    }
}

/// Final statistics for one metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub average: f64,
    pub min: f64,
    pub max: f64,
    pub samples: u64,
}

/// Scalar summary of a finished activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivitySummary {
    /// Unique identifier
    pub session_id: Uuid,
    /// Name of the plan ridden, if any
    pub plan_name: Option<String>,
    /// Wall-clock start
    pub started_at: DateTime<Utc>,
    /// Recorded time, pauses excluded
    pub duration_seconds: f64,
    /// Distance integrated from speed
    pub distance_meters: f64,
    /// Per-metric statistics
    pub metrics: BTreeMap<MetricKind, MetricSummary>,
    /// Normalized Power
    pub normalized_power: Option<f64>,
    /// Intensity Factor
    pub intensity_factor: Option<f64>,
    /// Training Stress Score
    pub tss: Option<f64>,
    /// Signal the stress score was computed from
    pub stress_source: Option<StressSource>,
    /// Seconds in each of the 7 power zones
    pub power_zone_seconds: Option<ZoneHistogram>,
    /// Seconds in each of the 5 heart rate zones
    pub hr_zone_seconds: Option<ZoneHistogram>,
    /// Thresholds in effect for this activity
    pub thresholds: AthleteThresholds,
    /// Plan steps finished before finalizing
    pub steps_completed: usize,
}

impl ActivitySummary {
    /// Average of a metric.
    pub fn average(&self, metric: MetricKind) -> Option<f64> {
        self.metrics.get(&metric).map(|m| m.average)
    }

    /// Maximum of a metric.
    pub fn max(&self, metric: MetricKind) -> Option<f64> {
        self.metrics.get(&metric).map(|m| m.max)
    }
}

/// Everything produced by finalizing a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityPayload {
    pub summary: ActivitySummary,
    pub streams: Vec<CompressedStream>,
}

/// Read-only view of a session for observers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub state: SessionState,
    pub elapsed_seconds: f64,
    pub distance_meters: f64,
    pub plan_name: Option<String>,
    /// `None` without a plan
    pub cursor: Option<StepCursor>,
    pub current_step: Option<PlanStep>,
    pub step_remaining: Option<StepRemaining>,
    /// Most recent value per metric
    pub latest: BTreeMap<MetricKind, ReadingValue>,
}

/// Errors from the recording session.
#[derive(Debug, Error)]
pub enum RecordingError {
    /// The requested action is not allowed in the current state
    #[error("Cannot {action} while {state}")]
    InvalidTransition {
        state: SessionState,
        action: &'static str,
    },

    /// Pre-recording checks failed
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Step navigation requested without a plan
    #[error("Session has no plan")]
    NoPlan,

    /// Every plan step is already finished
    #[error("Plan is already complete")]
    PlanComplete,

    /// The session task is gone
    #[error("Session is closed")]
    SessionClosed,
}
