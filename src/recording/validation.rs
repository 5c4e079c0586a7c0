//! Pre-recording checks.
//!
//! Blocking issues prevent a session from starting. Advisory issues let it
//! start only once the rider has acknowledged them.

use crate::metrics::zones::AthleteThresholds;
use crate::sensors::types::{ConnectedSensor, ConnectionState, MetricKind};
use crate::workouts::Plan;
use std::collections::BTreeSet;
use thiserror::Error;

/// Equipment available when a session starts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Preflight {
    /// Connected sensors
    pub sensor_count: usize,
    /// Metrics the connected sensors can report
    pub metrics: BTreeSet<MetricKind>,
    /// A controllable trainer is connected
    pub trainer_connected: bool,
    /// The activity needs a location source (outdoor ride)
    pub requires_location: bool,
    /// A location source is available
    pub location_available: bool,
}

impl Preflight {
    /// Build from the sensors currently connected.
    pub fn from_sensors(sensors: &[ConnectedSensor]) -> Self {
        let live: Vec<&ConnectedSensor> = sensors
            .iter()
            .filter(|s| s.connection_state == ConnectionState::Connected)
            .collect();
        let metrics: BTreeSet<MetricKind> = live
            .iter()
            .flat_map(|s| s.capabilities.metrics.iter().copied())
            .collect();

        Self {
            sensor_count: live.len(),
            location_available: metrics.contains(&MetricKind::Location),
            trainer_connected: live.iter().any(|s| s.is_controllable()),
            metrics,
            requires_location: false,
        }
    }

    /// Mark the activity as needing location.
    pub fn requiring_location(mut self, location_available: bool) -> Self {
        self.requires_location = true;
        self.location_available = self.location_available || location_available;
        self
    }
}

/// How an issue affects starting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Blocking,
    Advisory,
}

/// A single pre-recording finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    /// The plan can never be completed
    InvalidPlan(String),
    /// Location is required but no source is available
    LocationUnavailable,
    /// Nothing is connected
    NoSensors,
    /// Plan targets are relative to FTP, which is unknown
    MissingFtp,
    /// Plan targets are relative to threshold HR, which is unknown
    MissingThresholdHr,
    /// Plan has trainer targets but no trainer is connected
    NoTrainer,
    /// Plan has distance steps but nothing reports speed
    NoSpeedSource,
}

impl ValidationIssue {
    pub fn severity(&self) -> Severity {
        match self {
            ValidationIssue::InvalidPlan(_) | ValidationIssue::LocationUnavailable => {
                Severity::Blocking
            }
            _ => Severity::Advisory,
        }
    }

    pub fn is_blocking(&self) -> bool {
        self.severity() == Severity::Blocking
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationIssue::InvalidPlan(reason) => write!(f, "Invalid plan: {}", reason),
            ValidationIssue::LocationUnavailable => write!(f, "Location required but unavailable"),
            ValidationIssue::NoSensors => write!(f, "No sensors connected"),
            ValidationIssue::MissingFtp => write!(f, "Plan uses %FTP targets but FTP is not set"),
            ValidationIssue::MissingThresholdHr => {
                write!(f, "Plan uses %LTHR targets but threshold HR is not set")
            }
            ValidationIssue::NoTrainer => write!(f, "Plan has trainer targets but no trainer"),
            ValidationIssue::NoSpeedSource => {
                write!(f, "Plan has distance steps but no speed sensor")
            }
        }
    }
}

/// Why a session may not start.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Cannot start: {}", join(.0))]
    Blocking(Vec<ValidationIssue>),
    #[error("Warnings need acknowledgement: {}", join(.0))]
    UnacknowledgedAdvisories(Vec<ValidationIssue>),
}

fn join(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Collect every issue for starting with this plan and equipment.
pub fn validate(
    plan: Option<&Plan>,
    preflight: &Preflight,
    thresholds: &AthleteThresholds,
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if preflight.requires_location && !preflight.location_available {
        issues.push(ValidationIssue::LocationUnavailable);
    }
    if preflight.sensor_count == 0 {
        issues.push(ValidationIssue::NoSensors);
    }

    if let Some(plan) = plan {
        if let Err(e) = plan.validate() {
            issues.push(ValidationIssue::InvalidPlan(e.to_string()));
        }
        if plan.needs_ftp() && thresholds.ftp.filter(|f| *f > 0).is_none() {
            issues.push(ValidationIssue::MissingFtp);
        }
        if plan.needs_threshold_hr() && thresholds.threshold_hr.filter(|h| *h > 0).is_none() {
            issues.push(ValidationIssue::MissingThresholdHr);
        }
        if plan.has_trainer_targets() && !preflight.trainer_connected {
            issues.push(ValidationIssue::NoTrainer);
        }
        if plan.has_distance_steps() && !preflight.metrics.contains(&MetricKind::Speed) {
            issues.push(ValidationIssue::NoSpeedSource);
        }
    }

    issues
}

/// Decide whether the issues allow starting.
///
/// Returns the acknowledged advisories on success.
pub fn check(
    issues: Vec<ValidationIssue>,
    acknowledge_advisories: bool,
) -> Result<Vec<ValidationIssue>, ValidationError> {
    let (blocking, advisory): (Vec<_>, Vec<_>) =
        issues.into_iter().partition(|i| i.is_blocking());

    if !blocking.is_empty() {
        return Err(ValidationError::Blocking(blocking));
    }
    if !advisory.is_empty() && !acknowledge_advisories {
        return Err(ValidationError::UnacknowledgedAdvisories(advisory));
    }
    Ok(advisory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workouts::{IntensityTarget, PlanStep, StepDuration};

    fn equipped() -> Preflight {
        Preflight {
            sensor_count: 2,
            metrics: [MetricKind::Power, MetricKind::Speed].into_iter().collect(),
            trainer_connected: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_clean_start() {
        let issues = validate(None, &equipped(), &AthleteThresholds::default());
        assert!(issues.is_empty());
        assert_eq!(check(issues, false), Ok(vec![]));
    }

    #[test]
    fn test_missing_location_blocks_even_when_acknowledged() {
        let preflight = equipped().requiring_location(false);
        let issues = validate(None, &preflight, &AthleteThresholds::default());
        assert_eq!(issues, vec![ValidationIssue::LocationUnavailable]);
        assert!(matches!(check(issues, true), Err(ValidationError::Blocking(_))));
    }

    #[test]
    fn test_advisory_needs_acknowledgement() {
        let issues = validate(None, &Preflight::default(), &AthleteThresholds::default());
        assert_eq!(issues, vec![ValidationIssue::NoSensors]);

        assert!(matches!(
            check(issues.clone(), false),
            Err(ValidationError::UnacknowledgedAdvisories(_))
        ));
        assert_eq!(check(issues, true), Ok(vec![ValidationIssue::NoSensors]));
    }

    #[test]
    fn test_plan_findings() {
        let plan = Plan::new(
            "Sweet spot",
            vec![
                PlanStep::new("Work", StepDuration::Time { seconds: 600 })
                    .with_target(IntensityTarget::percent_ftp(90.0)),
                PlanStep::new("Out", StepDuration::Distance { meters: 2000.0 }),
            ],
        );
        let preflight = Preflight {
            sensor_count: 1,
            metrics: [MetricKind::HeartRate].into_iter().collect(),
            ..Default::default()
        };

        let issues = validate(Some(&plan), &preflight, &AthleteThresholds::default());
        assert!(issues.contains(&ValidationIssue::MissingFtp));
        assert!(issues.contains(&ValidationIssue::NoTrainer));
        assert!(issues.contains(&ValidationIssue::NoSpeedSource));
        assert!(issues.iter().all(|i| !i.is_blocking()));
    }

    #[test]
    fn test_invalid_plan_blocks() {
        let plan = Plan::new("Empty", vec![]);
        let issues = validate(Some(&plan), &equipped(), &AthleteThresholds::default());
        assert!(matches!(issues[0], ValidationIssue::InvalidPlan(_)));
        assert!(check(issues, true).is_err());
    }
}
