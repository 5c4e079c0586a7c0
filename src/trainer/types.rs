//! Trainer control types: modes, targets, ranges and errors.

use crate::sensors::ftms::{
    build_set_simulation, build_set_target_power, build_set_target_resistance,
};
use crate::sensors::types::{ControlIndication, SensorError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Default rolling resistance coefficient for SIM mode.
pub const DEFAULT_CRR: f64 = 0.004;

/// Wind resistance coefficient sent with SIM commands (kg/m).
pub const DEFAULT_CW: f64 = 0.51;

/// Trainer control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    /// Constant target power
    Erg,
    /// Simulated grade, wind and rolling resistance
    Sim,
    /// Direct resistance level
    Resistance,
}

impl ControlMode {
    /// Allowed range and step of the mode's primary value.
    pub fn range(&self) -> ModeRange {
        match self {
            ControlMode::Erg => ModeRange::ERG,
            ControlMode::Sim => ModeRange::SIM_GRADE,
            ControlMode::Resistance => ModeRange::RESISTANCE,
        }
    }

    /// Target applied when the mode is selected.
    pub fn default_value(&self) -> ControlValue {
        match self {
            ControlMode::Erg => ControlValue::Power(100.0),
            ControlMode::Sim => ControlValue::Simulation(SimulationParams::default()),
            ControlMode::Resistance => ControlValue::Resistance(1.0),
        }
    }

    /// Unit of the mode's primary value.
    pub fn unit(&self) -> &'static str {
        match self {
            ControlMode::Erg => "W",
            ControlMode::Sim => "%",
            ControlMode::Resistance => "level",
        }
    }
}

impl std::fmt::Display for ControlMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlMode::Erg => write!(f, "ERG"),
            ControlMode::Sim => write!(f, "SIM"),
            ControlMode::Resistance => write!(f, "Resistance"),
        }
    }
}

/// Closed interval with a step increment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModeRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl ModeRange {
    /// 0-600 W in 5 W steps
    pub const ERG: ModeRange = ModeRange {
        min: 0.0,
        max: 600.0,
        step: 5.0,
    };

    /// -10% to 20% grade in 0.5% steps
    pub const SIM_GRADE: ModeRange = ModeRange {
        min: -10.0,
        max: 20.0,
        step: 0.5,
    };

    /// Levels 1-20
    pub const RESISTANCE: ModeRange = ModeRange {
        min: 1.0,
        max: 20.0,
        step: 1.0,
    };

    /// Clamp into the range and snap to the nearest step.
    pub fn normalize(&self, value: f64) -> f64 {
        if !value.is_finite() {
            return self.min;
        }
        let clamped = value.clamp(self.min, self.max);
        let steps = ((clamped - self.min) / self.step).round();
        (self.min + steps * self.step).clamp(self.min, self.max)
    }
}

/// Simulation parameters for SIM mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulationParams {
    /// Road grade in percent
    pub grade_percent: f64,
    /// Head wind in m/s
    pub wind_speed_mps: f64,
    /// Rolling resistance coefficient
    pub crr: f64,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            grade_percent: 0.0,
            wind_speed_mps: 0.0,
            crr: DEFAULT_CRR,
        }
    }
}

impl SimulationParams {
    /// Flat road with the given grade.
    pub fn grade(grade_percent: f64) -> Self {
        Self {
            grade_percent,
            ..Default::default()
        }
    }
}

/// Target value; the variant decides which mode it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlValue {
    /// Watts (ERG)
    Power(f64),
    /// Grade, wind and rolling resistance (SIM)
    Simulation(SimulationParams),
    /// Resistance level
    Resistance(f64),
}

impl ControlValue {
    /// Mode this value applies to.
    pub fn mode(&self) -> ControlMode {
        match self {
            ControlValue::Power(_) => ControlMode::Erg,
            ControlValue::Simulation(_) => ControlMode::Sim,
            ControlValue::Resistance(_) => ControlMode::Resistance,
        }
    }

    /// The value checked against the mode range.
    pub fn primary(&self) -> f64 {
        match self {
            ControlValue::Power(watts) => *watts,
            ControlValue::Simulation(params) => params.grade_percent,
            ControlValue::Resistance(level) => *level,
        }
    }

    /// Clamp and snap to the mode's range.
    pub fn normalized(&self) -> ControlValue {
        let range = self.mode().range();
        match self {
            ControlValue::Power(watts) => ControlValue::Power(range.normalize(*watts)),
            ControlValue::Simulation(params) => ControlValue::Simulation(SimulationParams {
                grade_percent: range.normalize(params.grade_percent),
                wind_speed_mps: finite_or(params.wind_speed_mps, 0.0).clamp(-32.0, 32.0),
                crr: finite_or(params.crr, DEFAULT_CRR).clamp(0.0, 0.0255),
            }),
            ControlValue::Resistance(level) => ControlValue::Resistance(range.normalize(*level)),
        }
    }

    /// Same kind of value moved by `steps` increments of the mode's step.
    pub fn stepped(&self, steps: i32) -> ControlValue {
        let delta = steps as f64 * self.mode().range().step;
        match self {
            ControlValue::Power(watts) => ControlValue::Power(watts + delta),
            ControlValue::Simulation(params) => ControlValue::Simulation(SimulationParams {
                grade_percent: params.grade_percent + delta,
                ..*params
            }),
            ControlValue::Resistance(level) => ControlValue::Resistance(level + delta),
        }
    }

    /// Encode as a control point command. Call on normalized values.
    pub fn to_command(&self) -> Vec<u8> {
        match self {
            ControlValue::Power(watts) => build_set_target_power(watts.round() as i16),
            ControlValue::Simulation(params) => build_set_simulation(
                (params.wind_speed_mps * 1000.0).round() as i16,
                (params.grade_percent * 100.0).round() as i16,
                (params.crr * 10000.0).round() as u8,
                (DEFAULT_CW * 100.0).round() as u8,
            ),
            // 0.1 resolution on the wire
            ControlValue::Resistance(level) => build_set_target_resistance((level * 10.0).round() as i16),
        }
    }
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

/// The active target as read back from the controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlTarget {
    pub mode: ControlMode,
    pub value: ControlValue,
}

impl ControlTarget {
    /// Unit of the target's primary value.
    pub fn unit(&self) -> &'static str {
        self.mode.unit()
    }
}

/// Controller protocol phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlPhase {
    #[default]
    Idle,
    ModeSelected,
    TargetApplied,
}

/// Who decides the trainer target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetSource {
    /// Targets follow the workout plan
    #[default]
    Auto,
    /// The rider sets targets by hand
    Manual,
}

/// Direction of a single adjustment step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    Increase,
    Decrease,
}

impl Adjustment {
    /// Signed number of steps.
    pub fn steps(&self) -> i32 {
        match self {
            Adjustment::Increase => 1,
            Adjustment::Decrease => -1,
        }
    }
}

/// Read-only view of the controller.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ControlSnapshot {
    /// Protocol phase
    pub phase: ControlPhase,
    /// Active target, if a mode is selected
    pub target: Option<ControlTarget>,
    /// Auto/manual arbitration
    pub source: TargetSource,
    /// Target requested by the plan for the current step
    pub plan_target: Option<ControlValue>,
    /// Whether the UI lock is engaged
    pub locked: bool,
    /// Trainer's answer to the last control point write
    pub indication: Option<ControlIndication>,
}

impl ControlSnapshot {
    /// Selected mode.
    pub fn mode(&self) -> Option<ControlMode> {
        self.target.map(|t| t.mode)
    }
}

/// Hold-to-repeat timing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HoldRepeatConfig {
    /// Interval after the first write
    pub initial_interval: Duration,
    /// Interval once fully accelerated
    pub min_interval: Duration,
    /// Hold duration over which the interval accelerates
    pub ramp: Duration,
}

impl Default for HoldRepeatConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(200),
            min_interval: Duration::from_millis(50),
            ramp: Duration::from_secs(2),
        }
    }
}

/// Errors from trainer control.
#[derive(Debug, Error)]
pub enum ControlError {
    /// No connected sensor accepts trainer control
    #[error("No controllable trainer connected")]
    NotControllable,

    /// Controls are locked by the UI
    #[error("Trainer controls are locked")]
    Locked,

    /// A target was issued before any mode was selected
    #[error("No control mode selected")]
    NoModeSelected,

    /// The target belongs to a different mode than the selected one
    #[error("Target is for {target} mode but {selected} is selected")]
    ModeMismatch {
        selected: ControlMode,
        target: ControlMode,
    },

    /// The control point write failed or timed out
    #[error("Control write failed: {0}")]
    ControlWrite(#[source] SensorError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_erg_normalize() {
        let range = ModeRange::ERG;
        assert_eq!(range.normalize(250.0), 250.0);
        assert_eq!(range.normalize(252.4), 250.0);
        assert_eq!(range.normalize(252.5), 255.0);
        assert_eq!(range.normalize(-20.0), 0.0);
        assert_eq!(range.normalize(900.0), 600.0);
        assert_eq!(range.normalize(f64::NAN), 0.0);
    }

    #[test]
    fn test_sim_grade_normalize() {
        let range = ModeRange::SIM_GRADE;
        assert_eq!(range.normalize(3.3), 3.5);
        assert_eq!(range.normalize(-12.0), -10.0);
        assert_eq!(range.normalize(25.0), 20.0);
    }

    #[test]
    fn test_resistance_normalize() {
        let range = ModeRange::RESISTANCE;
        assert_eq!(range.normalize(0.0), 1.0);
        assert_eq!(range.normalize(7.4), 7.0);
        assert_eq!(range.normalize(30.0), 20.0);
    }

    #[test]
    fn test_defaults_are_in_range() {
        for mode in [ControlMode::Erg, ControlMode::Sim, ControlMode::Resistance] {
            let value = mode.default_value();
            assert_eq!(value.mode(), mode);
            assert_eq!(value.normalized(), value);
        }
    }

    #[test]
    fn test_commands() {
        assert_eq!(ControlValue::Power(250.0).to_command(), vec![0x05, 0xFA, 0x00]);
        assert_eq!(
            ControlValue::Resistance(5.0).to_command(),
            vec![0x04, 0x32, 0x00]
        );

        let sim = ControlValue::Simulation(SimulationParams::grade(5.0)).to_command();
        assert_eq!(sim, vec![0x11, 0x00, 0x00, 0xF4, 0x01, 40, 51]);
    }

    #[test]
    fn test_stepped() {
        assert_eq!(ControlValue::Power(100.0).stepped(1), ControlValue::Power(105.0));
        assert_eq!(
            ControlValue::Simulation(SimulationParams::grade(1.0)).stepped(-1),
            ControlValue::Simulation(SimulationParams::grade(0.5))
        );
    }
}
