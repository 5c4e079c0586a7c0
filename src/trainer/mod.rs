//! Smart trainer control (ERG, SIM and resistance modes).

pub mod controller;
pub mod repeat;
pub mod types;

pub use controller::{TargetSink, TrainerController};
pub use repeat::{repeat_interval, HoldRepeater};
pub use types::{
    Adjustment, ControlError, ControlMode, ControlPhase, ControlSnapshot, ControlTarget,
    ControlValue, HoldRepeatConfig, ModeRange, SimulationParams, TargetSource,
};
