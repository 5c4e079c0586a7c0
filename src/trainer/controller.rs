//! FTMS-style trainer controller.
//!
//! Phases: `Idle -> ModeSelected -> TargetApplied -> (TargetApplied | ModeSelected)*`.
//!
//! Mode, target and arbitration source live behind one async mutex that is
//! held for the whole of every transition, including the control point
//! write. Auto reapplication and manual writes therefore never interleave,
//! and a failed write leaves the previous state in place.

use crate::sensors::ftms::{build_request_control, build_reset};
use crate::sensors::manager::SensorManager;
use crate::sensors::transport::Transport;
use crate::sensors::types::ConnectedSensor;
use crate::trainer::repeat::HoldRepeater;
use crate::trainer::types::{
    Adjustment, ControlError, ControlMode, ControlPhase, ControlSnapshot, ControlTarget,
    ControlValue, HoldRepeatConfig, TargetSource,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Receives the plan target for the current workout step.
#[async_trait]
pub trait TargetSink: Send + Sync {
    /// Called whenever the active step changes.
    async fn plan_target_changed(&self, target: Option<ControlValue>) -> Result<(), ControlError>;
}

#[derive(Debug, Default)]
struct ControlState {
    phase: ControlPhase,
    target: Option<ControlTarget>,
    source: TargetSource,
    plan_target: Option<ControlValue>,
    /// Trainer link on which control has been requested
    control_owner: Option<(String, u64)>,
}

/// Drives one controllable trainer through the sensor manager.
pub struct TrainerController<T: Transport> {
    sensors: SensorManager<T>,
    state: Arc<Mutex<ControlState>>,
    locked: Arc<AtomicBool>,
    hold_config: HoldRepeatConfig,
}

impl<T: Transport> Clone for TrainerController<T> {
    fn clone(&self) -> Self {
        Self {
            sensors: self.sensors.clone(),
            state: self.state.clone(),
            locked: self.locked.clone(),
            hold_config: self.hold_config,
        }
    }
}

impl<T: Transport> TrainerController<T> {
    /// Create a controller over a sensor manager.
    pub fn new(sensors: SensorManager<T>, hold_config: HoldRepeatConfig) -> Self {
        Self {
            sensors,
            state: Arc::new(Mutex::new(ControlState::default())),
            locked: Arc::new(AtomicBool::new(false)),
            hold_config,
        }
    }

    /// Create a controller with default hold-repeat timing.
    pub fn with_defaults(sensors: SensorManager<T>) -> Self {
        Self::new(sensors, HoldRepeatConfig::default())
    }

    /// Engage or release the UI lock.
    pub fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::SeqCst);
        tracing::debug!("Trainer controls {}", if locked { "locked" } else { "unlocked" });
    }

    /// Whether the UI lock is engaged.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    /// Read back the controller state.
    ///
    /// `indication` is the trainer's answer to the last control point write,
    /// which tells a write that was sent apart from one that was accepted.
    pub async fn current(&self) -> ControlSnapshot {
        let state = self.state.lock().await;
        let indication = match self.sensors.controllable_trainer().await {
            Some(trainer) => self.sensors.control_indication(&trainer.device_id).await,
            None => None,
        };
        ControlSnapshot {
            phase: state.phase,
            target: state.target,
            source: state.source,
            plan_target: state.plan_target,
            locked: self.is_locked(),
            indication,
        }
    }

    /// Select a control mode and reset the target to the mode default.
    pub async fn set_mode(&self, mode: ControlMode) -> Result<ControlTarget, ControlError> {
        let mut state = self.state.lock().await;
        self.select_mode(&mut state, mode).await
    }

    /// Clamp, snap, encode and write a target for the selected mode.
    pub async fn set_target(&self, value: ControlValue) -> Result<ControlValue, ControlError> {
        let mut state = self.state.lock().await;
        self.apply_target(&mut state, value).await
    }

    /// Move the current target one step up or down.
    pub async fn adjust(&self, adjustment: Adjustment) -> Result<ControlValue, ControlError> {
        let mut state = self.state.lock().await;
        let current = state.target.ok_or(ControlError::NoModeSelected)?;
        let next = current.value.normalized().stepped(adjustment.steps());
        self.apply_target(&mut state, next).await
    }

    /// Send the reset command and return to `Idle`.
    pub async fn reset(&self) -> Result<(), ControlError> {
        let mut state = self.state.lock().await;
        let trainer = self.trainer().await?;

        self.sensors
            .write_control_point(&trainer.device_id, &build_reset())
            .await
            .map_err(ControlError::ControlWrite)?;

        state.phase = ControlPhase::Idle;
        state.target = None;
        state.control_owner = None;
        tracing::info!("Trainer {} reset", trainer.device_id);
        Ok(())
    }

    /// Store the plan's target for the current step and apply it in `Auto`.
    ///
    /// Returns the value written, if any. A target for another mode switches
    /// the mode first.
    pub async fn apply_plan_target(
        &self,
        target: Option<ControlValue>,
    ) -> Result<Option<ControlValue>, ControlError> {
        let mut state = self.state.lock().await;
        state.plan_target = target;

        if state.source == TargetSource::Manual {
            tracing::debug!("Manual control, plan target stored only");
            return Ok(None);
        }
        match target {
            Some(value) => self.apply_plan_value(&mut state, value).await.map(Some),
            None => Ok(None),
        }
    }

    /// Switch between plan-driven and manual targets.
    ///
    /// Returning to `Auto` reapplies the current plan target once.
    pub async fn set_source(
        &self,
        source: TargetSource,
    ) -> Result<Option<ControlValue>, ControlError> {
        let mut state = self.state.lock().await;
        let previous = state.source;
        state.source = source;

        if previous != source {
            tracing::info!("Trainer target source: {:?} -> {:?}", previous, source);
        }

        match (previous, source, state.plan_target) {
            (TargetSource::Manual, TargetSource::Auto, Some(value)) => {
                self.apply_plan_value(&mut state, value).await.map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Start a hold-to-repeat gesture.
    ///
    /// The first adjustment is issued immediately. Each result arrives on the
    /// returned channel. Call [`HoldRepeater::release`] to stop.
    pub fn hold(
        &self,
        adjustment: Adjustment,
    ) -> (
        HoldRepeater,
        mpsc::UnboundedReceiver<Result<ControlValue, ControlError>>,
    ) {
        HoldRepeater::start(self.clone(), adjustment, self.hold_config)
    }

    async fn trainer(&self) -> Result<ConnectedSensor, ControlError> {
        self.sensors
            .controllable_trainer()
            .await
            .ok_or(ControlError::NotControllable)
    }

    async fn select_mode(
        &self,
        state: &mut ControlState,
        mode: ControlMode,
    ) -> Result<ControlTarget, ControlError> {
        let trainer = self.trainer().await?;
        if self.is_locked() {
            return Err(ControlError::Locked);
        }

        // Control is granted per link, so a reconnect needs a fresh request.
        let link = (trainer.device_id.clone(), trainer.link_epoch);
        if state.control_owner.as_ref() != Some(&link) {
            self.sensors
                .write_control_point(&trainer.device_id, &build_request_control())
                .await
                .map_err(ControlError::ControlWrite)?;
            state.control_owner = Some(link);
            tracing::debug!("Requested control of {}", trainer.device_id);
        }

        let target = ControlTarget {
            mode,
            value: mode.default_value(),
        };
        state.target = Some(target);
        state.phase = ControlPhase::ModeSelected;

        tracing::info!("Trainer mode set to {}", mode);
        Ok(target)
    }

    async fn apply_target(
        &self,
        state: &mut ControlState,
        value: ControlValue,
    ) -> Result<ControlValue, ControlError> {
        let selected = state.target.ok_or(ControlError::NoModeSelected)?.mode;
        if value.mode() != selected {
            return Err(ControlError::ModeMismatch {
                selected,
                target: value.mode(),
            });
        }

        let trainer = self.trainer().await?;
        let normalized = value.normalized();

        self.sensors
            .write_control_point(&trainer.device_id, &normalized.to_command())
            .await
            .map_err(ControlError::ControlWrite)?;

        state.target = Some(ControlTarget {
            mode: selected,
            value: normalized,
        });
        state.phase = ControlPhase::TargetApplied;

        tracing::debug!("Applied {} target {:?}", selected, normalized);
        Ok(normalized)
    }

    async fn apply_plan_value(
        &self,
        state: &mut ControlState,
        value: ControlValue,
    ) -> Result<ControlValue, ControlError> {
        if state.target.map(|t| t.mode) != Some(value.mode()) {
            self.select_mode(state, value.mode()).await?;
        }
        self.apply_target(state, value).await
    }
}

#[async_trait]
impl<T: Transport> TargetSink for TrainerController<T> {
    async fn plan_target_changed(&self, target: Option<ControlValue>) -> Result<(), ControlError> {
        self.apply_plan_target(target).await.map(|_| ())
    }
}
