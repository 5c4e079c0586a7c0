//! Position within a plan.
//!
//! The cursor is either a valid step index or [`StepCursor::Complete`].
//! Auto-advancement is evaluated after elapsed time and distance have been
//! updated for a tick, so the tick that crosses a threshold still belongs to
//! the outgoing step.

use crate::workouts::types::{Plan, PlanStep, StepDuration};
use serde::{Deserialize, Serialize};

/// Cursor position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepCursor {
    /// Index into the plan's steps
    Step(usize),
    /// Past the last step
    Complete,
}

impl StepCursor {
    /// Step index, if not complete.
    pub fn index(&self) -> Option<usize> {
        match self {
            StepCursor::Step(index) => Some(*index),
            StepCursor::Complete => None,
        }
    }
}

/// Why the cursor moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceReason {
    /// Time or distance threshold reached
    Auto,
    /// Explicit advance request
    Manual,
}

/// A cursor move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepChange {
    pub from: StepCursor,
    pub to: StepCursor,
    pub reason: AdvanceReason,
}

/// Remaining part of the current step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepRemaining {
    Seconds(f64),
    Meters(f64),
    /// Manual steps have no measurable remainder
    Open,
}

/// Tracks the current step and where it began.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanCursor {
    position: StepCursor,
    step_started_elapsed: f64,
    step_started_distance: f64,
}

impl PlanCursor {
    /// Cursor at the first step, or complete for an empty plan.
    pub fn start(plan: &Plan) -> Self {
        Self {
            position: if plan.steps.is_empty() {
                StepCursor::Complete
            } else {
                StepCursor::Step(0)
            },
            step_started_elapsed: 0.0,
            step_started_distance: 0.0,
        }
    }

    /// Current position.
    pub fn position(&self) -> StepCursor {
        self.position
    }

    /// Current step.
    pub fn current_step<'a>(&self, plan: &'a Plan) -> Option<&'a PlanStep> {
        self.position.index().and_then(|i| plan.steps.get(i))
    }

    /// Seconds spent in the current step.
    pub fn elapsed_in_step(&self, elapsed: f64) -> f64 {
        (elapsed - self.step_started_elapsed).max(0.0)
    }

    /// Meters covered in the current step.
    pub fn distance_in_step(&self, distance: f64) -> f64 {
        (distance - self.step_started_distance).max(0.0)
    }

    /// Remaining part of the current step.
    pub fn remaining(&self, plan: &Plan, elapsed: f64, distance: f64) -> Option<StepRemaining> {
        let step = self.current_step(plan)?;
        Some(match step.duration {
            StepDuration::Time { seconds } => {
                StepRemaining::Seconds((seconds as f64 - self.elapsed_in_step(elapsed)).max(0.0))
            }
            StepDuration::Distance { meters } => {
                StepRemaining::Meters((meters - self.distance_in_step(distance)).max(0.0))
            }
            StepDuration::Repetitions { .. } | StepDuration::UntilFinished => StepRemaining::Open,
        })
    }

    /// Auto-advance past every step whose threshold has been reached.
    ///
    /// Time steps hand over at their exact boundary so later steps keep the
    /// plan's schedule even when ticks jitter.
    pub fn evaluate(&mut self, plan: &Plan, elapsed: f64, distance: f64) -> Vec<StepChange> {
        let mut changes = Vec::new();

        while let Some(step) = self.current_step(plan) {
            let (started_elapsed, started_distance) = match step.duration {
                StepDuration::Time { seconds } => {
                    if self.elapsed_in_step(elapsed) < seconds as f64 {
                        break;
                    }
                    (self.step_started_elapsed + seconds as f64, distance)
                }
                StepDuration::Distance { meters } => {
                    if self.distance_in_step(distance) < meters {
                        break;
                    }
                    (elapsed, self.step_started_distance + meters)
                }
                StepDuration::Repetitions { .. } | StepDuration::UntilFinished => break,
            };

            changes.push(self.move_next(plan, started_elapsed, started_distance, AdvanceReason::Auto));
        }

        changes
    }

    /// Move to the next step regardless of thresholds.
    pub fn advance(&mut self, plan: &Plan, elapsed: f64, distance: f64) -> Option<StepChange> {
        self.position.index()?;
        Some(self.move_next(plan, elapsed, distance, AdvanceReason::Manual))
    }

    fn move_next(
        &mut self,
        plan: &Plan,
        started_elapsed: f64,
        started_distance: f64,
        reason: AdvanceReason,
    ) -> StepChange {
        let from = self.position;
        self.position = match from {
            StepCursor::Step(index) if index + 1 < plan.steps.len() => StepCursor::Step(index + 1),
            _ => StepCursor::Complete,
        };
        self.step_started_elapsed = started_elapsed;
        self.step_started_distance = started_distance;

        StepChange {
            from,
            to: self.position,
            reason,
        }
    }
}
