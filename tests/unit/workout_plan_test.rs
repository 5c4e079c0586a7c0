//! Unit tests for plans and the plan cursor.

use ridelink::metrics::AthleteThresholds;
use ridelink::trainer::ControlValue;
use ridelink::workouts::{
    AdvanceReason, IntensityTarget, Plan, PlanCursor, PlanStep, StepCursor, StepDuration,
    StepRemaining,
};

fn mixed_plan() -> Plan {
    Plan::new(
        "Mixed",
        vec![
            PlanStep::new("Warmup", StepDuration::Time { seconds: 60 })
                .with_target(IntensityTarget::percent_ftp(50.0)),
            PlanStep::new("Climb", StepDuration::Distance { meters: 1000.0 })
                .with_target(IntensityTarget::grade(5.0)),
            PlanStep::new("Spin", StepDuration::UntilFinished),
        ],
    )
}

#[test]
fn test_mixed_plan_progression() {
    let plan = mixed_plan();
    let mut cursor = PlanCursor::start(&plan);

    assert!(cursor.evaluate(&plan, 59.0, 400.0).is_empty());
    assert_eq!(
        cursor.remaining(&plan, 59.0, 400.0),
        Some(StepRemaining::Seconds(1.0))
    );

    let changes = cursor.evaluate(&plan, 60.0, 420.0);
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].to, StepCursor::Step(1));
    assert_eq!(changes[0].reason, AdvanceReason::Auto);

    // Distance counts from where the step began
    assert!(cursor.evaluate(&plan, 200.0, 1400.0).is_empty());
    cursor.evaluate(&plan, 210.0, 1420.0);
    assert_eq!(cursor.position(), StepCursor::Step(2));

    assert!(cursor.evaluate(&plan, 10_000.0, 50_000.0).is_empty());
    assert_eq!(
        cursor.remaining(&plan, 10_000.0, 50_000.0),
        Some(StepRemaining::Open)
    );

    let change = cursor.advance(&plan, 10_000.0, 50_000.0).unwrap();
    assert_eq!(change.to, StepCursor::Complete);
    assert_eq!(change.reason, AdvanceReason::Manual);
}

#[test]
fn test_step_control_values() {
    let plan = mixed_plan();
    let thresholds = AthleteThresholds {
        ftp: Some(280),
        ..Default::default()
    };

    assert_eq!(
        plan.steps[0].control_value(&thresholds),
        Some(ControlValue::Power(140.0))
    );
    assert!(matches!(
        plan.steps[1].control_value(&thresholds),
        Some(ControlValue::Simulation(p)) if p.grade_percent == 5.0
    ));
    assert_eq!(plan.steps[2].control_value(&thresholds), None);
    assert_eq!(
        plan.steps[0].control_value(&AthleteThresholds::default()),
        None
    );
}

#[test]
fn test_plan_requirements() {
    let plan = mixed_plan();
    assert!(plan.validate().is_ok());
    assert!(plan.needs_ftp());
    assert!(!plan.needs_threshold_hr());
    assert!(plan.has_trainer_targets());
    assert!(plan.has_distance_steps());
}
