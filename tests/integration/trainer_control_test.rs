//! Integration tests for trainer control through the sensor manager.

use super::sensor_mock::connected_manager;
use ridelink::sensors::ftms::FTMS_CONTROL_POINT_UUID;
use ridelink::sensors::MockDevice;
use ridelink::trainer::{
    Adjustment, ControlMode, ControlValue, TargetSource, TrainerController,
};
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_hold_repeats_until_release() {
    let (sensors, transport) = connected_manager(&[MockDevice::trainer("t-1")]).await;
    let controller = TrainerController::with_defaults(sensors);
    controller.set_mode(ControlMode::Erg).await.unwrap();

    let (repeater, mut results) = controller.hold(Adjustment::Increase);
    tokio::time::sleep(Duration::from_secs(1)).await;
    repeater.finish().await;

    let mut applied = Vec::new();
    while let Ok(result) = results.try_recv() {
        applied.push(result.expect("Held adjustment failed"));
    }
    assert!(applied.len() >= 5, "only {} adjustments", applied.len());
    for (i, value) in applied.iter().enumerate() {
        assert_eq!(*value, ControlValue::Power(105.0 + 5.0 * i as f64));
    }

    let writes = transport.writes_to("t-1", FTMS_CONTROL_POINT_UUID).len();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(transport.writes_to("t-1", FTMS_CONTROL_POINT_UUID).len(), writes);
}

#[tokio::test]
async fn test_manual_override_and_return_to_auto() {
    let (sensors, transport) = connected_manager(&[MockDevice::trainer("t-1")]).await;
    let controller = TrainerController::with_defaults(sensors);

    let applied = controller
        .apply_plan_target(Some(ControlValue::Power(180.0)))
        .await
        .unwrap();
    assert_eq!(applied, Some(ControlValue::Power(180.0)));

    controller.set_source(TargetSource::Manual).await.unwrap();
    controller.set_target(ControlValue::Power(150.0)).await.unwrap();

    // Stored but not written while manual
    let skipped = controller
        .apply_plan_target(Some(ControlValue::Power(250.0)))
        .await
        .unwrap();
    assert_eq!(skipped, None);
    let snapshot = controller.current().await;
    assert_eq!(snapshot.target.unwrap().value, ControlValue::Power(150.0));
    assert_eq!(snapshot.plan_target, Some(ControlValue::Power(250.0)));

    let reapplied = controller.set_source(TargetSource::Auto).await.unwrap();
    assert_eq!(reapplied, Some(ControlValue::Power(250.0)));

    let writes = transport.writes_to("t-1", FTMS_CONTROL_POINT_UUID);
    assert_eq!(writes.last().unwrap(), &vec![0x05, 0xFA, 0x00]);
}

#[tokio::test]
async fn test_plan_grade_switches_to_sim() {
    let (sensors, _) = connected_manager(&[MockDevice::trainer("t-1")]).await;
    let controller = TrainerController::with_defaults(sensors);
    controller.set_mode(ControlMode::Erg).await.unwrap();

    let target = ControlValue::Simulation(ridelink::trainer::SimulationParams::grade(4.0));
    controller.apply_plan_target(Some(target)).await.unwrap();

    assert_eq!(controller.current().await.mode(), Some(ControlMode::Sim));
}

#[tokio::test]
async fn test_disconnected_trainer_is_not_controllable() {
    let (sensors, _) = connected_manager(&[MockDevice::trainer("t-1")]).await;
    let controller = TrainerController::with_defaults(sensors.clone());
    sensors.disconnect("t-1").await.unwrap();

    assert!(controller.set_mode(ControlMode::Erg).await.is_err());
}
