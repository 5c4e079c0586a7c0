//! Integration tests for a recording session fed by live sensors.

use super::sensor_mock::{connected_manager, indoor_bike_data};
use ridelink::metrics::AthleteThresholds;
use ridelink::recording::{
    Preflight, RecordingConfig, RecordingError, SessionHandle, SessionState, ValidationError,
};
use ridelink::sensors::ftms::{
    FTMS_CONTROL_POINT_UUID, HEART_RATE_MEASUREMENT_UUID, INDOOR_BIKE_DATA_UUID,
};
use ridelink::sensors::{MetricKind, MockDevice};
use ridelink::streams::{decompress, StreamType};
use ridelink::trainer::{ControlValue, TargetSink, TrainerController};
use ridelink::workouts::{IntensityTarget, Plan, PlanStep, StepCursor, StepDuration};
use std::sync::Arc;
use std::time::Duration;

fn two_step_plan() -> Plan {
    Plan::new(
        "Steps",
        vec![
            PlanStep::new("Easy", StepDuration::Time { seconds: 3 })
                .with_target(IntensityTarget::watts(150.0)),
            PlanStep::new("Hard", StepDuration::Time { seconds: 3 })
                .with_target(IntensityTarget::watts(250.0)),
        ],
    )
}

#[tokio::test(start_paused = true)]
async fn test_plan_drives_trainer_and_records() {
    let (sensors, transport) =
        connected_manager(&[MockDevice::trainer("t-1"), MockDevice::heart_rate("hr-1")]).await;
    let controller = TrainerController::with_defaults(sensors.clone());
    let sink: Arc<dyn TargetSink> = Arc::new(controller.clone());

    let handle = SessionHandle::spawn(
        sensors.subscribe(),
        RecordingConfig::default(),
        AthleteThresholds {
            ftp: Some(200),
            threshold_hr: Some(160),
        },
        Some(sink),
    );

    let preflight = Preflight::from_sensors(&sensors.connected_sensors().await);
    handle
        .start(Some(two_step_plan()), preflight, true)
        .await
        .expect("Failed to start");
    assert_eq!(
        controller.current().await.target.map(|t| t.value),
        Some(ControlValue::Power(150.0))
    );

    for _ in 0..8 {
        transport.notify("t-1", INDOOR_BIKE_DATA_UUID, indoor_bike_data(30.0, 90.0, 200));
        transport.notify("hr-1", HEART_RATE_MEASUREMENT_UUID, vec![0x00, 140]);
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    let observer = handle.observer();
    let snapshot = observer.snapshot();
    assert_eq!(snapshot.state, SessionState::Recording);
    assert_eq!(snapshot.cursor, Some(StepCursor::Complete));
    assert!(snapshot.elapsed_seconds >= 6.0);
    assert!(snapshot.distance_meters > 0.0);

    let writes = transport.writes_to("t-1", FTMS_CONTROL_POINT_UUID);
    assert!(writes.contains(&vec![0x05, 0x96, 0x00]));
    assert!(writes.contains(&vec![0x05, 0xFA, 0x00]));

    let payload = handle.finalize().await.expect("Failed to finalize");
    assert_eq!(payload.summary.average(MetricKind::Power), Some(200.0));
    assert_eq!(payload.summary.average(MetricKind::HeartRate), Some(140.0));
    assert_eq!(payload.summary.steps_completed, 2);

    let power = payload
        .streams
        .iter()
        .find(|s| s.stream_type == StreamType::Power)
        .expect("No power stream");
    let decoded = decompress(power).expect("Failed to decode power stream");
    assert!(decoded.as_floats().unwrap().iter().all(|p| *p == 200.0));

    assert!(matches!(
        handle.pause().await,
        Err(RecordingError::InvalidTransition { .. })
    ));

    handle.submit().await.expect("Failed to submit");
    handle.close().await;
    assert_eq!(observer.state(), SessionState::Submitted);
}

#[tokio::test(start_paused = true)]
async fn test_pause_stops_clock() {
    let (sensors, _) = connected_manager(&[MockDevice::power_meter("pm-1")]).await;
    let handle = SessionHandle::spawn(
        sensors.subscribe(),
        RecordingConfig::default(),
        AthleteThresholds::default(),
        None,
    );
    let preflight = Preflight::from_sensors(&sensors.connected_sensors().await);
    handle.start(None, preflight, true).await.unwrap();

    tokio::time::sleep(Duration::from_millis(3500)).await;
    handle.pause().await.unwrap();
    let paused_at = handle.observer().snapshot().elapsed_seconds;

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(handle.observer().snapshot().elapsed_seconds, paused_at);
    assert_eq!(handle.observer().state(), SessionState::Paused);

    handle.resume().await.unwrap();
    tokio::time::sleep(Duration::from_millis(2500)).await;
    let resumed = handle.observer().snapshot().elapsed_seconds;
    assert!(resumed > paused_at && resumed <= paused_at + 2.5);

    handle.discard().await.unwrap();
    handle.close().await;
}

#[tokio::test]
async fn test_unacknowledged_advisories_block_start() {
    let (sensors, _) = connected_manager(&[MockDevice::heart_rate("hr-1")]).await;
    let handle = SessionHandle::spawn(
        sensors.subscribe(),
        RecordingConfig::default(),
        AthleteThresholds::default(),
        None,
    );

    let preflight = Preflight::from_sensors(&sensors.connected_sensors().await);
    let err = handle
        .start(Some(two_step_plan()), preflight, false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RecordingError::Validation(ValidationError::UnacknowledgedAdvisories(_))
    ));
    assert_eq!(handle.observer().state(), SessionState::Idle);
    handle.close().await;
}

#[tokio::test]
async fn test_closed_session_rejects_commands() {
    let (sensors, _) = connected_manager(&[]).await;
    let handle = SessionHandle::spawn(
        sensors.subscribe(),
        RecordingConfig::default(),
        AthleteThresholds::default(),
        None,
    );
    handle.start(None, Preflight::default(), true).await.unwrap();
    handle.discard().await.unwrap();

    assert!(matches!(
        handle.pause().await,
        Err(RecordingError::SessionClosed)
    ));
    handle.close().await;
}
