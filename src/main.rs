//! RideLink - headless ride simulator
//!
//! Runs a short structured ride against mock sensors: discovers and
//! connects a trainer and a heart rate strap, follows the plan in ERG mode,
//! stores the finished activity and prints the resulting training load.

use anyhow::{bail, Context, Result};
use futures::StreamExt;
use ridelink::metrics::analytics::analyze;
use ridelink::recording::{Preflight, SessionHandle, SessionState};
use ridelink::sensors::ftms::{HEART_RATE_MEASUREMENT_UUID, INDOOR_BIKE_DATA_UUID};
use ridelink::sensors::{DiscoveryFilter, MockDevice, MockTransport, SensorManager};
use ridelink::storage::{load_config, ActivityStore};
use ridelink::trainer::{TargetSink, TrainerController};
use ridelink::workouts::{IntensityTarget, Plan, PlanStep, StepDuration};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const TRAINER_ID: &str = "sim-trainer";
const HRM_ID: &str = "sim-hrm";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting RideLink v{}", env!("CARGO_PKG_VERSION"));

    let mut config = load_config().context("Failed to load configuration")?;
    if config.athlete.ftp.is_none() {
        config.athlete.ftp = Some(200);
    }

    let transport = MockTransport::new();
    transport.add_device(MockDevice::trainer(TRAINER_ID));
    transport.add_device(MockDevice::heart_rate(HRM_ID));

    let sensors = SensorManager::new(transport.clone(), config.sensor_config());
    let mut discoveries = sensors.scan(DiscoveryFilter::default()).await?;
    for device_id in [TRAINER_ID, HRM_ID] {
        transport.advertise(device_id);
    }
    let mut found = Vec::new();
    while found.len() < 2 {
        match tokio::time::timeout(Duration::from_secs(2), discoveries.next()).await {
            Ok(Some(sensor)) => {
                tracing::info!("Discovered {} ({})", sensor.name, sensor.device_id);
                found.push(sensor.device_id);
            }
            _ => break,
        }
    }
    sensors.stop_scan().await?;

    for device_id in &found {
        sensors.connect(device_id).await?;
    }
    let connected = sensors.connected_sensors().await;
    if connected.is_empty() {
        bail!("No sensors connected");
    }

    let controller = TrainerController::new(sensors.clone(), config.hold_repeat_config());
    let sink: Arc<dyn TargetSink> = Arc::new(controller.clone());

    let handle = SessionHandle::spawn(
        sensors.subscribe(),
        config.recording_config(),
        config.athlete,
        Some(sink),
    );

    let plan = Plan::new(
        "Simulated openers",
        vec![
            PlanStep::new("Warm up", StepDuration::Time { seconds: 5 })
                .with_target(IntensityTarget::percent_ftp(60.0)),
            PlanStep::new("Effort", StepDuration::Time { seconds: 10 })
                .with_target(IntensityTarget::percent_ftp(105.0)),
            PlanStep::new("Cool down", StepDuration::Time { seconds: 5 })
                .with_target(IntensityTarget::percent_ftp(50.0)),
        ],
    );

    let advisories = handle
        .start(Some(plan), Preflight::from_sensors(&connected), true)
        .await?;
    for issue in advisories {
        tracing::warn!("Acknowledged: {}", issue);
    }

    let feeder = tokio::spawn(simulate_rider(transport.clone(), controller.clone()));

    let mut observer = handle.observer();
    while observer.state() == SessionState::Recording {
        let snapshot = observer.changed().await?;
        if snapshot.cursor.is_some_and(|c| c.index().is_none()) {
            break;
        }
    }
    feeder.abort();

    let payload = handle.finalize().await?;
    let summary = &payload.summary;
    tracing::info!(
        "Ride finished: {:.0} s, {:.0} m, NP {:?}, TSS {:?}",
        summary.duration_seconds,
        summary.distance_meters,
        summary.normalized_power.map(|np| np.round()),
        summary.tss.map(|tss| (tss * 10.0).round() / 10.0)
    );

    let mut store = ActivityStore::open(&config.database_path())?;
    store.save_activity(&payload)?;
    handle.submit().await?;
    handle.close().await;

    let load = analyze(&store.daily_stress()?)?;
    println!(
        "CTL {:.1}  ATL {:.1}  TSB {:.1}  form {:?}  level {:?}",
        load.ctl, load.atl, load.tsb, load.form, load.fitness_level
    );

    controller.reset().await.ok();
    sensors.shutdown().await;
    Ok(())
}

/// Emit trainer and heart rate notifications that follow the trainer target.
async fn simulate_rider(transport: MockTransport, controller: TrainerController<MockTransport>) {
    let mut interval = tokio::time::interval(Duration::from_millis(250));
    let mut heart_rate = 110.0_f64;
    loop {
        interval.tick().await;

        let power = controller
            .current()
            .await
            .target
            .map(|t| t.value.primary())
            .unwrap_or(120.0);
        heart_rate += ((100.0 + power * 0.3) - heart_rate) * 0.05;
        let speed_kmh = 15.0 + power / 10.0;

        transport.notify(
            TRAINER_ID,
            INDOOR_BIKE_DATA_UUID,
            indoor_bike_data(speed_kmh, 90.0, power),
        );
        transport.notify(
            HRM_ID,
            HEART_RATE_MEASUREMENT_UUID,
            vec![0x00, heart_rate.round().clamp(0.0, 255.0) as u8],
        );
    }
}

/// Indoor Bike Data with instantaneous speed, cadence and power.
fn indoor_bike_data(speed_kmh: f64, cadence_rpm: f64, power_watts: f64) -> Vec<u8> {
    let mut data = 0x0044u16.to_le_bytes().to_vec();
    data.extend(((speed_kmh * 100.0) as u16).to_le_bytes());
    data.extend(((cadence_rpm * 2.0) as u16).to_le_bytes());
    data.extend((power_watts as i16).to_le_bytes());
    data
}
