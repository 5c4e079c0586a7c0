//! Integration tests for storing recorded activities and deriving load.

use ridelink::metrics::{analyze, AthleteThresholds, Form};
use ridelink::recording::{Preflight, RecordingSession};
use ridelink::sensors::{DeviceReading, MetricKind};
use ridelink::storage::{load_config_from, ActivityStore};
use ridelink::streams::StreamType;
use std::time::{Duration, Instant};

fn recorded_ride(seconds: u32, watts: f64) -> ridelink::recording::ActivityPayload {
    let thresholds = AthleteThresholds {
        ftp: Some(200),
        threshold_hr: None,
    };
    let mut session = RecordingSession::with_defaults(thresholds);
    let t0 = Instant::now();
    session
        .start(None, &Preflight::default(), true, t0)
        .expect("Failed to start session");

    for s in 0..seconds {
        let at = t0 + Duration::from_secs(s as u64);
        session.record(&DeviceReading::scalar("pm", MetricKind::Power, watts, at));
        session.record(&DeviceReading::scalar("pm", MetricKind::Speed, 32.0, at));
        session.tick(at);
    }

    session
        .finalize(t0 + Duration::from_secs(seconds as u64))
        .expect("Failed to finalize")
}

#[test]
fn test_recorded_ride_survives_reopen() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = load_config_from(&dir.path().join("config.toml")).expect("Failed to load config");
    let payload = recorded_ride(120, 200.0);
    let id = payload.summary.session_id;

    {
        let mut store =
            ActivityStore::open(&config.database_path()).expect("Failed to open store");
        store.save_activity(&payload).expect("Failed to save activity");
    }

    let store = ActivityStore::open(&config.database_path()).expect("Failed to reopen store");
    let loaded = store
        .load_activity(&id)
        .expect("Failed to load activity")
        .expect("Activity missing");

    assert_eq!(loaded.summary, payload.summary);
    assert!(loaded.streams.failures.is_empty());
    for stream_type in [StreamType::Power, StreamType::Speed, StreamType::Distance] {
        assert!(loaded.streams.get(stream_type).is_some(), "{} missing", stream_type);
    }
    assert!(loaded.streams.get(StreamType::Location).is_none());

    let tss = loaded.summary.tss.expect("No stress score");
    assert!((tss - 100.0 * 120.0 / 3600.0).abs() < 1e-6);
}

#[test]
fn test_daily_stress_feeds_training_load() {
    let mut store = ActivityStore::open_in_memory().expect("Failed to open store");
    store
        .save_activity(&recorded_ride(600, 250.0))
        .expect("Failed to save activity");

    let series = store.daily_stress().expect("Failed to read stress");
    assert_eq!(series.len(), 1);
    assert!(series[0].stress_score > 0.0);

    let load = analyze(&series).expect("Failed to analyze");
    assert!(load.atl > load.ctl);
    assert!(load.tsb < 0.0);
    assert_ne!(load.form, Form::Fresh);
}
