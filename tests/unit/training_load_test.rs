//! Unit tests for stress scores and training load.

use chrono::NaiveDate;
use ridelink::metrics::analytics::{activity_stress, history};
use ridelink::metrics::{
    analyze, fill_gaps, AthleteThresholds, FitnessLevel, Form, StressSource, TrainingLoadPoint,
};

fn day(offset: i64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(offset)
}

#[test]
fn test_hour_at_ftp_is_100_tss() {
    let thresholds = AthleteThresholds {
        ftp: Some(250),
        threshold_hr: Some(165),
    };
    let score = activity_stress(3600.0, Some(250.0), Some(150.0), &thresholds).unwrap();

    assert_eq!(score.source, StressSource::Power);
    assert!((score.tss - 100.0).abs() < 1e-9);
    assert!((score.intensity_factor - 1.0).abs() < 1e-9);
}

#[test]
fn test_heart_rate_fallback() {
    let thresholds = AthleteThresholds {
        ftp: None,
        threshold_hr: Some(160),
    };
    let score = activity_stress(3600.0, Some(250.0), Some(160.0), &thresholds).unwrap();
    assert_eq!(score.source, StressSource::HeartRate);

    assert!(activity_stress(3600.0, None, None, &thresholds).is_none());
    assert!(activity_stress(3600.0, Some(250.0), None, &AthleteThresholds::default()).is_none());
}

#[test]
fn test_steady_training_converges() {
    let series: Vec<_> = (0..400)
        .map(|i| TrainingLoadPoint::new(day(i), 80.0))
        .collect();
    let load = analyze(&series).unwrap();

    assert!((load.ctl - 80.0).abs() < 0.1);
    assert!((load.atl - 80.0).abs() < 0.1);
    assert_eq!(load.form, Form::Neutral);
    assert_eq!(load.fitness_level, FitnessLevel::WellTrained);
}

#[test]
fn test_rest_week_freshens() {
    let mut series: Vec<_> = (0..60)
        .map(|i| TrainingLoadPoint::new(day(i), 90.0))
        .collect();
    series.extend((60..67).map(|i| TrainingLoadPoint::new(day(i), 0.0)));

    let days = history(&series).unwrap();
    let before = days[59];
    let after = days[66];
    assert!(after.tsb > before.tsb);
    assert!(after.tsb > 0.0);
}

#[test]
fn test_sparse_points_fill_to_contiguous() {
    let filled = fill_gaps(&[
        TrainingLoadPoint::new(day(10), 40.0),
        TrainingLoadPoint::new(day(0), 60.0),
    ]);

    assert_eq!(filled.len(), 11);
    assert_eq!(filled[0].stress_score, 60.0);
    assert!(filled[1..10].iter().all(|p| p.stress_score == 0.0));
    assert!(analyze(&filled).is_ok());
}
