//! Per-activity training stress.
//!
//! Power-based TSS = hours × IF² × 100 with IF = NP / FTP. Heart rate TSS
//! uses the same shape with IF = average HR / threshold HR. Either score is
//! `None` when its threshold or data is missing.

use crate::metrics::zones::AthleteThresholds;
use serde::{Deserialize, Serialize};

/// Which signal produced a stress score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StressSource {
    Power,
    HeartRate,
}

/// Stress score for one activity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StressScore {
    pub intensity_factor: f64,
    pub tss: f64,
    pub source: StressSource,
}

fn tss(duration_s: f64, intensity_factor: f64) -> f64 {
    duration_s / 3600.0 * intensity_factor * intensity_factor * 100.0
}

/// Power-based stress from normalized power.
pub fn power_stress(duration_s: f64, normalized_power: f64, ftp: u16) -> Option<StressScore> {
    if ftp == 0 || duration_s <= 0.0 || !normalized_power.is_finite() {
        return None;
    }
    let intensity_factor = normalized_power / ftp as f64;
    Some(StressScore {
        intensity_factor,
        tss: tss(duration_s, intensity_factor),
        source: StressSource::Power,
    })
}

/// Heart-rate-based stress from average heart rate.
pub fn heart_rate_stress(duration_s: f64, average_hr: f64, threshold_hr: u8) -> Option<StressScore> {
    if threshold_hr == 0 || duration_s <= 0.0 || !average_hr.is_finite() || average_hr <= 0.0 {
        return None;
    }
    let intensity_factor = average_hr / threshold_hr as f64;
    Some(StressScore {
        intensity_factor,
        tss: tss(duration_s, intensity_factor),
        source: StressSource::HeartRate,
    })
}

/// Power stress when FTP and power exist, else heart rate stress.
pub fn activity_stress(
    duration_s: f64,
    normalized_power: Option<f64>,
    average_hr: Option<f64>,
    thresholds: &AthleteThresholds,
) -> Option<StressScore> {
    let by_power = thresholds
        .ftp
        .zip(normalized_power)
        .and_then(|(ftp, np)| power_stress(duration_s, np, ftp));

    by_power.or_else(|| {
        thresholds
            .threshold_hr
            .zip(average_hr)
            .and_then(|(lthr, hr)| heart_rate_stress(duration_s, hr, lthr))
    })
}
