//! Power and heart rate zone calculations.
//!
//! Power uses the Coggan 7-zone model over FTP. Heart rate uses five zones
//! over lactate threshold heart rate.

use serde::{Deserialize, Serialize};

/// Athlete threshold values used by zone and stress calculations.
///
/// A missing threshold disables whatever depends on it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AthleteThresholds {
    /// Functional threshold power in watts
    pub ftp: Option<u16>,
    /// Lactate threshold heart rate in BPM
    pub threshold_hr: Option<u8>,
}

impl AthleteThresholds {
    /// Power zones, if FTP is known.
    pub fn power_zones(&self) -> Option<PowerZones> {
        self.ftp.filter(|ftp| *ftp > 0).map(PowerZones::from_ftp)
    }

    /// Heart rate zones, if threshold HR is known.
    pub fn hr_zones(&self) -> Option<HRZones> {
        self.threshold_hr
            .filter(|hr| *hr > 0)
            .map(HRZones::from_threshold_hr)
    }
}

/// A power zone range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneRange {
    /// Zone number (1-7)
    pub zone: u8,
    /// Minimum percentage of FTP
    pub min_percent: u8,
    /// Maximum percentage of FTP (255 = no upper limit)
    pub max_percent: u8,
    /// Minimum watts for this zone
    pub min_watts: u16,
    /// Maximum watts for this zone
    pub max_watts: u16,
    /// Zone name
    pub name: String,
}

/// A heart rate zone range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HRZoneRange {
    /// Zone number (1-5)
    pub zone: u8,
    /// Minimum BPM
    pub min_bpm: u8,
    /// Maximum BPM
    pub max_bpm: u8,
    /// Zone name
    pub name: String,
}

/// Coggan 7-zone power zones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerZones {
    /// Zone 1: Active Recovery (0-55% FTP)
    pub z1_recovery: ZoneRange,
    /// Zone 2: Endurance (56-75% FTP)
    pub z2_endurance: ZoneRange,
    /// Zone 3: Tempo (76-90% FTP)
    pub z3_tempo: ZoneRange,
    /// Zone 4: Threshold (91-105% FTP)
    pub z4_threshold: ZoneRange,
    /// Zone 5: VO2max (106-120% FTP)
    pub z5_vo2max: ZoneRange,
    /// Zone 6: Anaerobic (121-150% FTP)
    pub z6_anaerobic: ZoneRange,
    /// Zone 7: Neuromuscular (>150% FTP)
    pub z7_neuromuscular: ZoneRange,
}

impl PowerZones {
    /// Calculate power zones from FTP using Coggan 7-zone model.
    pub fn from_ftp(ftp: u16) -> Self {
        let watts = |fraction: f32| (ftp as f32 * fraction) as u16;
        let zone = |zone: u8, min_percent: u8, max_percent: u8, name: &str| ZoneRange {
            zone,
            min_percent,
            max_percent,
            min_watts: watts(min_percent as f32 / 100.0),
            max_watts: if max_percent == u8::MAX {
                u16::MAX
            } else {
                watts(max_percent as f32 / 100.0)
            },
            name: name.to_string(),
        };

        Self {
            z1_recovery: zone(1, 0, 55, "Active Recovery"),
            z2_endurance: zone(2, 56, 75, "Endurance"),
            z3_tempo: zone(3, 76, 90, "Tempo"),
            z4_threshold: zone(4, 91, 105, "Threshold"),
            z5_vo2max: zone(5, 106, 120, "VO2max"),
            z6_anaerobic: zone(6, 121, 150, "Anaerobic"),
            z7_neuromuscular: zone(7, 151, u8::MAX, "Neuromuscular"),
        }
    }

    /// Get the zone for a given power value.
    pub fn get_zone(&self, power: u16) -> u8 {
        if power <= self.z1_recovery.max_watts {
            1
        } else if power <= self.z2_endurance.max_watts {
            2
        } else if power <= self.z3_tempo.max_watts {
            3
        } else if power <= self.z4_threshold.max_watts {
            4
        } else if power <= self.z5_vo2max.max_watts {
            5
        } else if power <= self.z6_anaerobic.max_watts {
            6
        } else {
            7
        }
    }
}

/// Five heart rate zones over lactate threshold heart rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HRZones {
    /// Zone 1: Recovery (<81% LTHR)
    pub z1_recovery: HRZoneRange,
    /// Zone 2: Aerobic (81-89% LTHR)
    pub z2_aerobic: HRZoneRange,
    /// Zone 3: Tempo (90-93% LTHR)
    pub z3_tempo: HRZoneRange,
    /// Zone 4: Threshold (94-99% LTHR)
    pub z4_threshold: HRZoneRange,
    /// Zone 5: Maximum (100%+ LTHR)
    pub z5_maximum: HRZoneRange,
}

impl HRZones {
    /// Calculate heart rate zones from threshold heart rate.
    pub fn from_threshold_hr(threshold_hr: u8) -> Self {
        let bpm = |percent: f32| -> u8 {
            (threshold_hr as f32 * percent / 100.0)
                .round()
                .clamp(0.0, 255.0) as u8
        };
        let zone = |zone: u8, min_bpm: u8, max_bpm: u8, name: &str| HRZoneRange {
            zone,
            min_bpm,
            max_bpm,
            name: name.to_string(),
        };

        Self {
            z1_recovery: zone(1, 0, bpm(81.0).saturating_sub(1), "Recovery"),
            z2_aerobic: zone(2, bpm(81.0), bpm(90.0).saturating_sub(1), "Aerobic"),
            z3_tempo: zone(3, bpm(90.0), bpm(94.0).saturating_sub(1), "Tempo"),
            z4_threshold: zone(4, bpm(94.0), threshold_hr.saturating_sub(1), "Threshold"),
            z5_maximum: zone(5, threshold_hr, u8::MAX, "Maximum"),
        }
    }

    /// Get the zone for a given heart rate value.
    pub fn get_zone(&self, hr: u8) -> u8 {
        if hr <= self.z1_recovery.max_bpm {
            1
        } else if hr <= self.z2_aerobic.max_bpm {
            2
        } else if hr <= self.z3_tempo.max_bpm {
            3
        } else if hr <= self.z4_threshold.max_bpm {
            4
        } else {
            5
        }
    }
}

/// Seconds spent in each zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneHistogram {
    /// Index 0 is zone 1
    pub seconds: Vec<f64>,
}

impl ZoneHistogram {
    /// Empty histogram with `zones` buckets.
    pub fn new(zones: usize) -> Self {
        Self {
            seconds: vec![0.0; zones],
        }
    }

    /// Add time to a 1-based zone. Out-of-range zones are ignored.
    pub fn add(&mut self, zone: u8, seconds: f64) {
        if let Some(bucket) = (zone as usize)
            .checked_sub(1)
            .and_then(|i| self.seconds.get_mut(i))
        {
            *bucket += seconds.max(0.0);
        }
    }

    /// Total time across zones.
    pub fn total(&self) -> f64 {
        self.seconds.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_zones_from_ftp() {
        let zones = PowerZones::from_ftp(200);

        // Z1: 0-55% = 0-110W
        assert_eq!(zones.z1_recovery.max_watts, 110);

        // Z2: 56-75% = 112-150W
        assert_eq!(zones.z2_endurance.min_watts, 112);
        assert_eq!(zones.z2_endurance.max_watts, 150);

        // Z4: 91-105% = 182-210W
        assert_eq!(zones.z4_threshold.min_watts, 182);
        assert_eq!(zones.z4_threshold.max_watts, 210);

        // Z7: >150% = >302W
        assert_eq!(zones.z7_neuromuscular.min_watts, 302);
        assert_eq!(zones.z7_neuromuscular.max_watts, u16::MAX);
    }

    #[test]
    fn test_power_zone_lookup() {
        let zones = PowerZones::from_ftp(200);

        assert_eq!(zones.get_zone(50), 1);
        assert_eq!(zones.get_zone(130), 2);
        assert_eq!(zones.get_zone(170), 3);
        assert_eq!(zones.get_zone(200), 4);
        assert_eq!(zones.get_zone(220), 5);
        assert_eq!(zones.get_zone(280), 6);
        assert_eq!(zones.get_zone(350), 7);
    }

    #[test]
    fn test_hr_zones_from_threshold() {
        let zones = HRZones::from_threshold_hr(170);

        // 81% of 170 = 137.7 -> 138
        assert_eq!(zones.z1_recovery.max_bpm, 137);
        assert_eq!(zones.z2_aerobic.min_bpm, 138);
        assert_eq!(zones.z5_maximum.min_bpm, 170);

        assert_eq!(zones.get_zone(120), 1);
        assert_eq!(zones.get_zone(145), 2);
        assert_eq!(zones.get_zone(155), 3);
        assert_eq!(zones.get_zone(165), 4);
        assert_eq!(zones.get_zone(175), 5);
    }

    #[test]
    fn test_missing_thresholds_disable_zones() {
        let thresholds = AthleteThresholds::default();
        assert!(thresholds.power_zones().is_none());
        assert!(thresholds.hr_zones().is_none());
    }

    #[test]
    fn test_histogram() {
        let mut histogram = ZoneHistogram::new(5);
        histogram.add(1, 2.0);
        histogram.add(5, 3.0);
        histogram.add(0, 10.0);
        histogram.add(6, 10.0);

        assert_eq!(histogram.seconds, vec![2.0, 0.0, 0.0, 0.0, 3.0]);
        assert_eq!(histogram.total(), 5.0);
    }
}
