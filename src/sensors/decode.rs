//! Turns raw characteristic notifications into typed readings.
//!
//! One [`ReadingDecoder`] lives inside each device pump. It keeps the last
//! cumulative wheel and crank counters so speed and cadence can be derived
//! from revolution deltas, including counter roll-over.

use crate::sensors::ftms::{
    parse_csc_measurement, parse_cycling_power_measurement, parse_heart_rate_measurement,
    parse_indoor_bike_data, CSC_MEASUREMENT_UUID, CYCLING_POWER_MEASUREMENT_UUID,
    HEART_RATE_MEASUREMENT_UUID, INDOOR_BIKE_DATA_UUID,
};
use crate::sensors::types::{DeviceReading, MetricKind};
use std::time::Instant;
use uuid::Uuid;

/// Event time resolution for wheel and crank counters (1/1024 s).
const EVENT_TIME_UNITS_PER_SECOND: f64 = 1024.0;

/// Upper bound for a plausible derived cadence.
const MAX_CADENCE_RPM: f64 = 250.0;

/// Last cumulative counter sample.
#[derive(Debug, Clone, Copy)]
struct CounterSample {
    revolutions: u32,
    event_time: u16,
}

/// Stateful decoder for one device.
#[derive(Debug)]
pub struct ReadingDecoder {
    device_id: String,
    wheel_circumference_m: f64,
    last_wheel: Option<CounterSample>,
    last_crank: Option<CounterSample>,
}

impl ReadingDecoder {
    /// Create a decoder for a device.
    pub fn new(device_id: impl Into<String>, wheel_circumference_m: f64) -> Self {
        Self {
            device_id: device_id.into(),
            wheel_circumference_m,
            last_wheel: None,
            last_crank: None,
        }
    }

    /// Decode one notification. Unknown characteristics and malformed
    /// payloads yield no readings.
    pub fn decode(&mut self, characteristic: Uuid, data: &[u8], now: Instant) -> Vec<DeviceReading> {
        match characteristic {
            INDOOR_BIKE_DATA_UUID => self.decode_indoor_bike(data, now),
            CYCLING_POWER_MEASUREMENT_UUID => self.decode_cycling_power(data, now),
            HEART_RATE_MEASUREMENT_UUID => self.decode_heart_rate(data, now),
            CSC_MEASUREMENT_UUID => self.decode_csc(data, now),
            _ => Vec::new(),
        }
    }

    fn reading(&self, metric: MetricKind, value: f64, now: Instant) -> DeviceReading {
        DeviceReading::scalar(&self.device_id, metric, value, now)
    }

    fn decode_indoor_bike(&mut self, data: &[u8], now: Instant) -> Vec<DeviceReading> {
        let Some(parsed) = parse_indoor_bike_data(data) else {
            tracing::debug!("Malformed indoor bike data from {}", self.device_id);
            return Vec::new();
        };

        let mut readings = Vec::new();
        if let Some(speed) = parsed.speed_kmh {
            readings.push(self.reading(MetricKind::Speed, speed as f64, now));
        }
        if let Some(cadence) = parsed.cadence_rpm {
            readings.push(self.reading(MetricKind::Cadence, cadence as f64, now));
        }
        if let Some(power) = parsed.power_watts {
            readings.push(self.reading(MetricKind::Power, power.max(0) as f64, now));
        }
        if let Some(hr) = parsed.heart_rate_bpm.filter(|hr| *hr > 0) {
            readings.push(self.reading(MetricKind::HeartRate, hr as f64, now));
        }
        if let Some(distance) = parsed.total_distance_m {
            readings.push(self.reading(MetricKind::Distance, distance as f64, now));
        }
        readings
    }

    fn decode_cycling_power(&mut self, data: &[u8], now: Instant) -> Vec<DeviceReading> {
        let Some(parsed) = parse_cycling_power_measurement(data) else {
            tracing::debug!("Malformed cycling power data from {}", self.device_id);
            return Vec::new();
        };

        let mut readings = vec![self.reading(MetricKind::Power, parsed.power_watts.max(0) as f64, now)];
        if let Some((revs, time)) = parsed.crank {
            if let Some(cadence) = self.crank_cadence(revs, time) {
                readings.push(self.reading(MetricKind::Cadence, cadence, now));
            }
        }
        readings
    }

    fn decode_heart_rate(&mut self, data: &[u8], now: Instant) -> Vec<DeviceReading> {
        match parse_heart_rate_measurement(data) {
            Some(parsed) if parsed.heart_rate_bpm > 0 => {
                vec![self.reading(MetricKind::HeartRate, parsed.heart_rate_bpm as f64, now)]
            }
            Some(_) => Vec::new(),
            None => {
                tracing::debug!("Malformed heart rate data from {}", self.device_id);
                Vec::new()
            }
        }
    }

    fn decode_csc(&mut self, data: &[u8], now: Instant) -> Vec<DeviceReading> {
        let Some(parsed) = parse_csc_measurement(data) else {
            tracing::debug!("Malformed CSC data from {}", self.device_id);
            return Vec::new();
        };

        let mut readings = Vec::new();
        if let Some((revs, time)) = parsed.wheel {
            if let Some(speed) = self.wheel_speed(revs, time) {
                readings.push(self.reading(MetricKind::Speed, speed, now));
            }
        }
        if let Some((revs, time)) = parsed.crank {
            if let Some(cadence) = self.crank_cadence(revs, time) {
                readings.push(self.reading(MetricKind::Cadence, cadence, now));
            }
        }
        readings
    }

    /// Speed in km/h from cumulative wheel revolutions.
    fn wheel_speed(&mut self, revolutions: u32, event_time: u16) -> Option<f64> {
        let current = CounterSample {
            revolutions,
            event_time,
        };
        let previous = self.last_wheel.replace(current)?;

        let delta_revs = revolutions.wrapping_sub(previous.revolutions);
        let delta_time = event_time.wrapping_sub(previous.event_time);
        if delta_time == 0 {
            // No new wheel event since the last notification
            return None;
        }

        let seconds = delta_time as f64 / EVENT_TIME_UNITS_PER_SECOND;
        let meters = delta_revs as f64 * self.wheel_circumference_m;
        Some(meters / seconds * 3.6)
    }

    /// Cadence in RPM from cumulative crank revolutions.
    fn crank_cadence(&mut self, revolutions: u16, event_time: u16) -> Option<f64> {
        let current = CounterSample {
            revolutions: revolutions as u32,
            event_time,
        };
        let previous = self.last_crank.replace(current)?;

        let delta_revs = revolutions.wrapping_sub(previous.revolutions as u16);
        let delta_time = event_time.wrapping_sub(previous.event_time);
        if delta_time == 0 {
            return None;
        }

        let seconds = delta_time as f64 / EVENT_TIME_UNITS_PER_SECOND;
        let rpm = delta_revs as f64 / seconds * 60.0;
        (rpm <= MAX_CADENCE_RPM).then_some(rpm)
    }
}
