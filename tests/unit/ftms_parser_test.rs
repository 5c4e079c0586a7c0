//! Unit tests for FTMS data parsing and control point commands.

use ridelink::sensors::ftms::{
    build_request_control, build_reset, build_set_target_power,
    parse_heart_rate_measurement, parse_indoor_bike_data, INDOOR_BIKE_DATA_UUID,
};
use ridelink::sensors::{MetricKind, ReadingDecoder};
use ridelink::trainer::{ControlValue, SimulationParams};
use std::time::Instant;

#[test]
fn test_parse_indoor_bike_data_minimal() {
    // Flags: 0x0000 (only instantaneous speed present)
    let data = [0x00, 0x00, 0x00, 0x00];
    let result = parse_indoor_bike_data(&data).unwrap();

    assert_eq!(result.speed_kmh, Some(0.0));
    assert!(result.power_watts.is_none());
    assert!(result.cadence_rpm.is_none());
}

#[test]
fn test_parse_indoor_bike_data_more_data_flag() {
    // Flags: 0x0041 (more data, power only)
    let data = [0x41, 0x00, 0x2C, 0x01];
    let result = parse_indoor_bike_data(&data).unwrap();

    assert!(result.speed_kmh.is_none());
    assert_eq!(result.power_watts, Some(300));
}

#[test]
fn test_parse_heart_rate_minimal() {
    let result = parse_heart_rate_measurement(&[0x00, 72]).unwrap();
    assert_eq!(result.heart_rate_bpm, 72);
    assert!(result.rr_intervals.is_empty());
}

#[test]
fn test_decoder_ignores_empty_notification() {
    let mut decoder = ReadingDecoder::new("trainer", 2.105);
    assert!(decoder
        .decode(INDOOR_BIKE_DATA_UUID, &[], Instant::now())
        .is_empty());
}

#[test]
fn test_decoder_power_reading() {
    let mut decoder = ReadingDecoder::new("trainer", 2.105);
    let readings = decoder.decode(INDOOR_BIKE_DATA_UUID, &[0x41, 0x00, 0xC8, 0x00], Instant::now());

    assert_eq!(readings.len(), 1);
    assert_eq!(readings[0].metric, MetricKind::Power);
    assert_eq!(readings[0].value.as_scalar(), Some(200.0));
}

#[test]
fn test_control_commands() {
    assert_eq!(build_request_control(), vec![0x00]);
    assert_eq!(build_set_target_power(250), vec![0x05, 0xFA, 0x00]);
    assert_eq!(build_reset(), vec![0x01]);
}

#[test]
fn test_control_value_encoding_is_normalized() {
    let erg = ControlValue::Power(212.0).normalized();
    assert_eq!(erg, ControlValue::Power(210.0));
    assert_eq!(erg.to_command(), build_set_target_power(210));

    let sim = ControlValue::Simulation(SimulationParams::grade(35.0)).normalized();
    assert_eq!(sim.primary(), 20.0);
}
