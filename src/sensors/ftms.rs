//! GATT payload formats for the supported fitness profiles.
//!
//! Covers FTMS Indoor Bike Data and the Fitness Machine Control Point, the
//! Cycling Power Measurement, Heart Rate Measurement and CSC Measurement
//! characteristics. All multi-byte fields are little-endian.

use crate::sensors::types::{ControlResult, Protocol};
use uuid::Uuid;

/// FTMS Service UUID (0x1826)
pub const FTMS_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_1826_0000_1000_8000_0080_5f9b_34fb);

/// Indoor Bike Data Characteristic UUID (0x2AD2)
pub const INDOOR_BIKE_DATA_UUID: Uuid = Uuid::from_u128(0x0000_2ad2_0000_1000_8000_0080_5f9b_34fb);

/// Fitness Machine Control Point UUID (0x2AD9)
pub const FTMS_CONTROL_POINT_UUID: Uuid =
    Uuid::from_u128(0x0000_2ad9_0000_1000_8000_0080_5f9b_34fb);

/// Cycling Power Service UUID (0x1818)
pub const CYCLING_POWER_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000_1818_0000_1000_8000_0080_5f9b_34fb);

/// Cycling Power Measurement UUID (0x2A63)
pub const CYCLING_POWER_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x0000_2a63_0000_1000_8000_0080_5f9b_34fb);

/// Heart Rate Service UUID (0x180D)
pub const HEART_RATE_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000_180d_0000_1000_8000_0080_5f9b_34fb);

/// Heart Rate Measurement UUID (0x2A37)
pub const HEART_RATE_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x0000_2a37_0000_1000_8000_0080_5f9b_34fb);

/// Cycling Speed and Cadence Service UUID (0x1816)
pub const CSC_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_1816_0000_1000_8000_0080_5f9b_34fb);

/// CSC Measurement UUID (0x2A5B)
pub const CSC_MEASUREMENT_UUID: Uuid = Uuid::from_u128(0x0000_2a5b_0000_1000_8000_0080_5f9b_34fb);

/// Map an advertised service UUID to the protocol it represents.
pub fn protocol_for_service(service: &Uuid) -> Option<Protocol> {
    match *service {
        FTMS_SERVICE_UUID => Some(Protocol::BleFtms),
        CYCLING_POWER_SERVICE_UUID => Some(Protocol::BleCyclingPower),
        HEART_RATE_SERVICE_UUID => Some(Protocol::BleHeartRate),
        CSC_SERVICE_UUID => Some(Protocol::BleCsc),
        _ => None,
    }
}

/// Service UUID advertised for a protocol.
pub fn service_for_protocol(protocol: Protocol) -> Uuid {
    match protocol {
        Protocol::BleFtms => FTMS_SERVICE_UUID,
        Protocol::BleCyclingPower => CYCLING_POWER_SERVICE_UUID,
        Protocol::BleHeartRate => HEART_RATE_SERVICE_UUID,
        Protocol::BleCsc => CSC_SERVICE_UUID,
    }
}

/// Characteristics to subscribe to for a protocol.
pub fn notify_characteristics(protocol: Protocol) -> &'static [Uuid] {
    match protocol {
        Protocol::BleFtms => &[INDOOR_BIKE_DATA_UUID, FTMS_CONTROL_POINT_UUID],
        Protocol::BleCyclingPower => &[CYCLING_POWER_MEASUREMENT_UUID],
        Protocol::BleHeartRate => &[HEART_RATE_MEASUREMENT_UUID],
        Protocol::BleCsc => &[CSC_MEASUREMENT_UUID],
    }
}

fn read_u16(data: &[u8], offset: usize) -> Option<u16> {
    Some(u16::from_le_bytes([*data.get(offset)?, *data.get(offset + 1)?]))
}

fn read_i16(data: &[u8], offset: usize) -> Option<i16> {
    Some(i16::from_le_bytes([*data.get(offset)?, *data.get(offset + 1)?]))
}

fn read_u24(data: &[u8], offset: usize) -> Option<u32> {
    Some(u32::from_le_bytes([
        *data.get(offset)?,
        *data.get(offset + 1)?,
        *data.get(offset + 2)?,
        0,
    ]))
}

fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    Some(u32::from_le_bytes([
        *data.get(offset)?,
        *data.get(offset + 1)?,
        *data.get(offset + 2)?,
        *data.get(offset + 3)?,
    ]))
}

/// Parsed data from Indoor Bike Data characteristic.
#[derive(Debug, Clone, Default)]
pub struct IndoorBikeData {
    /// Instantaneous speed in km/h (if present)
    pub speed_kmh: Option<f32>,
    /// Average speed in km/h (if present)
    pub avg_speed_kmh: Option<f32>,
    /// Instantaneous cadence in RPM (if present)
    pub cadence_rpm: Option<f32>,
    /// Total distance in meters (if present)
    pub total_distance_m: Option<u32>,
    /// Resistance level (if present)
    pub resistance_level: Option<i16>,
    /// Instantaneous power in watts (if present)
    pub power_watts: Option<i16>,
    /// Heart rate in BPM (if present)
    pub heart_rate_bpm: Option<u8>,
    /// Elapsed time in seconds (if present)
    pub elapsed_time_s: Option<u16>,
}

/// Parse Indoor Bike Data notification.
///
/// Bytes 0-1 hold the flags; the remaining fields appear in flag order.
/// Instantaneous speed is present when the "More Data" bit is clear.
pub fn parse_indoor_bike_data(data: &[u8]) -> Option<IndoorBikeData> {
    let flags = read_u16(data, 0)?;
    let mut result = IndoorBikeData::default();
    let mut offset = 2usize;

    if flags & 0x0001 == 0 {
        // 0.01 km/h
        result.speed_kmh = Some(read_u16(data, offset)? as f32 / 100.0);
        offset += 2;
    }
    if flags & 0x0002 != 0 {
        result.avg_speed_kmh = Some(read_u16(data, offset)? as f32 / 100.0);
        offset += 2;
    }
    if flags & 0x0004 != 0 {
        // 0.5 RPM
        result.cadence_rpm = Some(read_u16(data, offset)? as f32 / 2.0);
        offset += 2;
    }
    if flags & 0x0008 != 0 {
        // Average cadence, unused
        read_u16(data, offset)?;
        offset += 2;
    }
    if flags & 0x0010 != 0 {
        result.total_distance_m = Some(read_u24(data, offset)?);
        offset += 3;
    }
    if flags & 0x0020 != 0 {
        result.resistance_level = Some(read_i16(data, offset)?);
        offset += 2;
    }
    if flags & 0x0040 != 0 {
        result.power_watts = Some(read_i16(data, offset)?);
        offset += 2;
    }
    if flags & 0x0080 != 0 {
        // Average power, unused
        read_i16(data, offset)?;
        offset += 2;
    }
    if flags & 0x0100 != 0 {
        // Total energy (2), energy per hour (2), energy per minute (1)
        if offset + 5 > data.len() {
            return None;
        }
        offset += 5;
    }
    if flags & 0x0200 != 0 {
        result.heart_rate_bpm = Some(*data.get(offset)?);
        offset += 1;
    }
    if flags & 0x0400 != 0 {
        // Metabolic equivalent
        data.get(offset)?;
        offset += 1;
    }
    if flags & 0x0800 != 0 {
        result.elapsed_time_s = Some(read_u16(data, offset)?);
    }

    Some(result)
}

/// Parsed Cycling Power Measurement.
#[derive(Debug, Clone, Default)]
pub struct CyclingPowerData {
    /// Instantaneous power in watts
    pub power_watts: i16,
    /// Pedal power balance (if present)
    pub power_balance: Option<u8>,
    /// Cumulative crank revolutions and last event time (1/1024 s)
    pub crank: Option<(u16, u16)>,
}

/// Parse Cycling Power Measurement notification.
///
/// Truncated optional fields are dropped rather than failing the whole
/// notification, since the instantaneous power is always usable.
pub fn parse_cycling_power_measurement(data: &[u8]) -> Option<CyclingPowerData> {
    let flags = read_u16(data, 0)?;
    let power = read_i16(data, 2)?;

    let mut result = CyclingPowerData {
        power_watts: power,
        ..Default::default()
    };
    let mut offset = 4usize;

    if flags & 0x0001 != 0 {
        match data.get(offset) {
            Some(balance) => result.power_balance = Some(*balance),
            None => return Some(result),
        }
        offset += 1;
    }
    if flags & 0x0004 != 0 {
        // Accumulated torque
        if offset + 2 > data.len() {
            return Some(result);
        }
        offset += 2;
    }
    if flags & 0x0010 != 0 {
        // Wheel revolution data: u32 revolutions + u16 event time
        if offset + 6 > data.len() {
            return Some(result);
        }
        offset += 6;
    }
    if flags & 0x0020 != 0 {
        if let (Some(revs), Some(time)) = (read_u16(data, offset), read_u16(data, offset + 2)) {
            result.crank = Some((revs, time));
        }
    }

    Some(result)
}

/// Parsed Heart Rate Measurement.
#[derive(Debug, Clone, Default)]
pub struct HeartRateData {
    /// Heart rate in BPM
    pub heart_rate_bpm: u16,
    /// RR intervals in 1/1024 s (if present)
    pub rr_intervals: Vec<u16>,
    /// Sensor contact detected
    pub sensor_contact: bool,
}

/// Parse Heart Rate Measurement notification.
pub fn parse_heart_rate_measurement(data: &[u8]) -> Option<HeartRateData> {
    let flags = *data.first()?;
    let hr_format_u16 = flags & 0x01 != 0;
    let sensor_contact = (flags & 0x04 != 0) && (flags & 0x02 != 0);
    let energy_expended_present = flags & 0x08 != 0;
    let rr_interval_present = flags & 0x10 != 0;

    let mut offset = 1usize;
    let heart_rate_bpm = if hr_format_u16 {
        let hr = read_u16(data, offset)?;
        offset += 2;
        hr
    } else {
        let hr = *data.get(offset)? as u16;
        offset += 1;
        hr
    };

    let mut result = HeartRateData {
        heart_rate_bpm,
        sensor_contact,
        ..Default::default()
    };

    if energy_expended_present {
        offset += 2;
    }
    if rr_interval_present {
        while let Some(rr) = read_u16(data, offset) {
            result.rr_intervals.push(rr);
            offset += 2;
        }
    }

    Some(result)
}

/// Parsed CSC Measurement with raw cumulative counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CscData {
    /// Cumulative wheel revolutions and last event time (1/1024 s)
    pub wheel: Option<(u32, u16)>,
    /// Cumulative crank revolutions and last event time (1/1024 s)
    pub crank: Option<(u16, u16)>,
}

/// Parse CSC Measurement notification.
pub fn parse_csc_measurement(data: &[u8]) -> Option<CscData> {
    let flags = *data.first()?;
    let mut result = CscData::default();
    let mut offset = 1usize;

    if flags & 0x01 != 0 {
        result.wheel = Some((read_u32(data, offset)?, read_u16(data, offset + 4)?));
        offset += 6;
    }
    if flags & 0x02 != 0 {
        result.crank = Some((read_u16(data, offset)?, read_u16(data, offset + 2)?));
    }

    Some(result)
}

/// FTMS Control Point opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FtmsControlOpcode {
    /// Request control of the fitness machine
    RequestControl = 0x00,
    /// Reset the fitness machine
    Reset = 0x01,
    /// Set target resistance level
    SetTargetResistanceLevel = 0x04,
    /// Set target power
    SetTargetPower = 0x05,
    /// Set indoor bike simulation parameters
    SetIndoorBikeSimulation = 0x11,
    /// Response code prefix on indications
    ResponseCode = 0x80,
}

/// Build a control point command to request control.
pub fn build_request_control() -> Vec<u8> {
    vec![FtmsControlOpcode::RequestControl as u8]
}

/// Build a control point command to reset the machine.
pub fn build_reset() -> Vec<u8> {
    vec![FtmsControlOpcode::Reset as u8]
}

/// Build a control point command to set target power (ERG mode).
pub fn build_set_target_power(target_watts: i16) -> Vec<u8> {
    let mut cmd = vec![FtmsControlOpcode::SetTargetPower as u8];
    cmd.extend_from_slice(&target_watts.to_le_bytes());
    cmd
}

/// Build a control point command to set target resistance level.
///
/// `level` uses 0.1 resolution, so 100 = 10.0.
pub fn build_set_target_resistance(level: i16) -> Vec<u8> {
    let mut cmd = vec![FtmsControlOpcode::SetTargetResistanceLevel as u8];
    cmd.extend_from_slice(&level.to_le_bytes());
    cmd
}

/// Build a control point command to set simulation parameters.
///
/// `wind_speed` - m/s at 0.001 resolution
/// `grade` - percent at 0.01 resolution
/// `crr` - rolling resistance at 0.0001 resolution
/// `cw` - wind resistance coefficient at 0.01 kg/m resolution
pub fn build_set_simulation(wind_speed: i16, grade: i16, crr: u8, cw: u8) -> Vec<u8> {
    let mut cmd = vec![FtmsControlOpcode::SetIndoorBikeSimulation as u8];
    cmd.extend_from_slice(&wind_speed.to_le_bytes());
    cmd.extend_from_slice(&grade.to_le_bytes());
    cmd.push(crr);
    cmd.push(cw);
    cmd
}

/// Parse a control point indication into `(request opcode, result)`.
pub fn parse_control_point_response(data: &[u8]) -> Option<(u8, ControlResult)> {
    if data.len() < 3 || data[0] != FtmsControlOpcode::ResponseCode as u8 {
        return None;
    }
    let result = match data[2] {
        0x01 => ControlResult::Success,
        0x02 => ControlResult::OpCodeNotSupported,
        0x03 => ControlResult::InvalidParameter,
        0x04 => ControlResult::OperationFailed,
        0x05 => ControlResult::ControlNotPermitted,
        other => ControlResult::Unknown(other),
    };
    Some((data[1], result))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_indoor_bike_data_speed_only() {
        // Speed: 2500 = 25.00 km/h
        let data = [0x00, 0x00, 0xC4, 0x09];
        let result = parse_indoor_bike_data(&data).unwrap();

        assert!((result.speed_kmh.unwrap() - 25.0).abs() < 0.01);
        assert!(result.power_watts.is_none());
        assert!(result.cadence_rpm.is_none());
    }

    #[test]
    fn test_parse_indoor_bike_data_with_power_and_cadence() {
        // Flags 0x0044: cadence + power. 30 km/h, 90 RPM, 250 W
        let data = [0x44, 0x00, 0xB8, 0x0B, 0xB4, 0x00, 0xFA, 0x00];
        let result = parse_indoor_bike_data(&data).unwrap();

        assert!((result.speed_kmh.unwrap() - 30.0).abs() < 0.01);
        assert_eq!(result.cadence_rpm.unwrap(), 90.0);
        assert_eq!(result.power_watts.unwrap(), 250);
    }

    #[test]
    fn test_parse_indoor_bike_data_distance_and_hr() {
        // Flags 0x0210: total distance + heart rate. 0 km/h, 1234 m, 150 bpm
        let data = [0x10, 0x02, 0x00, 0x00, 0xD2, 0x04, 0x00, 0x96];
        let result = parse_indoor_bike_data(&data).unwrap();

        assert_eq!(result.total_distance_m, Some(1234));
        assert_eq!(result.heart_rate_bpm, Some(150));
    }

    #[test]
    fn test_parse_indoor_bike_data_truncated() {
        // Power flag set but no bytes for it
        let data = [0x40, 0x00, 0xB8, 0x0B];
        assert!(parse_indoor_bike_data(&data).is_none());
    }

    #[test]
    fn test_parse_cycling_power_measurement() {
        let data = [0x00, 0x00, 0xC8, 0x00];
        let result = parse_cycling_power_measurement(&data).unwrap();

        assert_eq!(result.power_watts, 200);
        assert!(result.crank.is_none());
    }

    #[test]
    fn test_parse_cycling_power_with_wheel_and_crank() {
        // Flags 0x0030: wheel + crank revolution data
        let data = [
            0x30, 0x00, 0xC8, 0x00, // flags, power
            0x0A, 0x00, 0x00, 0x00, 0x00, 0x04, // wheel revs 10, time 1024
            0x05, 0x00, 0x00, 0x08, // crank revs 5, time 2048
        ];
        let result = parse_cycling_power_measurement(&data).unwrap();

        assert_eq!(result.crank, Some((5, 2048)));
    }

    #[test]
    fn test_parse_heart_rate_measurement_u8() {
        let data = [0x00, 0x91];
        let result = parse_heart_rate_measurement(&data).unwrap();

        assert_eq!(result.heart_rate_bpm, 145);
    }

    #[test]
    fn test_parse_heart_rate_measurement_u16() {
        let data = [0x01, 0x91, 0x00];
        let result = parse_heart_rate_measurement(&data).unwrap();

        assert_eq!(result.heart_rate_bpm, 145);
    }

    #[test]
    fn test_parse_heart_rate_rr_intervals() {
        let data = [0x10, 0x50, 0x00, 0x04, 0x10, 0x04];
        let result = parse_heart_rate_measurement(&data).unwrap();

        assert_eq!(result.heart_rate_bpm, 80);
        assert_eq!(result.rr_intervals, vec![1024, 1040]);
    }

    #[test]
    fn test_parse_csc_measurement() {
        let data = [0x03, 0x64, 0x00, 0x00, 0x00, 0x00, 0x08, 0x0A, 0x00, 0x00, 0x04];
        let result = parse_csc_measurement(&data).unwrap();

        assert_eq!(result.wheel, Some((100, 2048)));
        assert_eq!(result.crank, Some((10, 1024)));
    }

    #[test]
    fn test_build_set_target_power() {
        assert_eq!(build_set_target_power(250), vec![0x05, 0xFA, 0x00]);
    }

    #[test]
    fn test_build_set_simulation() {
        // 0 wind, 5.00% grade, crr 0.0040, cw 0.51
        let cmd = build_set_simulation(0, 500, 40, 51);
        assert_eq!(cmd, vec![0x11, 0x00, 0x00, 0xF4, 0x01, 40, 51]);
    }

    #[test]
    fn test_build_request_control_and_reset() {
        assert_eq!(build_request_control(), vec![0x00]);
        assert_eq!(build_reset(), vec![0x01]);
    }

    #[test]
    fn test_parse_control_point_response() {
        let (opcode, result) = parse_control_point_response(&[0x80, 0x05, 0x01]).unwrap();
        assert_eq!(opcode, 0x05);
        assert_eq!(result, ControlResult::Success);

        let (_, result) = parse_control_point_response(&[0x80, 0x00, 0x05]).unwrap();
        assert_eq!(result, ControlResult::ControlNotPermitted);

        assert!(parse_control_point_response(&[0x05, 0xFA, 0x00]).is_none());
    }

    #[test]
    fn test_protocol_service_mapping() {
        for protocol in [
            Protocol::BleFtms,
            Protocol::BleCyclingPower,
            Protocol::BleHeartRate,
            Protocol::BleCsc,
        ] {
            assert_eq!(
                protocol_for_service(&service_for_protocol(protocol)),
                Some(protocol)
            );
        }
    }
}
