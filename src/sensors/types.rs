//! Sensor types and enums for BLE fitness sensors.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Kind of metric a sensor can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Power in watts
    Power,
    /// Heart rate in BPM
    HeartRate,
    /// Cadence in RPM
    Cadence,
    /// Speed in km/h
    Speed,
    /// Cumulative distance in meters as reported by the device
    Distance,
    /// Latitude/longitude pair
    Location,
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricKind::Power => write!(f, "Power"),
            MetricKind::HeartRate => write!(f, "Heart Rate"),
            MetricKind::Cadence => write!(f, "Cadence"),
            MetricKind::Speed => write!(f, "Speed"),
            MetricKind::Distance => write!(f, "Distance"),
            MetricKind::Location => write!(f, "Location"),
        }
    }
}

/// BLE service class advertised by a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// BLE Fitness Machine Service (0x1826)
    BleFtms,
    /// BLE Cycling Power Service (0x1818)
    BleCyclingPower,
    /// BLE Heart Rate Service (0x180D)
    BleHeartRate,
    /// BLE Cycling Speed and Cadence (0x1816)
    BleCsc,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::BleFtms => write!(f, "FTMS"),
            Protocol::BleCyclingPower => write!(f, "Cycling Power"),
            Protocol::BleHeartRate => write!(f, "Heart Rate"),
            Protocol::BleCsc => write!(f, "Cycling Speed/Cadence"),
        }
    }
}

/// What a connected sensor can do.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Metrics the sensor reports
    pub metrics: BTreeSet<MetricKind>,
    /// Whether the sensor accepts FTMS control point writes
    pub controllable: bool,
}

impl Capabilities {
    /// Derive capabilities from the advertised service classes.
    pub fn from_protocols<'a>(protocols: impl IntoIterator<Item = &'a Protocol>) -> Self {
        let mut caps = Capabilities::default();
        for protocol in protocols {
            match protocol {
                Protocol::BleFtms => {
                    caps.metrics.extend([
                        MetricKind::Power,
                        MetricKind::Cadence,
                        MetricKind::Speed,
                        MetricKind::Distance,
                    ]);
                    caps.controllable = true;
                }
                Protocol::BleCyclingPower => {
                    caps.metrics.extend([MetricKind::Power, MetricKind::Cadence]);
                }
                Protocol::BleHeartRate => {
                    caps.metrics.insert(MetricKind::HeartRate);
                }
                Protocol::BleCsc => {
                    caps.metrics.extend([MetricKind::Speed, MetricKind::Cadence]);
                }
            }
        }
        caps
    }

    /// True when the sensor reports nothing the engine understands.
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty() && !self.controllable
    }

    /// Check whether a metric is readable.
    pub fn reads(&self, metric: MetricKind) -> bool {
        self.metrics.contains(&metric)
    }
}

/// Connection state of a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not connected
    #[default]
    Disconnected,
    /// Connection in progress
    Connecting,
    /// Active connection
    Connected,
    /// Link dropped, waiting for the transport to restore it
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting..."),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Reconnecting => write!(f, "Reconnecting..."),
        }
    }
}

/// A sensor discovered during scanning.
#[derive(Debug, Clone)]
pub struct DiscoveredSensor {
    /// Transport device identifier
    pub device_id: String,
    /// User-friendly name (from advertisement)
    pub name: String,
    /// Advertised service classes
    pub protocols: Vec<Protocol>,
    /// Capabilities implied by the advertisement
    pub capabilities: Capabilities,
    /// Signal strength (RSSI)
    pub signal_strength: Option<i16>,
    /// When the sensor was last seen
    pub last_seen: Instant,
}

/// A sensor the manager currently owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectedSensor {
    /// Transport device identifier
    pub device_id: String,
    /// User-friendly name
    pub display_name: String,
    /// Service classes found during discovery
    pub protocols: Vec<Protocol>,
    /// Readable metrics and controllability
    pub capabilities: Capabilities,
    /// Current connection state
    pub connection_state: ConnectionState,
    /// Identifies the current link; changes on every connect and reconnect
    pub link_epoch: u64,
}

impl ConnectedSensor {
    /// Whether this sensor can act as the controllable trainer.
    pub fn is_controllable(&self) -> bool {
        self.capabilities.controllable
    }
}

/// Value carried by a reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingValue {
    /// A plain number in the metric's unit
    Scalar(f64),
    /// Latitude/longitude in degrees
    Coordinate { lat: f64, lon: f64 },
}

impl ReadingValue {
    /// The scalar value, if this is one.
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            ReadingValue::Scalar(v) => Some(*v),
            ReadingValue::Coordinate { .. } => None,
        }
    }
}

/// A single immutable reading from a device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReading {
    /// Source device
    pub device_id: String,
    /// What was measured
    pub metric: MetricKind,
    /// Measured value
    pub value: ReadingValue,
    /// Arrival time on the monotonic clock
    pub timestamp: Instant,
}

impl DeviceReading {
    /// Create a scalar reading.
    pub fn scalar(device_id: &str, metric: MetricKind, value: f64, timestamp: Instant) -> Self {
        Self {
            device_id: device_id.to_string(),
            metric,
            value: ReadingValue::Scalar(value),
            timestamp,
        }
    }

    /// Create a location reading.
    pub fn location(device_id: &str, lat: f64, lon: f64, timestamp: Instant) -> Self {
        Self {
            device_id: device_id.to_string(),
            metric: MetricKind::Location,
            value: ReadingValue::Coordinate { lat, lon },
            timestamp,
        }
    }
}

/// Result code reported on the FTMS control point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlResult {
    Success,
    OpCodeNotSupported,
    InvalidParameter,
    OperationFailed,
    ControlNotPermitted,
    Unknown(u8),
}

impl ControlResult {
    /// Whether the trainer accepted the command.
    pub fn is_success(&self) -> bool {
        matches!(self, ControlResult::Success)
    }
}

/// The trainer's answer to a control point command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlIndication {
    /// Opcode of the command being answered
    pub opcode: u8,
    /// Result reported by the trainer
    pub result: ControlResult,
}

/// Events from the sensor system.
#[derive(Debug, Clone)]
pub enum SensorEvent {
    /// A new sensor was discovered during scanning
    Discovered(DiscoveredSensor),
    /// Sensor connection state changed
    ConnectionChanged {
        device_id: String,
        state: ConnectionState,
    },
    /// Indication received on the trainer control point
    ControlResponse {
        device_id: String,
        opcode: u8,
        result: ControlResult,
    },
    /// Scan started
    ScanStarted,
    /// Scan stopped
    ScanStopped,
    /// Error occurred
    Error(String),
}

/// Configuration for the sensor manager.
#[derive(Debug, Clone)]
pub struct SensorConfig {
    /// Timeout for a connection attempt
    pub connect_timeout: Duration,
    /// Timeout for a single control point write
    pub control_write_timeout: Duration,
    /// How long a dropped sensor may stay in `Reconnecting`
    pub reconnect_grace: Duration,
    /// Capacity of the reading broadcast channel
    pub reading_buffer: usize,
    /// Wheel circumference used for CSC speed
    pub wheel_circumference_m: f64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(8),
            control_write_timeout: Duration::from_millis(2500),
            reconnect_grace: Duration::from_secs(10),
            reading_buffer: 1024,
            wheel_circumference_m: 2.105,
        }
    }
}

/// Why a connection attempt failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    /// The radio did not complete the connection in time
    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),

    /// The device or transport refused the connection
    #[error("Connection rejected: {0}")]
    Rejected(String),

    /// The device exposes no supported fitness profile
    #[error("Unsupported sensor profile")]
    UnsupportedProfile,
}

/// Errors that can occur in the sensor system.
#[derive(Debug, Error)]
pub enum SensorError {
    /// Bluetooth adapter not found or unavailable
    #[error("Bluetooth adapter not found")]
    AdapterNotFound,

    /// Failed to start or stop scanning
    #[error("Scan failed: {0}")]
    ScanFailed(String),

    /// Sensor not connected with given device ID
    #[error("Sensor not found: {0}")]
    SensorNotFound(String),

    /// Connection attempt failed
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Failed to subscribe to sensor notifications
    #[error("Failed to subscribe to notifications: {0}")]
    SubscriptionFailed(String),

    /// Characteristic read failed
    #[error("Read failed: {0}")]
    ReadFailed(String),

    /// Characteristic write failed
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// Characteristic write did not complete in time
    #[error("Write timed out after {0:?}")]
    WriteTimeout(Duration),

    /// Characteristic not exposed by the device
    #[error("Characteristic not available: {0}")]
    Unsupported(String),

    /// Generic transport error
    #[error("Transport error: {0}")]
    Transport(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ftms_is_controllable() {
        let caps = Capabilities::from_protocols(&[Protocol::BleFtms]);
        assert!(caps.controllable);
        assert!(caps.reads(MetricKind::Power));
        assert!(!caps.reads(MetricKind::HeartRate));
    }

    #[test]
    fn test_combined_protocols() {
        let caps = Capabilities::from_protocols(&[Protocol::BleHeartRate, Protocol::BleCsc]);
        assert!(!caps.controllable);
        assert!(caps.reads(MetricKind::HeartRate));
        assert!(caps.reads(MetricKind::Speed));
        assert!(caps.reads(MetricKind::Cadence));
    }

    #[test]
    fn test_empty_capabilities() {
        let caps = Capabilities::from_protocols(&[]);
        assert!(caps.is_empty());
    }
}
