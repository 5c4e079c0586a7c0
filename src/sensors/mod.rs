//! Sensor module for BLE fitness device communication.

pub mod ble;
pub mod decode;
pub mod ftms;
pub mod manager;
pub mod mock;
pub mod transport;
pub mod types;

pub use ble::BleTransport;
pub use decode::ReadingDecoder;
pub use manager::{DiscoveryFilter, SensorManager, SubscriptionHandle};
pub use mock::{ConnectBehavior, MockDevice, MockTransport, WriteBehavior};
pub use transport::{Advertisement, DeviceProfile, Transport, TransportEvent};
pub use types::{
    Capabilities, ConnectedSensor, ConnectionError, ConnectionState, ControlIndication,
    ControlResult, DeviceReading, DiscoveredSensor, MetricKind, Protocol, ReadingValue,
    SensorConfig, SensorError, SensorEvent,
};
