//! Radio abstraction used by the sensor manager.
//!
//! The manager never talks to a Bluetooth stack directly. Everything it needs
//! from the radio goes through [`Transport`], which is implemented by the
//! btleplug adapter in [`crate::sensors::ble`] and by the in-memory
//! [`crate::sensors::mock::MockTransport`].

use crate::sensors::types::SensorError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

/// Advertisement seen while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Transport device identifier
    pub device_id: String,
    /// Advertised local name
    pub name: Option<String>,
    /// Advertised service UUIDs
    pub services: Vec<Uuid>,
    /// Signal strength (RSSI)
    pub rssi: Option<i16>,
}

/// Adapter-level events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A device advertised while scanning
    Advertisement(Advertisement),
    /// The link to a device came up
    DeviceConnected(String),
    /// The link to a device went down
    DeviceDisconnected(String),
}

/// What a device exposes after connection and service discovery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceProfile {
    /// Name reported by the device
    pub name: Option<String>,
    /// Discovered service UUIDs
    pub services: Vec<Uuid>,
    /// Discovered characteristic UUIDs
    pub characteristics: Vec<Uuid>,
}

impl DeviceProfile {
    /// Whether the device exposes a characteristic.
    pub fn has_characteristic(&self, characteristic: &Uuid) -> bool {
        self.characteristics.contains(characteristic)
    }
}

/// Stream of raw characteristic values.
pub type NotificationStream = BoxStream<'static, Vec<u8>>;

/// Stream of adapter events.
pub type TransportEventStream = BoxStream<'static, TransportEvent>;

/// Capability surface the engine needs from a wireless radio.
///
/// Every method may suspend on radio round-trips. Callers apply their own
/// timeouts.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Start scanning for devices advertising any of `services`.
    async fn start_scan(&self, services: &[Uuid]) -> Result<(), SensorError>;

    /// Stop scanning.
    async fn stop_scan(&self) -> Result<(), SensorError>;

    /// Subscribe to adapter events. Each call returns an independent stream.
    async fn events(&self) -> Result<TransportEventStream, SensorError>;

    /// Connect and run service discovery.
    async fn connect(&self, device_id: &str) -> Result<DeviceProfile, SensorError>;

    /// Drop the link to a device.
    async fn disconnect(&self, device_id: &str) -> Result<(), SensorError>;

    /// Read a characteristic value.
    async fn read(&self, device_id: &str, characteristic: Uuid) -> Result<Vec<u8>, SensorError>;

    /// Write a characteristic value with response.
    async fn write(
        &self,
        device_id: &str,
        characteristic: Uuid,
        data: &[u8],
    ) -> Result<(), SensorError>;

    /// Enable notifications or indications and return their values.
    async fn subscribe(
        &self,
        device_id: &str,
        characteristic: Uuid,
    ) -> Result<NotificationStream, SensorError>;

    /// Disable notifications or indications.
    async fn unsubscribe(&self, device_id: &str, characteristic: Uuid) -> Result<(), SensorError>;
}
