//! In-memory transport for tests and the headless simulator.
//!
//! Devices are registered up front, advertise on demand, and accept
//! injected notifications. Connect and write behavior can be switched per
//! device to exercise timeouts, rejections and link drops without a radio.

use crate::sensors::ftms::{
    protocol_for_service, service_for_protocol, FtmsControlOpcode, FTMS_CONTROL_POINT_UUID,
};
use crate::sensors::transport::{
    Advertisement, DeviceProfile, NotificationStream, Transport, TransportEvent,
    TransportEventStream,
};
use crate::sensors::types::{ConnectionError, Protocol, SensorError};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

const EVENT_CAPACITY: usize = 256;
const NOTIFICATION_CAPACITY: usize = 256;

/// How a mock device answers a connect request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectBehavior {
    /// Connect after the configured latency
    #[default]
    Accept,
    /// Refuse with the given reason
    Reject(String),
    /// Never answer
    Hang,
}

/// How a mock device answers writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteBehavior {
    /// Accept writes and acknowledge control point commands
    #[default]
    Accept,
    /// Accept writes but answer control point commands with this result code
    Refuse(u8),
    /// Fail every write
    Fail,
    /// Never complete a write
    Hang,
}

/// A simulated peripheral.
#[derive(Debug, Clone)]
pub struct MockDevice {
    /// Device identifier
    pub device_id: String,
    /// Advertised name
    pub name: String,
    /// Advertised and discovered service UUIDs
    pub services: Vec<Uuid>,
    /// Discovered characteristic UUIDs
    pub characteristics: Vec<Uuid>,
    /// Signal strength reported in advertisements
    pub rssi: Option<i16>,
}

impl MockDevice {
    /// Build a device exposing the standard characteristics of `protocols`.
    pub fn with_protocols(device_id: &str, name: &str, protocols: &[Protocol]) -> Self {
        let services = protocols.iter().map(|p| service_for_protocol(*p)).collect();
        let characteristics = protocols
            .iter()
            .flat_map(|p| crate::sensors::ftms::notify_characteristics(*p).iter().copied())
            .collect();
        Self {
            device_id: device_id.to_string(),
            name: name.to_string(),
            services,
            characteristics,
            rssi: Some(-60),
        }
    }

    /// A smart trainer exposing FTMS.
    pub fn trainer(device_id: &str) -> Self {
        Self::with_protocols(device_id, "Mock Trainer", &[Protocol::BleFtms])
    }

    /// A heart rate strap.
    pub fn heart_rate(device_id: &str) -> Self {
        Self::with_protocols(device_id, "Mock HRM", &[Protocol::BleHeartRate])
    }

    /// A crank power meter.
    pub fn power_meter(device_id: &str) -> Self {
        Self::with_protocols(device_id, "Mock Power", &[Protocol::BleCyclingPower])
    }

    /// A speed/cadence sensor.
    pub fn speed_cadence(device_id: &str) -> Self {
        Self::with_protocols(device_id, "Mock CSC", &[Protocol::BleCsc])
    }
}

#[derive(Debug, Default)]
struct DeviceSlot {
    device: Option<MockDevice>,
    connect: ConnectBehavior,
    write: WriteBehavior,
    connected: bool,
    subscribed: HashSet<Uuid>,
    values: HashMap<Uuid, Vec<u8>>,
}

#[derive(Default)]
struct MockState {
    devices: HashMap<String, DeviceSlot>,
    channels: HashMap<(String, Uuid), broadcast::Sender<Vec<u8>>>,
    scanning: Option<Vec<Uuid>>,
    writes: Vec<(String, Uuid, Vec<u8>)>,
    connect_latency: Duration,
}

/// In-memory [`Transport`].
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    events: broadcast::Sender<TransportEvent>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Create an empty mock radio.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            events,
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a device.
    pub fn add_device(&self, device: MockDevice) {
        let mut state = self.state();
        let slot = state.devices.entry(device.device_id.clone()).or_default();
        slot.device = Some(device);
    }

    /// Latency applied to successful connects.
    pub fn set_connect_latency(&self, latency: Duration) {
        self.state().connect_latency = latency;
    }

    /// Change how a device answers connect requests.
    pub fn set_connect_behavior(&self, device_id: &str, behavior: ConnectBehavior) {
        self.state()
            .devices
            .entry(device_id.to_string())
            .or_default()
            .connect = behavior;
    }

    /// Change how a device answers writes.
    pub fn set_write_behavior(&self, device_id: &str, behavior: WriteBehavior) {
        self.state()
            .devices
            .entry(device_id.to_string())
            .or_default()
            .write = behavior;
    }

    /// Value returned by reads of a characteristic.
    pub fn set_read_value(&self, device_id: &str, characteristic: Uuid, value: Vec<u8>) {
        self.state()
            .devices
            .entry(device_id.to_string())
            .or_default()
            .values
            .insert(characteristic, value);
    }

    /// Emit an advertisement for a registered device if a matching scan is running.
    pub fn advertise(&self, device_id: &str) -> bool {
        let advertisement = {
            let state = self.state();
            let Some(filter) = &state.scanning else {
                return false;
            };
            let Some(device) = state.devices.get(device_id).and_then(|s| s.device.as_ref()) else {
                return false;
            };
            let matches = filter.is_empty() || device.services.iter().any(|s| filter.contains(s));
            if !matches {
                return false;
            }
            Advertisement {
                device_id: device.device_id.clone(),
                name: Some(device.name.clone()),
                services: device.services.clone(),
                rssi: device.rssi,
            }
        };
        let _ = self.events.send(TransportEvent::Advertisement(advertisement));
        true
    }

    /// Deliver a notification on a subscribed characteristic.
    pub fn notify(&self, device_id: &str, characteristic: Uuid, data: Vec<u8>) -> bool {
        let state = self.state();
        let subscribed = state
            .devices
            .get(device_id)
            .is_some_and(|s| s.connected && s.subscribed.contains(&characteristic));
        if !subscribed {
            return false;
        }
        state
            .channels
            .get(&(device_id.to_string(), characteristic))
            .is_some_and(|tx| tx.send(data).is_ok())
    }

    /// Simulate the link dropping without a disconnect request.
    pub fn drop_link(&self, device_id: &str) {
        {
            let mut state = self.state();
            if let Some(slot) = state.devices.get_mut(device_id) {
                slot.connected = false;
                slot.subscribed.clear();
            }
            state.channels.retain(|(id, _), _| id != device_id);
        }
        let _ = self
            .events
            .send(TransportEvent::DeviceDisconnected(device_id.to_string()));
    }

    /// Simulate the radio restoring a dropped link.
    pub fn restore_link(&self, device_id: &str) {
        if let Some(slot) = self.state().devices.get_mut(device_id) {
            slot.connected = true;
        }
        let _ = self
            .events
            .send(TransportEvent::DeviceConnected(device_id.to_string()));
    }

    /// Every write accepted so far, in order.
    pub fn writes(&self) -> Vec<(String, Uuid, Vec<u8>)> {
        self.state().writes.clone()
    }

    /// Writes to one characteristic of one device.
    pub fn writes_to(&self, device_id: &str, characteristic: Uuid) -> Vec<Vec<u8>> {
        self.state()
            .writes
            .iter()
            .filter(|(id, c, _)| id == device_id && *c == characteristic)
            .map(|(_, _, data)| data.clone())
            .collect()
    }

    /// Whether a device currently has a live link.
    pub fn is_connected(&self, device_id: &str) -> bool {
        self.state()
            .devices
            .get(device_id)
            .is_some_and(|s| s.connected)
    }

    /// Whether a scan is running.
    pub fn is_scanning(&self) -> bool {
        self.state().scanning.is_some()
    }

    fn receiver_stream<V: Clone + Send + 'static>(
        rx: broadcast::Receiver<V>,
    ) -> futures::stream::BoxStream<'static, V> {
        stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(value) => return Some((value, rx)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn start_scan(&self, services: &[Uuid]) -> Result<(), SensorError> {
        self.state().scanning = Some(services.to_vec());
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), SensorError> {
        self.state().scanning = None;
        Ok(())
    }

    async fn events(&self) -> Result<TransportEventStream, SensorError> {
        Ok(Self::receiver_stream(self.events.subscribe()))
    }

    async fn connect(&self, device_id: &str) -> Result<DeviceProfile, SensorError> {
        let (behavior, latency) = {
            let state = self.state();
            let slot = state
                .devices
                .get(device_id)
                .filter(|s| s.device.is_some())
                .ok_or_else(|| SensorError::SensorNotFound(device_id.to_string()))?;
            (slot.connect.clone(), state.connect_latency)
        };

        match behavior {
            ConnectBehavior::Accept => {}
            ConnectBehavior::Reject(reason) => return Err(ConnectionError::Rejected(reason).into()),
            ConnectBehavior::Hang => futures::future::pending::<()>().await,
        }

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state();
        let slot = state
            .devices
            .get_mut(device_id)
            .ok_or_else(|| SensorError::SensorNotFound(device_id.to_string()))?;
        slot.connected = true;
        let device = slot
            .device
            .clone()
            .ok_or_else(|| SensorError::SensorNotFound(device_id.to_string()))?;

        Ok(DeviceProfile {
            name: Some(device.name),
            services: device
                .services
                .into_iter()
                .filter(|s| protocol_for_service(s).is_some())
                .collect(),
            characteristics: device.characteristics,
        })
    }

    async fn disconnect(&self, device_id: &str) -> Result<(), SensorError> {
        let mut state = self.state();
        if let Some(slot) = state.devices.get_mut(device_id) {
            slot.connected = false;
            slot.subscribed.clear();
        }
        state.channels.retain(|(id, _), _| id != device_id);
        Ok(())
    }

    async fn read(&self, device_id: &str, characteristic: Uuid) -> Result<Vec<u8>, SensorError> {
        let state = self.state();
        let slot = state
            .devices
            .get(device_id)
            .filter(|s| s.connected)
            .ok_or_else(|| SensorError::SensorNotFound(device_id.to_string()))?;
        slot.values
            .get(&characteristic)
            .cloned()
            .ok_or_else(|| SensorError::ReadFailed(format!("no value for {}", characteristic)))
    }

    async fn write(
        &self,
        device_id: &str,
        characteristic: Uuid,
        data: &[u8],
    ) -> Result<(), SensorError> {
        let behavior = {
            let state = self.state();
            let slot = state
                .devices
                .get(device_id)
                .filter(|s| s.connected)
                .ok_or_else(|| SensorError::SensorNotFound(device_id.to_string()))?;
            let exposed = slot
                .device
                .as_ref()
                .is_some_and(|d| d.characteristics.contains(&characteristic));
            if !exposed {
                return Err(SensorError::Unsupported(characteristic.to_string()));
            }
            slot.write
        };

        let result_code = match behavior {
            WriteBehavior::Accept => 0x01,
            WriteBehavior::Refuse(code) => code,
            WriteBehavior::Fail => return Err(SensorError::WriteFailed("rejected by device".into())),
            WriteBehavior::Hang => futures::future::pending::<u8>().await,
        };

        let mut state = self.state();
        state
            .writes
            .push((device_id.to_string(), characteristic, data.to_vec()));

        if characteristic == FTMS_CONTROL_POINT_UUID {
            if let (Some(opcode), Some(tx)) = (
                data.first(),
                state.channels.get(&(device_id.to_string(), characteristic)),
            ) {
                let _ = tx.send(vec![FtmsControlOpcode::ResponseCode as u8, *opcode, result_code]);
            }
        }

        Ok(())
    }

    async fn subscribe(
        &self,
        device_id: &str,
        characteristic: Uuid,
    ) -> Result<NotificationStream, SensorError> {
        let mut state = self.state();
        let slot = state
            .devices
            .get_mut(device_id)
            .filter(|s| s.connected)
            .ok_or_else(|| SensorError::SubscriptionFailed(format!("{} not connected", device_id)))?;

        let exposed = slot
            .device
            .as_ref()
            .is_some_and(|d| d.characteristics.contains(&characteristic));
        if !exposed {
            return Err(SensorError::Unsupported(characteristic.to_string()));
        }
        slot.subscribed.insert(characteristic);

        let tx = state
            .channels
            .entry((device_id.to_string(), characteristic))
            .or_insert_with(|| broadcast::channel(NOTIFICATION_CAPACITY).0);
        Ok(Self::receiver_stream(tx.subscribe()))
    }

    async fn unsubscribe(&self, device_id: &str, characteristic: Uuid) -> Result<(), SensorError> {
        let mut state = self.state();
        if let Some(slot) = state.devices.get_mut(device_id) {
            slot.subscribed.remove(&characteristic);
        }
        state.channels.remove(&(device_id.to_string(), characteristic));
        Ok(())
    }
}
