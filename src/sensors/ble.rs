//! btleplug-backed transport.

use crate::sensors::transport::{
    Advertisement, DeviceProfile, NotificationStream, Transport, TransportEvent,
    TransportEventStream,
};
use crate::sensors::types::{ConnectionError, SensorError};
use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::StreamExt;

/// Transport over the first Bluetooth adapter on the host.
pub struct BleTransport {
    adapter: Adapter,
}

impl BleTransport {
    /// Initialize the BLE adapter.
    pub async fn new() -> Result<Self, SensorError> {
        tracing::info!("Initializing BLE transport");

        let manager = Manager::new()
            .await
            .map_err(|e| SensorError::Transport(e.to_string()))?;

        let adapters = manager
            .adapters()
            .await
            .map_err(|e| SensorError::Transport(e.to_string()))?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(SensorError::AdapterNotFound)?;

        tracing::info!("BLE adapter initialized");
        Ok(Self { adapter })
    }

    async fn peripheral(&self, device_id: &str) -> Result<Peripheral, SensorError> {
        let peripherals = self
            .adapter
            .peripherals()
            .await
            .map_err(|e| SensorError::Transport(e.to_string()))?;

        peripherals
            .into_iter()
            .find(|p| p.id().to_string() == device_id)
            .ok_or_else(|| SensorError::SensorNotFound(device_id.to_string()))
    }

    async fn characteristic(
        &self,
        device_id: &str,
        uuid: uuid::Uuid,
    ) -> Result<(Peripheral, Characteristic), SensorError> {
        let peripheral = self.peripheral(device_id).await?;
        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or_else(|| SensorError::Unsupported(uuid.to_string()))?;
        Ok((peripheral, characteristic))
    }

    async fn advertisement(peripheral: &Peripheral) -> Option<Advertisement> {
        let properties = peripheral.properties().await.ok()??;
        Some(Advertisement {
            device_id: peripheral.id().to_string(),
            name: properties.local_name,
            services: properties.services,
            rssi: properties.rssi,
        })
    }
}

#[async_trait]
impl Transport for BleTransport {
    async fn start_scan(&self, services: &[uuid::Uuid]) -> Result<(), SensorError> {
        let filter = ScanFilter {
            services: services.to_vec(),
        };
        self.adapter
            .start_scan(filter)
            .await
            .map_err(|e| SensorError::ScanFailed(e.to_string()))
    }

    async fn stop_scan(&self) -> Result<(), SensorError> {
        self.adapter
            .stop_scan()
            .await
            .map_err(|e| SensorError::ScanFailed(e.to_string()))
    }

    async fn events(&self) -> Result<TransportEventStream, SensorError> {
        let events = self
            .adapter
            .events()
            .await
            .map_err(|e| SensorError::Transport(e.to_string()))?;

        let adapter = self.adapter.clone();
        let stream = events.filter_map(move |event| {
            let adapter = adapter.clone();
            async move {
                match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                        let peripheral = adapter.peripheral(&id).await.ok()?;
                        Self::advertisement(&peripheral)
                            .await
                            .map(TransportEvent::Advertisement)
                    }
                    CentralEvent::DeviceConnected(id) => {
                        Some(TransportEvent::DeviceConnected(id.to_string()))
                    }
                    CentralEvent::DeviceDisconnected(id) => {
                        Some(TransportEvent::DeviceDisconnected(id.to_string()))
                    }
                    _ => None,
                }
            }
        });

        Ok(stream.boxed())
    }

    async fn connect(&self, device_id: &str) -> Result<DeviceProfile, SensorError> {
        let peripheral = self.peripheral(device_id).await?;

        peripheral
            .connect()
            .await
            .map_err(|e| ConnectionError::Rejected(e.to_string()))?;

        peripheral
            .discover_services()
            .await
            .map_err(|e| ConnectionError::Rejected(e.to_string()))?;

        let name = peripheral
            .properties()
            .await
            .ok()
            .flatten()
            .and_then(|p| p.local_name);

        let profile = DeviceProfile {
            name,
            services: peripheral.services().iter().map(|s| s.uuid).collect(),
            characteristics: peripheral.characteristics().iter().map(|c| c.uuid).collect(),
        };

        tracing::debug!(
            "Discovered {} services, {} characteristics on {}",
            profile.services.len(),
            profile.characteristics.len(),
            device_id
        );

        Ok(profile)
    }

    async fn disconnect(&self, device_id: &str) -> Result<(), SensorError> {
        let peripheral = self.peripheral(device_id).await?;
        peripheral
            .disconnect()
            .await
            .map_err(|e| SensorError::Transport(e.to_string()))
    }

    async fn read(&self, device_id: &str, characteristic: uuid::Uuid) -> Result<Vec<u8>, SensorError> {
        let (peripheral, characteristic) = self.characteristic(device_id, characteristic).await?;
        peripheral
            .read(&characteristic)
            .await
            .map_err(|e| SensorError::ReadFailed(e.to_string()))
    }

    async fn write(
        &self,
        device_id: &str,
        characteristic: uuid::Uuid,
        data: &[u8],
    ) -> Result<(), SensorError> {
        let (peripheral, characteristic) = self.characteristic(device_id, characteristic).await?;
        peripheral
            .write(&characteristic, data, WriteType::WithResponse)
            .await
            .map_err(|e| SensorError::WriteFailed(e.to_string()))
    }

    async fn subscribe(
        &self,
        device_id: &str,
        characteristic: uuid::Uuid,
    ) -> Result<NotificationStream, SensorError> {
        let (peripheral, characteristic) = self.characteristic(device_id, characteristic).await?;

        peripheral
            .subscribe(&characteristic)
            .await
            .map_err(|e| SensorError::SubscriptionFailed(e.to_string()))?;

        let notifications = peripheral
            .notifications()
            .await
            .map_err(|e| SensorError::SubscriptionFailed(e.to_string()))?;

        let uuid = characteristic.uuid;
        let stream = notifications.filter_map(move |notification| async move {
            (notification.uuid == uuid).then_some(notification.value)
        });

        Ok(stream.boxed())
    }

    async fn unsubscribe(&self, device_id: &str, characteristic: uuid::Uuid) -> Result<(), SensorError> {
        let (peripheral, characteristic) = self.characteristic(device_id, characteristic).await?;
        peripheral
            .unsubscribe(&characteristic)
            .await
            .map_err(|e| SensorError::SubscriptionFailed(e.to_string()))
    }
}
