//! Sensor manager for device discovery, connection and data streaming.
//!
//! The manager owns every connected sensor. Each device gets one pump task
//! that decodes its notifications and publishes readings on a broadcast
//! channel, so any number of consumers can follow the merged stream with
//! their own cursor. Spontaneous link drops put the sensor into
//! `Reconnecting`; the radio is given a grace window to restore the link
//! before the sensor is dropped.

use crate::sensors::decode::ReadingDecoder;
use crate::sensors::ftms::{
    notify_characteristics, parse_control_point_response, protocol_for_service,
    service_for_protocol, FTMS_CONTROL_POINT_UUID,
};
use crate::sensors::transport::{DeviceProfile, Transport, TransportEvent};
use crate::sensors::types::{
    Capabilities, ConnectedSensor, ConnectionError, ConnectionState, ControlIndication,
    DeviceReading, DiscoveredSensor, Protocol, SensorConfig, SensorError, SensorEvent,
};
use futures::future::FutureExt;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::time::Instant;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

const EVENT_BUFFER: usize = 256;

/// Which service classes a scan looks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryFilter {
    /// Protocols to report
    pub protocols: Vec<Protocol>,
}

impl Default for DiscoveryFilter {
    fn default() -> Self {
        Self {
            protocols: vec![
                Protocol::BleFtms,
                Protocol::BleCyclingPower,
                Protocol::BleHeartRate,
                Protocol::BleCsc,
            ],
        }
    }
}

impl DiscoveryFilter {
    /// Only look for the given protocols.
    pub fn only(protocols: &[Protocol]) -> Self {
        Self {
            protocols: protocols.to_vec(),
        }
    }
}

struct DeviceEntry {
    sensor: ConnectedSensor,
    profile: DeviceProfile,
    subscribed: Vec<Uuid>,
    sequence: u64,
    control_indication: Option<ControlIndication>,
    pump: Option<JoinHandle<()>>,
    grace: Option<JoinHandle<()>>,
}

impl DeviceEntry {
    fn stop_tasks(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Some(grace) = self.grace.take() {
            grace.abort();
        }
    }
}

struct Inner<T: Transport> {
    transport: Arc<T>,
    config: SensorConfig,
    devices: Mutex<HashMap<String, DeviceEntry>>,
    discovered: Mutex<HashMap<String, DiscoveredSensor>>,
    readings_tx: broadcast::Sender<DeviceReading>,
    events_tx: broadcast::Sender<SensorEvent>,
    scanning: watch::Sender<bool>,
    sequence: AtomicU64,
    links: AtomicU64,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Transport> Inner<T> {
    fn send_event(&self, event: SensorEvent) {
        let _ = self.events_tx.send(event);
    }

    fn send_state(&self, device_id: &str, state: ConnectionState) {
        self.send_event(SensorEvent::ConnectionChanged {
            device_id: device_id.to_string(),
            state,
        });
    }
}

impl<T: Transport> Drop for Inner<T> {
    fn drop(&mut self) {
        if let Ok(mut monitor) = self.monitor.try_lock() {
            if let Some(task) = monitor.take() {
                task.abort();
            }
        }
        if let Ok(mut devices) = self.devices.try_lock() {
            for entry in devices.values_mut() {
                entry.stop_tasks();
            }
        }
    }
}

/// Manages sensor discovery, connection, and reading fan-out.
pub struct SensorManager<T: Transport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for SensorManager<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Handle for a callback subscription. Dropping it unsubscribes.
pub struct SubscriptionHandle {
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    /// Stop delivering readings to the callback.
    pub fn unsubscribe(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Whether the callback is still being fed.
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl<T: Transport> SensorManager<T> {
    /// Create a new sensor manager.
    pub fn new(transport: T, config: SensorConfig) -> Self {
        Self::with_shared_transport(Arc::new(transport), config)
    }

    /// Create a new sensor manager with default configuration.
    pub fn with_defaults(transport: T) -> Self {
        Self::new(transport, SensorConfig::default())
    }

    /// Create a manager over a transport the caller keeps a handle to.
    pub fn with_shared_transport(transport: Arc<T>, config: SensorConfig) -> Self {
        let (readings_tx, _) = broadcast::channel(config.reading_buffer.max(1));
        let (events_tx, _) = broadcast::channel(EVENT_BUFFER);
        let (scanning, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                devices: Mutex::new(HashMap::new()),
                discovered: Mutex::new(HashMap::new()),
                readings_tx,
                events_tx,
                scanning,
                sequence: AtomicU64::new(0),
                links: AtomicU64::new(0),
                monitor: Mutex::new(None),
            }),
        }
    }

    /// Manager configuration.
    pub fn config(&self) -> &SensorConfig {
        &self.inner.config
    }

    /// Subscribe to lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<SensorEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Subscribe to the merged reading stream.
    ///
    /// Each receiver has its own cursor. A receiver that falls behind by more
    /// than the buffer loses the oldest readings and gets
    /// `RecvError::Lagged(skipped)` once.
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceReading> {
        self.inner.readings_tx.subscribe()
    }

    /// Deliver every reading to `callback` until the handle is dropped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe_with<F>(&self, mut callback: F) -> SubscriptionHandle
    where
        F: FnMut(DeviceReading) + Send + 'static,
    {
        let mut rx = self.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(reading) => callback(reading),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Reading subscriber lagged, skipped {} readings", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        SubscriptionHandle { task: Some(task) }
    }

    /// Start scanning and return the discovery stream.
    ///
    /// The stream ends when [`stop_scan`](Self::stop_scan) is called. A new
    /// scan can be started afterwards.
    pub async fn scan(
        &self,
        filter: DiscoveryFilter,
    ) -> Result<BoxStream<'static, DiscoveredSensor>, SensorError> {
        let services: Vec<Uuid> = filter
            .protocols
            .iter()
            .map(|p| service_for_protocol(*p))
            .collect();

        let events = self.inner.transport.events().await?;
        self.inner.transport.start_scan(&services).await?;
        self.inner.scanning.send_replace(true);
        self.inner.discovered.lock().await.clear();

        tracing::info!("Starting sensor discovery for {:?}", filter.protocols);
        self.inner.send_event(SensorEvent::ScanStarted);

        let mut stop_rx = self.inner.scanning.subscribe();
        let stopped = async move {
            let _ = stop_rx.wait_for(|scanning| !*scanning).await;
        };

        let weak = Arc::downgrade(&self.inner);
        let protocols = filter.protocols;
        let discoveries = events
            .filter_map(move |event| {
                let weak = weak.clone();
                let protocols = protocols.clone();
                async move {
                    let TransportEvent::Advertisement(advertisement) = event else {
                        return None;
                    };
                    let inner = weak.upgrade()?;

                    let mut advertised: Vec<Protocol> = advertisement
                        .services
                        .iter()
                        .filter_map(protocol_for_service)
                        .filter(|p| protocols.contains(p))
                        .collect();
                    advertised.sort();
                    advertised.dedup();
                    if advertised.is_empty() {
                        tracing::debug!(
                            "Ignoring unsupported advertisement from {}",
                            advertisement.device_id
                        );
                        return None;
                    }

                    let sensor = DiscoveredSensor {
                        device_id: advertisement.device_id.clone(),
                        name: advertisement
                            .name
                            .unwrap_or_else(|| "Unknown Sensor".to_string()),
                        capabilities: Capabilities::from_protocols(&advertised),
                        protocols: advertised,
                        signal_strength: advertisement.rssi,
                        last_seen: Instant::now().into_std(),
                    };

                    inner
                        .discovered
                        .lock()
                        .await
                        .insert(sensor.device_id.clone(), sensor.clone());
                    inner.send_event(SensorEvent::Discovered(sensor.clone()));
                    Some(sensor)
                }
            })
            .take_until(stopped.boxed());

        Ok(discoveries.boxed())
    }

    /// Stop scanning. Ends any open discovery stream.
    pub async fn stop_scan(&self) -> Result<(), SensorError> {
        if !self.inner.scanning.send_replace(false) {
            return Ok(());
        }

        tracing::info!("Stopping sensor discovery");
        self.inner.transport.stop_scan().await?;
        self.inner.send_event(SensorEvent::ScanStopped);
        Ok(())
    }

    /// Check if currently scanning.
    pub fn is_scanning(&self) -> bool {
        *self.inner.scanning.borrow()
    }

    /// Sensors seen during the current or last scan.
    pub async fn discovered(&self) -> Vec<DiscoveredSensor> {
        self.inner.discovered.lock().await.values().cloned().collect()
    }

    /// Connect to a sensor and start streaming its readings.
    pub async fn connect(&self, device_id: &str) -> Result<ConnectedSensor, SensorError> {
        if let Some(entry) = self.inner.devices.lock().await.get(device_id) {
            if entry.sensor.connection_state == ConnectionState::Connected {
                return Ok(entry.sensor.clone());
            }
        }

        self.ensure_monitor().await?;

        tracing::info!("Connecting to sensor: {}", device_id);
        self.inner.send_state(device_id, ConnectionState::Connecting);

        let timeout = self.inner.config.connect_timeout;
        let profile = match tokio::time::timeout(timeout, self.inner.transport.connect(device_id))
            .await
        {
            Ok(Ok(profile)) => profile,
            Ok(Err(e)) => {
                tracing::warn!("Connection to {} failed: {}", device_id, e);
                self.inner.send_state(device_id, ConnectionState::Disconnected);
                return Err(e);
            }
            Err(_) => {
                tracing::warn!("Connection to {} timed out after {:?}", device_id, timeout);
                self.inner.send_state(device_id, ConnectionState::Disconnected);
                return Err(ConnectionError::Timeout(timeout).into());
            }
        };

        let mut protocols: Vec<Protocol> = profile
            .services
            .iter()
            .filter_map(protocol_for_service)
            .collect();
        protocols.sort();
        protocols.dedup();

        if protocols.is_empty() {
            tracing::warn!("Sensor {} exposes no supported profile", device_id);
            let _ = self.inner.transport.disconnect(device_id).await;
            self.inner.send_state(device_id, ConnectionState::Disconnected);
            return Err(ConnectionError::UnsupportedProfile.into());
        }

        let (pump, subscribed) =
            match Self::start_pump(&self.inner, device_id, &protocols, &profile).await {
                Ok(started) => started,
                Err(e) => {
                    let _ = self.inner.transport.disconnect(device_id).await;
                    self.inner.send_state(device_id, ConnectionState::Disconnected);
                    return Err(e);
                }
            };

        let display_name = match profile.name.clone() {
            Some(name) => name,
            None => self
                .inner
                .discovered
                .lock()
                .await
                .get(device_id)
                .map(|d| d.name.clone())
                .unwrap_or_else(|| device_id.to_string()),
        };

        let mut capabilities = Capabilities::from_protocols(&protocols);
        capabilities.controllable &= profile.has_characteristic(&FTMS_CONTROL_POINT_UUID);

        let sensor = ConnectedSensor {
            device_id: device_id.to_string(),
            display_name,
            protocols,
            capabilities,
            connection_state: ConnectionState::Connected,
            link_epoch: self.inner.links.fetch_add(1, Ordering::SeqCst),
        };

        let entry = DeviceEntry {
            sensor: sensor.clone(),
            profile,
            subscribed,
            sequence: self.inner.sequence.fetch_add(1, Ordering::SeqCst),
            control_indication: None,
            pump: Some(pump),
            grace: None,
        };
        if let Some(mut previous) = self
            .inner
            .devices
            .lock()
            .await
            .insert(device_id.to_string(), entry)
        {
            previous.stop_tasks();
        }

        self.inner.send_state(device_id, ConnectionState::Connected);
        tracing::info!("Connected to sensor: {} ({})", sensor.display_name, device_id);

        Ok(sensor)
    }

    /// Subscribe to every characteristic implied by `protocols` and spawn the pump.
    async fn start_pump(
        inner: &Arc<Inner<T>>,
        device_id: &str,
        protocols: &[Protocol],
        profile: &DeviceProfile,
    ) -> Result<(JoinHandle<()>, Vec<Uuid>), SensorError> {
        let mut characteristics: Vec<Uuid> = protocols
            .iter()
            .flat_map(|p| notify_characteristics(*p).iter().copied())
            .filter(|c| profile.has_characteristic(c))
            .collect();
        characteristics.sort();
        characteristics.dedup();

        let mut streams = Vec::with_capacity(characteristics.len());
        for characteristic in &characteristics {
            let characteristic = *characteristic;
            let stream = inner
                .transport
                .subscribe(device_id, characteristic)
                .await?;
            tracing::debug!("Subscribed to characteristic {} on {}", characteristic, device_id);
            streams.push(stream.map(move |data| (characteristic, data)).boxed());
        }

        let readings_tx = inner.readings_tx.clone();
        let events_tx = inner.events_tx.clone();
        let weak = Arc::downgrade(inner);
        let mut decoder = ReadingDecoder::new(device_id, inner.config.wheel_circumference_m);
        let device = device_id.to_string();

        let pump = tokio::spawn(async move {
            let mut notifications = stream::select_all(streams);
            while let Some((characteristic, data)) = notifications.next().await {
                if characteristic == FTMS_CONTROL_POINT_UUID {
                    if let Some((opcode, result)) = parse_control_point_response(&data) {
                        if result.is_success() {
                            tracing::debug!(
                                "Control point response from {}: opcode {:#04x} -> {:?}",
                                device,
                                opcode,
                                result
                            );
                        } else {
                            tracing::warn!(
                                "Trainer {} refused opcode {:#04x}: {:?}",
                                device,
                                opcode,
                                result
                            );
                        }
                        if let Some(inner) = weak.upgrade() {
                            if let Some(entry) = inner.devices.lock().await.get_mut(&device) {
                                entry.control_indication =
                                    Some(ControlIndication { opcode, result });
                            }
                        }
                        let _ = events_tx.send(SensorEvent::ControlResponse {
                            device_id: device.clone(),
                            opcode,
                            result,
                        });
                    }
                    continue;
                }

                let now = Instant::now().into_std();
                for reading in decoder.decode(characteristic, &data, now) {
                    let _ = readings_tx.send(reading);
                }
            }
            tracing::debug!("Notification pump for {} ended", device);
        });

        Ok((pump, characteristics))
    }

    /// Disconnect a sensor. Disconnecting an unknown sensor is a no-op.
    pub async fn disconnect(&self, device_id: &str) -> Result<(), SensorError> {
        let Some(mut entry) = self.inner.devices.lock().await.remove(device_id) else {
            return Ok(());
        };

        tracing::info!("Disconnecting from sensor: {}", device_id);
        entry.stop_tasks();

        for characteristic in &entry.subscribed {
            if let Err(e) = self
                .inner
                .transport
                .unsubscribe(device_id, *characteristic)
                .await
            {
                tracing::debug!("Unsubscribe from {} failed: {}", characteristic, e);
            }
        }

        let result = self.inner.transport.disconnect(device_id).await;
        self.inner.send_state(device_id, ConnectionState::Disconnected);

        if let Err(e) = &result {
            tracing::warn!("Transport disconnect of {} failed: {}", device_id, e);
        }
        result
    }

    /// Connected sensors in connection order.
    pub async fn connected_sensors(&self) -> Vec<ConnectedSensor> {
        let devices = self.inner.devices.lock().await;
        let mut entries: Vec<&DeviceEntry> = devices.values().collect();
        entries.sort_by_key(|e| e.sequence);
        entries.into_iter().map(|e| e.sensor.clone()).collect()
    }

    /// Look up one sensor.
    pub async fn sensor(&self, device_id: &str) -> Option<ConnectedSensor> {
        self.inner
            .devices
            .lock()
            .await
            .get(device_id)
            .map(|e| e.sensor.clone())
    }

    /// The first connected sensor that accepts trainer control.
    pub async fn controllable_trainer(&self) -> Option<ConnectedSensor> {
        self.inner
            .devices
            .lock()
            .await
            .values()
            .filter(|e| {
                e.sensor.is_controllable()
                    && e.sensor.connection_state == ConnectionState::Connected
            })
            .min_by_key(|e| e.sequence)
            .map(|e| e.sensor.clone())
    }

    /// Write a command to the trainer control point.
    pub async fn write_control_point(
        &self,
        device_id: &str,
        command: &[u8],
    ) -> Result<(), SensorError> {
        self.ensure_link(device_id, FTMS_CONTROL_POINT_UUID).await?;
        if let Some(entry) = self.inner.devices.lock().await.get_mut(device_id) {
            entry.control_indication = None;
        }

        let timeout = self.inner.config.control_write_timeout;
        match tokio::time::timeout(
            timeout,
            self.inner
                .transport
                .write(device_id, FTMS_CONTROL_POINT_UUID, command),
        )
        .await
        {
            Ok(Ok(())) => {
                tracing::debug!("Wrote control point command {:02x?} to {}", command, device_id);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SensorError::WriteTimeout(timeout)),
        }
    }

    /// The trainer's answer to the most recent control point write, once it
    /// has arrived.
    pub async fn control_indication(&self, device_id: &str) -> Option<ControlIndication> {
        self.inner
            .devices
            .lock()
            .await
            .get(device_id)
            .and_then(|e| e.control_indication)
    }

    /// Read a characteristic from a connected sensor.
    pub async fn read_characteristic(
        &self,
        device_id: &str,
        characteristic: Uuid,
    ) -> Result<Vec<u8>, SensorError> {
        self.ensure_link(device_id, characteristic).await?;

        let timeout = self.inner.config.control_write_timeout;
        tokio::time::timeout(timeout, self.inner.transport.read(device_id, characteristic))
            .await
            .map_err(|_| SensorError::ReadFailed(format!("timed out after {:?}", timeout)))?
    }

    async fn ensure_link(&self, device_id: &str, characteristic: Uuid) -> Result<(), SensorError> {
        let devices = self.inner.devices.lock().await;
        let entry = devices
            .get(device_id)
            .ok_or_else(|| SensorError::SensorNotFound(device_id.to_string()))?;
        if entry.sensor.connection_state != ConnectionState::Connected {
            return Err(SensorError::Transport(format!(
                "{} is {}",
                device_id, entry.sensor.connection_state
            )));
        }
        if !entry.profile.has_characteristic(&characteristic) {
            return Err(SensorError::Unsupported(characteristic.to_string()));
        }
        Ok(())
    }

    /// Stop scanning and disconnect every sensor.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down SensorManager");

        let _ = self.stop_scan().await;

        let device_ids: Vec<String> = self.inner.devices.lock().await.keys().cloned().collect();
        for device_id in device_ids {
            let _ = self.disconnect(&device_id).await;
        }

        if let Some(monitor) = self.inner.monitor.lock().await.take() {
            monitor.abort();
        }
    }

    /// Start the link monitor that drives the reconnection grace window.
    async fn ensure_monitor(&self) -> Result<(), SensorError> {
        let mut monitor = self.inner.monitor.lock().await;
        if monitor.as_ref().is_some_and(|m| !m.is_finished()) {
            return Ok(());
        }

        let mut events = self.inner.transport.events().await?;
        let weak = Arc::downgrade(&self.inner);
        *monitor = Some(tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                match event {
                    TransportEvent::DeviceDisconnected(device_id) => {
                        Self::on_link_lost(&inner, &device_id).await;
                    }
                    TransportEvent::DeviceConnected(device_id) => {
                        Self::on_link_restored(&inner, &device_id).await;
                    }
                    TransportEvent::Advertisement(_) => {}
                }
            }
        }));

        Ok(())
    }

    async fn on_link_lost(inner: &Arc<Inner<T>>, device_id: &str) {
        let mut devices = inner.devices.lock().await;
        let Some(entry) = devices.get_mut(device_id) else {
            return;
        };
        if entry.sensor.connection_state != ConnectionState::Connected {
            return;
        }

        tracing::warn!(
            "Sensor {} dropped, waiting {:?} for reconnection",
            device_id,
            inner.config.reconnect_grace
        );
        entry.stop_tasks();
        entry.sensor.connection_state = ConnectionState::Reconnecting;
        entry.grace = Some(Self::spawn_grace_timer(
            Arc::downgrade(inner),
            device_id.to_string(),
        ));
        drop(devices);

        inner.send_state(device_id, ConnectionState::Reconnecting);
    }

    fn spawn_grace_timer(weak: Weak<Inner<T>>, device_id: String) -> JoinHandle<()> {
        let grace = match weak.upgrade() {
            Some(inner) => inner.config.reconnect_grace,
            None => return tokio::spawn(async {}),
        };

        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };

            let mut devices = inner.devices.lock().await;
            let expired = devices
                .get(&device_id)
                .is_some_and(|e| e.sensor.connection_state == ConnectionState::Reconnecting);
            if !expired {
                return;
            }
            if let Some(mut entry) = devices.remove(&device_id) {
                // This task is the grace handle; don't abort ourselves.
                entry.grace.take();
                entry.stop_tasks();
            }
            drop(devices);

            tracing::info!("Sensor {} did not reconnect, removing", device_id);
            inner.send_state(&device_id, ConnectionState::Disconnected);
        })
    }

    async fn on_link_restored(inner: &Arc<Inner<T>>, device_id: &str) {
        let (protocols, profile) = {
            let devices = inner.devices.lock().await;
            match devices.get(device_id) {
                Some(entry) if entry.sensor.connection_state == ConnectionState::Reconnecting => {
                    (entry.sensor.protocols.clone(), entry.profile.clone())
                }
                _ => return,
            }
        };

        tracing::info!("Sensor {} reconnected, resubscribing", device_id);
        let started = Self::start_pump(inner, device_id, &protocols, &profile).await;

        let mut devices = inner.devices.lock().await;
        let Some(entry) = devices.get_mut(device_id) else {
            if let Ok((pump, _)) = started {
                pump.abort();
            }
            return;
        };

        match started {
            Ok((pump, subscribed)) => {
                if let Some(grace) = entry.grace.take() {
                    grace.abort();
                }
                entry.pump = Some(pump);
                entry.subscribed = subscribed;
                entry.control_indication = None;
                entry.sensor.connection_state = ConnectionState::Connected;
                entry.sensor.link_epoch = inner.links.fetch_add(1, Ordering::SeqCst);
                drop(devices);
                inner.send_state(device_id, ConnectionState::Connected);
            }
            Err(e) => {
                // Leave the grace timer running; it removes the sensor on expiry.
                drop(devices);
                tracing::warn!("Resubscription to {} failed: {}", device_id, e);
                inner.send_event(SensorEvent::Error(format!(
                    "Resubscription to {} failed: {}",
                    device_id, e
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::ftms::{HEART_RATE_MEASUREMENT_UUID, INDOOR_BIKE_DATA_UUID};
    use crate::sensors::mock::{ConnectBehavior, MockDevice, MockTransport};
    use crate::sensors::types::MetricKind;
    use std::time::Duration;

    fn manager_with(devices: &[MockDevice]) -> (SensorManager<MockTransport>, MockTransport) {
        let transport = MockTransport::new();
        for device in devices {
            transport.add_device(device.clone());
        }
        let manager = SensorManager::with_defaults(transport.clone());
        (manager, transport)
    }

    async fn wait_for_state(
        events: &mut broadcast::Receiver<SensorEvent>,
        device_id: &str,
        expected: ConnectionState,
    ) {
        loop {
            match events.recv().await.expect("Event channel closed") {
                SensorEvent::ConnectionChanged {
                    device_id: id,
                    state,
                } if id == device_id && state == expected => return,
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_connect_reports_capabilities() {
        let (manager, _) = manager_with(&[MockDevice::trainer("t-1")]);

        let sensor = manager.connect("t-1").await.unwrap();
        assert_eq!(sensor.connection_state, ConnectionState::Connected);
        assert!(sensor.is_controllable());
        assert!(sensor.capabilities.reads(MetricKind::Power));
        assert_eq!(sensor.display_name, "Mock Trainer");
    }

    #[tokio::test]
    async fn test_readings_reach_subscriber() {
        let (manager, transport) = manager_with(&[MockDevice::heart_rate("hr-1")]);
        let mut readings = manager.subscribe();

        manager.connect("hr-1").await.unwrap();
        assert!(transport.notify("hr-1", HEART_RATE_MEASUREMENT_UUID, vec![0x00, 142]));

        let reading = readings.recv().await.unwrap();
        assert_eq!(reading.device_id, "hr-1");
        assert_eq!(reading.metric, MetricKind::HeartRate);
        assert_eq!(reading.value.as_scalar(), Some(142.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() {
        let (manager, transport) = manager_with(&[MockDevice::trainer("t-1")]);
        transport.set_connect_behavior("t-1", ConnectBehavior::Hang);

        let err = manager.connect("t-1").await.unwrap_err();
        assert!(matches!(
            err,
            SensorError::Connection(ConnectionError::Timeout(d)) if d == Duration::from_secs(8)
        ));
        assert!(manager.connected_sensors().await.is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_profile() {
        let device = MockDevice {
            device_id: "x".into(),
            name: "Scale".into(),
            services: vec![Uuid::from_u128(0x0000_181d_0000_1000_8000_0080_5f9b_34fb)],
            characteristics: vec![],
            rssi: None,
        };
        let (manager, transport) = manager_with(&[device]);

        let err = manager.connect("x").await.unwrap_err();
        assert!(matches!(
            err,
            SensorError::Connection(ConnectionError::UnsupportedProfile)
        ));
        assert!(!transport.is_connected("x"));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (manager, transport) = manager_with(&[MockDevice::trainer("t-1")]);
        manager.connect("t-1").await.unwrap();

        manager.disconnect("t-1").await.unwrap();
        manager.disconnect("t-1").await.unwrap();
        assert!(manager.sensor("t-1").await.is_none());
        assert!(!transport.notify("t-1", INDOOR_BIKE_DATA_UUID, vec![0, 0, 0, 0]));
    }

    #[tokio::test]
    async fn test_controllable_trainer_uses_connection_order() {
        let (manager, _) = manager_with(&[
            MockDevice::heart_rate("hr-1"),
            MockDevice::trainer("t-2"),
            MockDevice::trainer("t-1"),
        ]);
        assert!(manager.controllable_trainer().await.is_none());

        manager.connect("hr-1").await.unwrap();
        manager.connect("t-2").await.unwrap();
        manager.connect("t-1").await.unwrap();

        let trainer = manager.controllable_trainer().await.unwrap();
        assert_eq!(trainer.device_id, "t-2");
    }

    #[tokio::test]
    async fn test_subscription_handle_unsubscribes() {
        let (manager, _) = manager_with(&[]);
        let handle = manager.subscribe_with(|_| {});
        assert!(handle.is_active());
        handle.unsubscribe();
    }

    #[tokio::test]
    async fn test_scan_ends_on_stop_and_restarts() {
        let (manager, transport) = manager_with(&[MockDevice::heart_rate("hr-9")]);

        let mut discoveries = manager.scan(DiscoveryFilter::default()).await.unwrap();
        assert!(manager.is_scanning());
        assert!(transport.advertise("hr-9"));

        let found = discoveries.next().await.unwrap();
        assert_eq!(found.device_id, "hr-9");
        assert_eq!(found.protocols, vec![Protocol::BleHeartRate]);
        assert!(found.capabilities.reads(MetricKind::HeartRate));

        manager.stop_scan().await.unwrap();
        assert!(discoveries.next().await.is_none());
        assert!(!manager.is_scanning());
        assert!(!transport.is_scanning());

        let mut again = manager.scan(DiscoveryFilter::default()).await.unwrap();
        assert!(transport.advertise("hr-9"));
        assert_eq!(again.next().await.unwrap().device_id, "hr-9");
        manager.stop_scan().await.unwrap();
        assert!(again.next().await.is_none());
    }

    #[tokio::test]
    async fn test_scan_drops_filtered_and_unsupported_advertisements() {
        let scale = MockDevice {
            device_id: "scale".into(),
            name: "Scale".into(),
            services: vec![Uuid::from_u128(0x0000_181d_0000_1000_8000_0080_5f9b_34fb)],
            characteristics: vec![],
            rssi: None,
        };
        let combo = MockDevice::with_protocols(
            "combo",
            "Trainer With HR",
            &[Protocol::BleFtms, Protocol::BleHeartRate],
        );
        let (manager, transport) =
            manager_with(&[MockDevice::trainer("t-1"), scale, combo]);

        let mut discoveries = manager
            .scan(DiscoveryFilter::only(&[Protocol::BleHeartRate]))
            .await
            .unwrap();
        assert!(!transport.advertise("t-1"));
        assert!(!transport.advertise("scale"));
        assert!(transport.advertise("combo"));

        let found = discoveries.next().await.unwrap();
        assert_eq!(found.device_id, "combo");
        assert_eq!(found.protocols, vec![Protocol::BleHeartRate]);
        assert!(!found.capabilities.controllable);

        manager.stop_scan().await.unwrap();
        assert!(discoveries.next().await.is_none());

        let discovered = manager.discovered().await;
        assert_eq!(discovered.len(), 1);
        assert_eq!(discovered[0].device_id, "combo");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_within_grace_resubscribes() {
        let (manager, transport) = manager_with(&[MockDevice::heart_rate("hr-1")]);
        let first = manager.connect("hr-1").await.unwrap();
        let mut events = manager.events();
        let mut readings = manager.subscribe();

        transport.drop_link("hr-1");
        wait_for_state(&mut events, "hr-1", ConnectionState::Reconnecting).await;
        assert_eq!(
            manager.sensor("hr-1").await.unwrap().connection_state,
            ConnectionState::Reconnecting
        );
        assert!(!transport.notify("hr-1", HEART_RATE_MEASUREMENT_UUID, vec![0x00, 100]));

        tokio::time::sleep(Duration::from_secs(5)).await;
        transport.restore_link("hr-1");
        wait_for_state(&mut events, "hr-1", ConnectionState::Connected).await;

        let sensor = manager.sensor("hr-1").await.unwrap();
        assert_eq!(sensor.connection_state, ConnectionState::Connected);
        assert_ne!(sensor.link_epoch, first.link_epoch);

        assert!(transport.notify("hr-1", HEART_RATE_MEASUREMENT_UUID, vec![0x00, 120]));
        let reading = readings.recv().await.unwrap();
        assert_eq!(reading.value.as_scalar(), Some(120.0));

        // The grace timer was canceled by the reconnect.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(manager.sensor("hr-1").await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_expiry_removes_sensor() {
        let (manager, transport) = manager_with(&[MockDevice::heart_rate("hr-1")]);
        manager.connect("hr-1").await.unwrap();
        let mut events = manager.events();

        transport.drop_link("hr-1");
        wait_for_state(&mut events, "hr-1", ConnectionState::Reconnecting).await;
        let dropped_at = Instant::now();

        wait_for_state(&mut events, "hr-1", ConnectionState::Disconnected).await;
        assert!(dropped_at.elapsed() >= manager.config().reconnect_grace);
        assert!(manager.sensor("hr-1").await.is_none());

        transport.restore_link("hr-1");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(manager.connected_sensors().await.is_empty());
    }

    #[tokio::test]
    async fn test_shared_characteristics_subscribed_once() {
        let (manager, transport) = manager_with(&[MockDevice::with_protocols(
            "combo",
            "Trainer With HR",
            &[Protocol::BleFtms, Protocol::BleHeartRate],
        )]);
        let profile = transport.connect("combo").await.unwrap();

        let protocols = [
            Protocol::BleFtms,
            Protocol::BleHeartRate,
            Protocol::BleFtms,
        ];
        let (pump, subscribed) =
            SensorManager::start_pump(&manager.inner, "combo", &protocols, &profile)
                .await
                .unwrap();
        pump.abort();

        assert_eq!(subscribed.len(), 3);
        for characteristic in [
            INDOOR_BIKE_DATA_UUID,
            FTMS_CONTROL_POINT_UUID,
            HEART_RATE_MEASUREMENT_UUID,
        ] {
            assert!(subscribed.contains(&characteristic));
        }
    }
}
