//! Shared mock sensor setup.

use ridelink::sensors::{MockDevice, MockTransport, SensorManager};

/// Indoor Bike Data with instantaneous speed, cadence and power.
pub fn indoor_bike_data(speed_kmh: f64, cadence_rpm: f64, power_watts: i16) -> Vec<u8> {
    // Flags: 0x0044 (instantaneous cadence + instantaneous power)
    let mut data = vec![0x44, 0x00];
    data.extend(((speed_kmh * 100.0) as u16).to_le_bytes());
    data.extend(((cadence_rpm * 2.0) as u16).to_le_bytes());
    data.extend(power_watts.to_le_bytes());
    data
}

/// A manager with the given devices registered and connected.
pub async fn connected_manager(
    devices: &[MockDevice],
) -> (SensorManager<MockTransport>, MockTransport) {
    let transport = MockTransport::new();
    for device in devices {
        transport.add_device(device.clone());
    }
    let manager = SensorManager::with_defaults(transport.clone());
    for device in devices {
        manager
            .connect(&device.device_id)
            .await
            .expect("Failed to connect mock device");
    }
    (manager, transport)
}
