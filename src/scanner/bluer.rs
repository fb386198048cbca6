//! BlueZ D-Bus backend.
//!
//! Registers an advertisement monitor matching the Sensirion company id, so BlueZ
//! only wakes us for MyCO2 (and other Sensirion) devices. Requires `bluetoothd`.

use super::{EVENT_CHANNEL_BUFFER_SIZE, ScanError};
use crate::decoder::sensirion::{SENSIRION_MANUFACTURER_ID, SENSIRION_MANUFACTURER_ID_BYTES};
use crate::decoder::{Payload, RadioEvent};
use bluer::monitor::{Monitor, MonitorEvent, Pattern};
use bluer::{Adapter, Address, Session};
use futures::StreamExt;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Bluetooth manufacturer-specific data type (AD type 0xFF)
const MANUFACTURER_DATA_TYPE: u8 = 0xff;

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

pub async fn start_scan() -> Result<mpsc::Receiver<RadioEvent>, ScanError> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;
    info!(adapter = adapter.name(), "Listening for MyCO2 advertisements");

    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_BUFFER_SIZE);

    let pattern = Pattern {
        data_type: MANUFACTURER_DATA_TYPE,
        start_position: 0,
        content: SENSIRION_MANUFACTURER_ID_BYTES.to_vec(),
    };

    let monitor_manager = adapter.monitor().await?;
    let mut monitor_handle = monitor_manager
        .register(Monitor {
            patterns: Some(vec![pattern]),
            ..Default::default()
        })
        .await?;

    tokio::spawn(async move {
        // Bluetooth state must outlive the event loop.
        let _session = session;
        let _monitor_manager = monitor_manager;

        while let Some(event) = monitor_handle.next().await {
            let MonitorEvent::DeviceFound(device_id) = event else {
                continue;
            };
            match read_device(&adapter, device_id.device).await {
                Ok(Some(event)) => {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => debug!(address = %device_id.device, "Skipping device: {e}"),
            }
        }
    });

    Ok(rx)
}

/// Read the cached advertisement properties of a discovered device.
async fn read_device(adapter: &Adapter, address: Address) -> Result<Option<RadioEvent>, ScanError> {
    let device = adapter.device(address)?;

    let Some(manufacturer_data) = device.manufacturer_data().await? else {
        return Ok(None);
    };
    let rssi = device.rssi().await?;
    let name = device.name().await?;

    Ok(advertisement_event(address, name, rssi, &manufacturer_data))
}

fn advertisement_event(
    address: Address,
    name: Option<String>,
    rssi: Option<i16>,
    manufacturer_data: &HashMap<u16, Vec<u8>>,
) -> Option<RadioEvent> {
    manufacturer_data
        .get(&SENSIRION_MANUFACTURER_ID)
        .map(|data| RadioEvent {
            address: address.to_string(),
            name,
            rssi,
            payload: Payload::Advertisement {
                manufacturer_id: SENSIRION_MANUFACTURER_ID,
                data: data.clone(),
            },
        })
}
