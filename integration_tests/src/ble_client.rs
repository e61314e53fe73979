//! BLE client for the UART bridge service.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use btleplug::api::{
    Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::Mutex;
use uuid::Uuid;

/// UART bridge UUIDs (16-bit values on the Bluetooth base UUID)
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x000000ff_0000_1000_8000_00805f9b34fb);
pub const DATA_UUID: Uuid = Uuid::from_u128(0x0000ff01_0000_1000_8000_00805f9b34fb);
pub const TX_UUID: Uuid = Uuid::from_u128(0x0000ff02_0000_1000_8000_00805f9b34fb);

/// Largest value the device stores
pub const VALUE_LEN_MAX: usize = 180;

/// One notification as received
#[derive(Clone, Debug)]
pub struct Notification {
    pub uuid: Uuid,
    pub value: Vec<u8>,
}

/// BLE client for the bridge.
pub struct UartClient {
    peripheral: Peripheral,
    name: String,
    /// Service UUIDs seen in the advertisement or scan response
    advertised_services: Vec<Uuid>,
    data_char: Characteristic,
    tx_char: Characteristic,
    notifications: Arc<Mutex<Vec<Notification>>>,
}

impl UartClient {
    /// Scan for a device whose name starts with `prefix` and connect.
    pub async fn connect_by_prefix(prefix: &str, scan_timeout: Duration) -> Result<Self> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;
        let adapter = adapters
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No Bluetooth adapters found"))?;

        adapter.start_scan(ScanFilter::default()).await?;
        let (peripheral, name, advertised_services) = Self::find_device(&adapter, prefix, scan_timeout).await?;
        adapter.stop_scan().await?;

        peripheral.connect().await?;
        peripheral.discover_services().await?;

        if !peripheral.services().iter().any(|s| s.uuid == SERVICE_UUID) {
            return Err(anyhow!("UART service not found"));
        }

        let characteristics = peripheral.characteristics();
        let find = |uuid: Uuid| {
            characteristics
                .iter()
                .find(|c| c.uuid == uuid)
                .cloned()
                .ok_or_else(|| anyhow!("characteristic {} not found", uuid))
        };
        let data_char = find(DATA_UUID)?;
        let tx_char = find(TX_UUID)?;

        peripheral.subscribe(&data_char).await?;
        peripheral.subscribe(&tx_char).await?;

        let notifications = Arc::new(Mutex::new(Vec::new()));

        let sink = notifications.clone();
        let peripheral_clone = peripheral.clone();
        tokio::spawn(async move {
            let mut stream = match peripheral_clone.notifications().await {
                Ok(s) => s,
                Err(_) => return,
            };

            while let Some(data) = stream.next().await {
                sink.lock().await.push(Notification {
                    uuid: data.uuid,
                    value: data.value,
                });
            }
        });

        Ok(Self {
            peripheral,
            name,
            advertised_services,
            data_char,
            tx_char,
            notifications,
        })
    }

    /// Find a device by name prefix within the scan timeout.
    ///
    /// Keeps scanning after the name matches until the scan response with
    /// the service UUID has been seen, or the timeout expires.
    async fn find_device(
        adapter: &Adapter,
        prefix: &str,
        scan_timeout: Duration,
    ) -> Result<(Peripheral, String, Vec<Uuid>)> {
        let start = std::time::Instant::now();
        let mut found = None;

        while start.elapsed() < scan_timeout {
            for peripheral in adapter.peripherals().await? {
                if let Some(props) = peripheral.properties().await? {
                    if let Some(local_name) = props.local_name {
                        if local_name.starts_with(prefix) {
                            if props.services.contains(&SERVICE_UUID) {
                                return Ok((peripheral, local_name, props.services));
                            }
                            found = Some((peripheral, local_name, props.services));
                        }
                    }
                }
            }

            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        found.ok_or_else(|| anyhow!("No device starting with '{}' found within timeout", prefix))
    }

    /// Advertised name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn advertised_services(&self) -> &[Uuid] {
        &self.advertised_services
    }

    pub fn data_properties(&self) -> CharPropFlags {
        self.data_char.properties
    }

    pub fn tx_properties(&self) -> CharPropFlags {
        self.tx_char.properties
    }

    /// Write the data characteristic and wait for the acknowledgement.
    pub async fn write_data(&self, value: &[u8]) -> Result<()> {
        self.peripheral
            .write(&self.data_char, value, WriteType::WithResponse)
            .await?;
        Ok(())
    }

    /// Read the data characteristic as stored on the device.
    pub async fn read_data(&self) -> Result<Vec<u8>> {
        Ok(self.peripheral.read(&self.data_char).await?)
    }

    /// Read the outbound characteristic as stored on the device.
    pub async fn read_tx(&self) -> Result<Vec<u8>> {
        Ok(self.peripheral.read(&self.tx_char).await?)
    }

    /// Notifications received on `uuid` since the last clear
    pub async fn notifications_for(&self, uuid: Uuid) -> Vec<Notification> {
        self.notifications
            .lock()
            .await
            .iter()
            .filter(|n| n.uuid == uuid)
            .cloned()
            .collect()
    }

    pub async fn clear_notifications(&self) {
        self.notifications.lock().await.clear();
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.peripheral.unsubscribe(&self.data_char).await?;
        self.peripheral.unsubscribe(&self.tx_char).await?;
        self.peripheral.disconnect().await?;
        Ok(())
    }
}
