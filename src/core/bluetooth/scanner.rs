//! Bluetooth device scanning
//! Runs the unfiltered scan and keeps the platform devices it finds so
//! later commands can resolve a peripheral id.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use bluest::{Adapter, Device};
use futures_util::StreamExt;
use log::{debug, error, info};
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::events::RadioEvent;
use crate::core::bluetooth::manager::RadioEventSender;
use crate::core::bluetooth::registry::DeviceRegistry;
use crate::core::bluetooth::types::{PeripheralHandle, PeripheralId};

pub(crate) type DeviceMap = Arc<Mutex<DeviceRegistry<Device>>>;

pub struct BluetoothScanner {
    adapter: Adapter,
    devices: DeviceMap,
    events: RadioEventSender,
    cancel_token: Mutex<CancellationToken>,
}

impl BluetoothScanner {
    pub fn new(adapter: Adapter, devices: DeviceMap, events: RadioEventSender) -> Self {
        Self {
            adapter,
            devices,
            events,
            cancel_token: Mutex::new(CancellationToken::new()),
        }
    }

    /// Starts an unfiltered scan, replacing any scan already running.
    /// Devices from earlier scans are forgotten, except `keep`.
    pub fn start_scan(&self, keep: Option<&PeripheralId>) {
        {
            let mut devices = self.devices.lock().unwrap_or_else(|e| e.into_inner());
            devices.prune(keep);
            debug!("Device registry pruned to {} entries", devices.len());
        }
        let cancel_token = {
            let mut guard = self.cancel_token.lock().unwrap_or_else(|e| e.into_inner());
            guard.cancel();
            *guard = CancellationToken::new();
            guard.clone()
        };

        let adapter = self.adapter.clone();
        let devices = self.devices.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            if let Err(e) = Self::internal_scan_task(adapter, devices, events, cancel_token).await {
                error!("Bluetooth scan failed: {}", e);
            }
        });
        info!("Device scan task started.");
    }

    pub fn stop_scan(&self) {
        info!("Stopping Bluetooth scan.");
        self.cancel_token
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .cancel();
    }

    /// Reports devices the system already holds a link to, without signal strength
    pub fn retrieve_connected(&self) {
        let adapter = self.adapter.clone();
        let devices = self.devices.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            info!("Checking for connected devices");
            match adapter.connected_devices().await {
                Ok(connected) => {
                    for device in connected {
                        let peripheral = Self::register(&devices, device, None, None);
                        if !events
                            .send(RadioEvent::PeripheralDiscovered {
                                peripheral,
                                rssi: None,
                            })
                            .await
                        {
                            break;
                        }
                    }
                }
                Err(e) => error!("Failed to list connected devices: {}", e),
            }
        });
    }

    async fn internal_scan_task(
        adapter: Adapter,
        devices: DeviceMap,
        events: RadioEventSender,
        cancel_token: CancellationToken,
    ) -> Result<()> {
        info!("Starting bluetooth scan");
        let mut scan_stream = adapter.scan(&[]).await?;

        loop {
            tokio::select! {
                result = scan_stream.next() => {
                    match result {
                        Some(discovered_device) => {
                            let rssi = discovered_device.rssi;
                            let local_name = discovered_device.adv_data.local_name.clone();
                            debug!("Found device - Device: {:?}, RSSI: {:?}", discovered_device.device, rssi);
                            let peripheral = Self::register(&devices, discovered_device.device, local_name, rssi);
                            if !events.send(RadioEvent::PeripheralDiscovered { peripheral, rssi }).await {
                                break;
                            }
                        }
                        None => {
                            info!("Bluetooth scan stream has ended.");
                            break;
                        }
                    }
                }
                _ = cancel_token.cancelled() => {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Remembers the platform device so later commands can resolve its id
    fn register(
        devices: &DeviceMap,
        device: Device,
        local_name: Option<String>,
        rssi: Option<i16>,
    ) -> PeripheralHandle {
        let id = PeripheralId::new(device.id().to_string());
        let name = local_name.or_else(|| device.name().ok());
        devices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), device);
        PeripheralHandle::new(id, name, rssi)
    }
}
