//! RadioTransport backed by the `bluest` crate
//! Each command runs as its own task and reports back through the
//! manager's inbound channel.

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use bluest::{Adapter, AdapterEvent, Characteristic, ConnectionEvent, Device, Service};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::events::RadioEvent;
use crate::core::bluetooth::manager::RadioEventSender;
use crate::core::bluetooth::notification::NotificationHandler;
use crate::core::bluetooth::registry::{DeviceRegistry, GattCache};
use crate::core::bluetooth::scanner::{BluetoothScanner, DeviceMap};
use crate::core::bluetooth::transport::RadioTransport;
use crate::core::bluetooth::types::{
    AdapterState, CharacteristicInfo, CharacteristicRef, Generation, PeripheralId, WriteMode,
};

/// GATT objects of the current session, dropped on disconnect
type GattObjects = Arc<Mutex<GattCache<Service, Characteristic>>>;

pub struct BluestTransport {
    adapter: Adapter,
    events: RadioEventSender,
    devices: DeviceMap,
    gatt: GattObjects,
    /// Peripheral of the current session, kept across scans
    session_peripheral: Mutex<Option<PeripheralId>>,
    link_watch: Mutex<CancellationToken>,
    scanner: BluetoothScanner,
    notification_handler: NotificationHandler,
}

impl BluestTransport {
    /// Opens the default adapter
    pub async fn new(events: RadioEventSender) -> Result<Self> {
        let adapter = Adapter::default()
            .await
            .ok_or_else(|| anyhow!("No Bluetooth adapter found"))?;
        let devices: DeviceMap = Arc::new(Mutex::new(DeviceRegistry::default()));

        Ok(Self {
            scanner: BluetoothScanner::new(adapter.clone(), devices.clone(), events.clone()),
            notification_handler: NotificationHandler::new(events.clone()),
            adapter,
            events,
            devices,
            gatt: Arc::new(Mutex::new(GattCache::default())),
            session_peripheral: Mutex::new(None),
            link_watch: Mutex::new(CancellationToken::new()),
        })
    }

    /// Reports Unknown until the adapter first becomes available, then
    /// every availability change
    pub fn watch_adapter(&self) {
        let adapter = self.adapter.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            if !events
                .send(RadioEvent::AdapterStateChanged(AdapterState::Unknown))
                .await
            {
                return;
            }

            let mut adapter_events = match adapter.events().await {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Failed to watch adapter events: {}", e);
                    events
                        .send(RadioEvent::AdapterStateChanged(AdapterState::Unsupported))
                        .await;
                    return;
                }
            };

            info!("Waiting for Bluetooth adapter to become available...");
            let initial = match adapter.wait_available().await {
                Ok(()) => AdapterState::PoweredOn,
                Err(e) => {
                    error!("Bluetooth adapter is unusable: {}", e);
                    AdapterState::Unsupported
                }
            };
            if !events.send(RadioEvent::AdapterStateChanged(initial)).await
                || initial != AdapterState::PoweredOn
            {
                return;
            }

            while let Some(event) = adapter_events.next().await {
                let state = match event {
                    Ok(AdapterEvent::Available) => AdapterState::PoweredOn,
                    Ok(AdapterEvent::Unavailable) => AdapterState::PoweredOff,
                    Err(e) => {
                        error!("Adapter event stream error: {}", e);
                        AdapterState::Resetting
                    }
                };
                if !events.send(RadioEvent::AdapterStateChanged(state)).await {
                    break;
                }
            }
            info!("Adapter event stream ended");
        });
    }

    fn device(&self, peripheral: &PeripheralId) -> Option<Device> {
        self.devices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(peripheral)
    }

    fn characteristic(
        &self,
        generation: Generation,
        characteristic: &CharacteristicRef,
    ) -> Option<Characteristic> {
        self.gatt
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .characteristic(generation, characteristic)
    }

    /// Cancels any earlier link watch and returns the token for a new one
    fn renew_link_watch(&self) -> CancellationToken {
        let mut guard = self.link_watch.lock().unwrap_or_else(|e| e.into_inner());
        guard.cancel();
        *guard = CancellationToken::new();
        guard.clone()
    }

    /// Reports a link drop of `device` as link loss of session `generation`
    async fn watch_link(
        adapter: Adapter,
        device: Device,
        generation: Generation,
        peripheral: PeripheralId,
        events: RadioEventSender,
        cancel_token: CancellationToken,
    ) {
        let mut connection_events = match adapter.device_connection_events(&device).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Cannot watch link state of {}: {}", peripheral, e);
                return;
            }
        };
        loop {
            tokio::select! {
                event = connection_events.next() => {
                    let Some(event) = event else {
                        debug!("Connection event stream of {} ended", peripheral);
                        break;
                    };
                    if let Some(event) = Self::link_event(generation, &peripheral, event) {
                        events.send(event).await;
                        break;
                    }
                }
                _ = cancel_token.cancelled() => break,
            }
        }
    }

    fn link_event(
        generation: Generation,
        peripheral: &PeripheralId,
        event: ConnectionEvent,
    ) -> Option<RadioEvent> {
        match event {
            ConnectionEvent::Disconnected => {
                warn!("Link to {} dropped", peripheral);
                Some(RadioEvent::Disconnected {
                    generation,
                    peripheral: peripheral.clone(),
                })
            }
            ConnectionEvent::Connected => None,
        }
    }

    async fn describe(characteristic: &Characteristic) -> Option<CharacteristicInfo> {
        match characteristic.properties().await {
            Ok(props) => Some(CharacteristicInfo {
                id: characteristic.uuid(),
                supports_ack_write: props.write,
                supports_unack_write: props.write_without_response,
                supports_notify: props.notify || props.indicate,
            }),
            Err(e) => {
                warn!(
                    "Failed to read properties of {}: {}",
                    characteristic.uuid(),
                    e
                );
                None
            }
        }
    }
}

impl RadioTransport for BluestTransport {
    fn start_scan(&self) {
        let keep = self
            .session_peripheral
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        self.scanner.start_scan(keep.as_ref());
    }

    fn stop_scan(&self) {
        self.scanner.stop_scan();
    }

    fn retrieve_connected(&self) {
        self.scanner.retrieve_connected();
    }

    fn connect(&self, generation: Generation, peripheral: &PeripheralId) {
        self.gatt
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .begin(generation);
        *self
            .session_peripheral
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(peripheral.clone());
        let cancel_token = self.renew_link_watch();

        let device = self.device(peripheral);
        let adapter = self.adapter.clone();
        let events = self.events.clone();
        let peripheral = peripheral.clone();
        tokio::spawn(async move {
            let Some(device) = device else {
                events
                    .send(RadioEvent::ConnectFailed {
                        reason: format!("Device not found with ID: {}", peripheral),
                        generation,
                        peripheral,
                    })
                    .await;
                return;
            };
            let result = if device.is_connected().await {
                info!("Device {} already connected.", peripheral);
                Ok(())
            } else {
                info!("Initiating connection to {}...", peripheral);
                adapter
                    .connect_device(&device)
                    .await
                    .map_err(|e| e.to_string())
            };
            if let Err(reason) = result {
                events
                    .send(RadioEvent::ConnectFailed {
                        generation,
                        peripheral,
                        reason,
                    })
                    .await;
                return;
            }

            let delivered = events
                .send(RadioEvent::Connected {
                    generation,
                    peripheral: peripheral.clone(),
                })
                .await;
            if delivered {
                Self::watch_link(adapter, device, generation, peripheral, events, cancel_token)
                    .await;
            }
        });
    }

    fn disconnect(&self, peripheral: &PeripheralId) {
        self.notification_handler.unsubscribe();
        self.link_watch
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .cancel();
        self.gatt.lock().unwrap_or_else(|e| e.into_inner()).clear();
        *self
            .session_peripheral
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = None;
        info!("Connected state cleared, releasing device and characteristic objects.");

        let Some(device) = self.device(peripheral) else {
            return;
        };
        let adapter = self.adapter.clone();
        tokio::spawn(async move {
            if device.is_connected().await {
                info!("Disconnecting from device {}", device.id());
                match adapter.disconnect_device(&device).await {
                    Ok(()) => info!("Successfully disconnected"),
                    Err(e) => error!("Failed to disconnect {}: {}", device.id(), e),
                }
            } else {
                info!("Device {} not connected", device.id());
            }
        });
    }

    fn discover_services(&self, generation: Generation, peripheral: &PeripheralId) {
        let device = self.device(peripheral);
        let gatt = self.gatt.clone();
        let events = self.events.clone();
        let peripheral = peripheral.clone();
        tokio::spawn(async move {
            let services = match device {
                Some(device) => device.discover_services().await.unwrap_or_else(|e| {
                    error!("Service discovery failed: {}", e);
                    Vec::new()
                }),
                None => Vec::new(),
            };
            let ids = services.iter().map(|s| s.uuid()).collect::<Vec<_>>();
            for id in &ids {
                debug!("Available service: {}", id);
            }
            let stored = gatt
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .store_services(generation, services.into_iter().map(|s| (s.uuid(), s)));
            if !stored {
                return;
            }

            events
                .send(RadioEvent::ServicesDiscovered {
                    generation,
                    peripheral,
                    services: ids,
                })
                .await;
        });
    }

    fn discover_characteristics(
        &self,
        generation: Generation,
        peripheral: &PeripheralId,
        service: Uuid,
        filter: Uuid,
    ) {
        let gatt = self.gatt.clone();
        let events = self.events.clone();
        let peripheral = peripheral.clone();
        tokio::spawn(async move {
            let handle = gatt
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .service(generation, &service);
            let found = match handle {
                Some(handle) => handle
                    .discover_characteristics_with_uuid(filter)
                    .await
                    .unwrap_or_else(|e| {
                        error!("Characteristic discovery on {} failed: {}", service, e);
                        Vec::new()
                    }),
                None => Vec::new(),
            };

            let mut characteristics = Vec::with_capacity(found.len());
            for characteristic in found {
                if let Some(info) = Self::describe(&characteristic).await {
                    let key = CharacteristicRef {
                        service,
                        characteristic: info.id,
                    };
                    let stored = gatt
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .store_characteristic(generation, key, characteristic);
                    if !stored {
                        return;
                    }
                    characteristics.push(info);
                }
            }

            events
                .send(RadioEvent::CharacteristicsDiscovered {
                    generation,
                    peripheral,
                    service,
                    characteristics,
                })
                .await;
        });
    }

    fn set_notify(
        &self,
        generation: Generation,
        peripheral: &PeripheralId,
        characteristic: CharacteristicRef,
        enabled: bool,
    ) {
        if !enabled {
            self.notification_handler.unsubscribe();
            return;
        }
        match self.characteristic(generation, &characteristic) {
            Some(handle) => {
                self.notification_handler
                    .subscribe(generation, peripheral.clone(), handle)
            }
            None => {
                let events = self.events.clone();
                let peripheral = peripheral.clone();
                tokio::spawn(async move {
                    events
                        .send(RadioEvent::NotifyStateChanged {
                            generation,
                            peripheral,
                            characteristic: characteristic.characteristic,
                            error: Some("characteristic not discovered".to_string()),
                        })
                        .await;
                });
            }
        }
    }

    fn read_signal_strength(&self, generation: Generation, peripheral: &PeripheralId) {
        let device = self.device(peripheral);
        let events = self.events.clone();
        let peripheral = peripheral.clone();
        tokio::spawn(async move {
            let result = match device {
                Some(device) => device.rssi().await.map_err(|e| e.to_string()),
                None => Err(format!("Device not found with ID: {}", peripheral)),
            };
            events
                .send(RadioEvent::SignalStrengthRead {
                    generation,
                    peripheral,
                    result,
                })
                .await;
        });
    }

    fn write_value(
        &self,
        generation: Generation,
        peripheral: &PeripheralId,
        characteristic: CharacteristicRef,
        data: Vec<u8>,
        mode: WriteMode,
    ) {
        let handle = self.characteristic(generation, &characteristic);
        let events = self.events.clone();
        let peripheral = peripheral.clone();
        tokio::spawn(async move {
            let result = match (handle, mode) {
                (None, _) => Err("characteristic not discovered".to_string()),
                (Some(handle), WriteMode::AckRequired) => {
                    handle.write(&data).await.map_err(|e| e.to_string())
                }
                (Some(handle), WriteMode::NoAck) => handle
                    .write_without_response(&data)
                    .await
                    .map_err(|e| e.to_string()),
            };
            // Unacknowledged writes only report back when they fail.
            if mode == WriteMode::NoAck && result.is_ok() {
                return;
            }
            events
                .send(RadioEvent::WriteAcknowledged {
                    generation,
                    peripheral,
                    characteristic: characteristic.characteristic,
                    error: result.err(),
                })
                .await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_drop_becomes_link_loss_of_its_session() {
        let peripheral: PeripheralId = "dev-1".into();
        assert_eq!(
            BluestTransport::link_event(Generation(7), &peripheral, ConnectionEvent::Disconnected),
            Some(RadioEvent::Disconnected {
                generation: Generation(7),
                peripheral: peripheral.clone(),
            })
        );
        assert_eq!(
            BluestTransport::link_event(Generation(7), &peripheral, ConnectionEvent::Connected),
            None
        );
    }
}
