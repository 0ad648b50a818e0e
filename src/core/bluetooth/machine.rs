//! Connection state machine for the serial peripheral
//! Drives scan -> connect -> service discovery -> characteristic discovery
//! -> subscribe -> ready, one connection attempt at a time.

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, info, warn};
use uuid::Uuid;

use crate::core::bluetooth::catalog::GattCatalog;
use crate::core::bluetooth::events::{EventSink, RadioEvent};
use crate::core::bluetooth::transport::RadioTransport;
use crate::core::bluetooth::types::{
    AdapterState, CharacteristicInfo, CharacteristicRef, Generation, Phase, PeripheralHandle,
    PeripheralId, WriteMode,
};
use crate::error::{BridgeError, Result};

/// Working state of the current connection attempt
#[derive(Debug, Default)]
struct ConnectionSession {
    pending: Option<PeripheralHandle>,
    connected: Option<PeripheralHandle>,
    write_characteristic: Option<CharacteristicRef>,
    write_mode: WriteMode,
    phase: Phase,
    /// Services whose characteristic discovery has not answered yet
    outstanding_services: HashSet<Uuid>,
    ready_announced: bool,
    not_found_reported: bool,
}

impl ConnectionSession {
    /// The peripheral the session is about, pending or connected
    fn peripheral(&self) -> Option<&PeripheralHandle> {
        self.connected.as_ref().or(self.pending.as_ref())
    }
}

/// Point-in-time view of the session, safe to hand to other tasks
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub adapter_state: AdapterState,
    pub phase: Phase,
    pub scanning: bool,
    pub generation: Generation,
    pub pending: Option<PeripheralHandle>,
    pub connected: Option<PeripheralHandle>,
    pub write_characteristic: Option<CharacteristicRef>,
    pub write_mode: WriteMode,
}

pub struct ConnectionStateMachine {
    catalog: GattCatalog,
    adapter_state: AdapterState,
    scanning: bool,
    generation: Generation,
    session: ConnectionSession,
    transport: Box<dyn RadioTransport>,
    sink: Arc<dyn EventSink>,
}

impl ConnectionStateMachine {
    pub fn new(
        catalog: GattCatalog,
        transport: Box<dyn RadioTransport>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            catalog,
            adapter_state: AdapterState::Unknown,
            scanning: false,
            generation: Generation::default(),
            session: ConnectionSession::default(),
            transport,
            sink,
        }
    }

    pub fn catalog(&self) -> &GattCatalog {
        &self.catalog
    }

    pub fn adapter_state(&self) -> AdapterState {
        self.adapter_state
    }

    pub fn phase(&self) -> Phase {
        self.session.phase
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    pub fn pending_peripheral(&self) -> Option<&PeripheralHandle> {
        self.session.pending.as_ref()
    }

    pub fn connected_peripheral(&self) -> Option<&PeripheralHandle> {
        self.session.connected.as_ref()
    }

    pub fn write_characteristic(&self) -> Option<CharacteristicRef> {
        self.session.write_characteristic
    }

    pub fn write_mode(&self) -> WriteMode {
        self.session.write_mode
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            adapter_state: self.adapter_state,
            phase: self.session.phase,
            scanning: self.scanning,
            generation: self.generation,
            pending: self.session.pending.clone(),
            connected: self.session.connected.clone(),
            write_characteristic: self.session.write_characteristic,
            write_mode: self.session.write_mode,
        }
    }

    /// Starts discovery of all advertising peripherals.
    /// Ignored unless the adapter is powered on.
    pub fn start_scan(&mut self) {
        if !self.adapter_state.is_powered_on() {
            debug!(
                "Ignoring scan request, adapter state is {:?}",
                self.adapter_state
            );
            return;
        }
        info!("Starting bluetooth scan");
        self.scanning = true;
        self.transport.start_scan();
        self.transport.retrieve_connected();
    }

    pub fn stop_scan(&mut self) {
        if self.scanning {
            info!("Stopping bluetooth scan");
        }
        self.scanning = false;
        self.transport.stop_scan();
    }

    /// Begins a connection attempt. Only valid from Idle with the radio on.
    pub fn connect(&mut self, peripheral: PeripheralHandle) -> Result<()> {
        if self.session.phase != Phase::Idle {
            return Err(BridgeError::InvalidPhase {
                operation: "connect",
                phase: self.session.phase,
            });
        }
        if !self.adapter_state.is_powered_on() {
            return Err(BridgeError::AdapterNotReady(self.adapter_state));
        }

        self.generation = self.generation.next();
        info!(
            "Connecting to {} ({}) as session {}",
            peripheral.display_name(),
            peripheral.id,
            self.generation
        );
        self.transport.connect(self.generation, &peripheral.id);
        self.session = ConnectionSession {
            pending: Some(peripheral),
            phase: Phase::Connecting,
            ..ConnectionSession::default()
        };
        Ok(())
    }

    /// Drops the current session from any phase. A no-op when Idle.
    pub fn disconnect(&mut self) {
        if self.session.phase == Phase::Idle {
            debug!("Disconnect requested while idle");
            return;
        }
        info!("Disconnecting session {}", self.generation);
        if let Some(peripheral) = self.reset_session() {
            self.sink.on_disconnected(&peripheral);
        }
    }

    /// Requests a fresh signal strength reading from the connected peripheral
    pub fn read_signal_strength(&mut self) -> Result<()> {
        let peripheral = self.ready_peripheral("read_signal_strength")?;
        self.transport.read_signal_strength(self.generation, &peripheral);
        Ok(())
    }

    /// Writes a payload to the serial characteristic using the negotiated write mode
    pub fn send(&mut self, data: Vec<u8>) -> Result<()> {
        let peripheral = self.ready_peripheral("send")?;
        let Some(characteristic) = self.session.write_characteristic else {
            return Err(BridgeError::InvalidPhase {
                operation: "send",
                phase: self.session.phase,
            });
        };
        debug!(
            "Writing {} bytes to {} ({:?})",
            data.len(),
            characteristic.characteristic,
            self.session.write_mode
        );
        self.transport.write_value(
            self.generation,
            &peripheral,
            characteristic,
            data,
            self.session.write_mode,
        );
        Ok(())
    }

    /// Applies one radio event. Callbacks from a superseded session are dropped.
    pub fn handle(&mut self, event: RadioEvent) {
        if let Some(generation) = event.generation() {
            if generation != self.generation {
                warn!(
                    "Dropping stale callback from session {} (current {})",
                    generation, self.generation
                );
                return;
            }
        }

        match event {
            RadioEvent::AdapterStateChanged(state) => self.on_adapter_state_changed(state),
            RadioEvent::PeripheralDiscovered { peripheral, rssi } => {
                debug!(
                    "Found device - ID: {}, Name: {:?}, RSSI: {:?}",
                    peripheral.id, peripheral.name, rssi
                );
                self.sink.on_peripheral_discovered(&peripheral, rssi);
            }
            RadioEvent::Connected { peripheral, .. } => self.on_connected(&peripheral),
            RadioEvent::ConnectFailed {
                peripheral, reason, ..
            } => self.on_connect_failed(&peripheral, &reason),
            RadioEvent::Disconnected { peripheral, .. } => self.on_link_lost(&peripheral),
            RadioEvent::ServicesDiscovered {
                peripheral,
                services,
                ..
            } => self.on_services_discovered(&peripheral, services),
            RadioEvent::CharacteristicsDiscovered {
                peripheral,
                service,
                characteristics,
                ..
            } => self.on_characteristics_discovered(&peripheral, service, &characteristics),
            RadioEvent::NotifyStateChanged {
                peripheral,
                characteristic,
                error,
                ..
            } => {
                let Some(handle) = self.session_peripheral(&peripheral) else {
                    return;
                };
                match error {
                    Some(reason) => {
                        warn!("Failed to subscribe to {}: {}", characteristic, reason);
                        self.sink.on_notify_failed(&handle, &reason);
                    }
                    None => info!("Subscribed to notifications on {}", characteristic),
                }
            }
            RadioEvent::ValueNotified {
                peripheral, data, ..
            } => {
                if self.session.phase != Phase::Ready {
                    return;
                }
                if let Some(handle) = self.session_peripheral(&peripheral) {
                    debug!("Received {} bytes from {}", data.len(), handle.id);
                    self.sink.on_bytes_received(&handle, &data);
                }
            }
            RadioEvent::WriteAcknowledged {
                peripheral,
                characteristic,
                error,
                ..
            } => {
                let Some(handle) = self.session_peripheral(&peripheral) else {
                    return;
                };
                match error {
                    Some(reason) => {
                        warn!("Write to {} failed: {}", characteristic, reason);
                        self.sink.on_write_failed(&handle, &reason);
                    }
                    None => debug!("Write to {} acknowledged", characteristic),
                }
            }
            RadioEvent::SignalStrengthRead {
                peripheral, result, ..
            } => {
                let Some(handle) = self.session_peripheral(&peripheral) else {
                    return;
                };
                match result {
                    Ok(rssi) => {
                        debug!("Signal strength of {} is {} dBm", handle.id, rssi);
                        if let Some(connected) = self.session.connected.as_mut() {
                            connected.rssi = Some(rssi);
                        }
                        self.sink.on_signal_strength(&handle, rssi);
                    }
                    Err(reason) => {
                        warn!("Failed to read signal strength: {}", reason);
                        self.sink.on_signal_strength_failed(&handle, &reason);
                    }
                }
            }
        }
    }

    fn on_adapter_state_changed(&mut self, state: AdapterState) {
        info!("Adapter state changed: {:?} -> {:?}", self.adapter_state, state);
        self.adapter_state = state;
        if !state.is_powered_on() {
            self.scanning = false;
        }
        // A radio state change invalidates every link the platform held.
        if let Some(peripheral) = self.reset_session() {
            self.sink.on_disconnected(&peripheral);
        }
    }

    fn on_connected(&mut self, peripheral: &PeripheralId) {
        if self.session.phase != Phase::Connecting {
            warn!(
                "Ignoring connect callback for {} while {:?}",
                peripheral, self.session.phase
            );
            return;
        }
        let Some(handle) = self.session.pending.take_if(|p| &p.id == peripheral) else {
            warn!("Ignoring connect callback for unexpected peripheral {}", peripheral);
            return;
        };

        info!("Connection successful, discovering services...");
        self.session.connected = Some(handle);
        self.session.phase = Phase::DiscoveringServices;
        self.transport.discover_services(self.generation, peripheral);
    }

    fn on_connect_failed(&mut self, peripheral: &PeripheralId, reason: &str) {
        if self.session.phase != Phase::Connecting {
            return;
        }
        let Some(handle) = self.session_peripheral(peripheral) else {
            return;
        };
        warn!("Connection to {} failed: {}", handle.id, reason);
        self.reset_session();
        self.sink.on_connect_failed(&handle, reason);
    }

    fn on_link_lost(&mut self, peripheral: &PeripheralId) {
        if self.session_peripheral(peripheral).is_none() {
            return;
        }
        warn!("Lost connection to {}", peripheral);
        if let Some(handle) = self.reset_session() {
            self.sink.on_disconnected(&handle);
        }
    }

    fn on_services_discovered(&mut self, peripheral: &PeripheralId, mut services: Vec<Uuid>) {
        if self.session.phase != Phase::DiscoveringServices {
            warn!("Ignoring service list while {:?}", self.session.phase);
            return;
        }
        let Some(handle) = self.session_peripheral(peripheral) else {
            return;
        };

        if services.is_empty() {
            // Stays in DiscoveringServices; nothing further will arrive.
            warn!("{} reported no services", handle.id);
            self.report_not_found(&handle);
            return;
        }

        let target_service = self.catalog.target_service;
        if !services.contains(&target_service) {
            info!(
                "Target service {} not advertised, searching all {} services",
                target_service,
                services.len()
            );
        }
        let mut seen = HashSet::new();
        services.retain(|s| seen.insert(*s));
        // Query the target service first; the rest follow in platform order.
        services.sort_by_key(|s| *s != target_service);

        self.session.phase = Phase::DiscoveringCharacteristics;
        self.session.outstanding_services = services.iter().copied().collect();
        for service in services {
            debug!("Discovering characteristics of service {}", service);
            self.transport.discover_characteristics(
                self.generation,
                peripheral,
                service,
                self.catalog.target_characteristic,
            );
        }
    }

    fn on_characteristics_discovered(
        &mut self,
        peripheral: &PeripheralId,
        service: Uuid,
        characteristics: &[CharacteristicInfo],
    ) {
        if !matches!(
            self.session.phase,
            Phase::DiscoveringCharacteristics | Phase::Ready
        ) {
            warn!("Ignoring characteristic list while {:?}", self.session.phase);
            return;
        }
        let Some(handle) = self.session_peripheral(peripheral) else {
            return;
        };
        self.session.outstanding_services.remove(&service);

        let target = self.catalog.target_characteristic;
        for info in characteristics.iter().filter(|c| c.id == target) {
            let characteristic = CharacteristicRef {
                service,
                characteristic: info.id,
            };
            if let Some(previous) = self.session.write_characteristic {
                warn!(
                    "Multiple {} characteristics found, replacing the one in service {}",
                    target, previous.service
                );
            }
            self.transport
                .set_notify(self.generation, peripheral, characteristic, true);
            self.session.write_characteristic = Some(characteristic);
            self.session.write_mode = info.preferred_write_mode();
            self.session.phase = Phase::Ready;
            info!(
                "Found serial characteristic {} in service {}, write mode {:?}",
                info.id, service, self.session.write_mode
            );
        }

        if self.session.phase == Phase::Ready {
            if !self.session.ready_announced {
                self.session.ready_announced = true;
                info!("{} is ready", handle.display_name());
                self.sink.on_peripheral_ready(&handle);
            }
        } else if self.session.outstanding_services.is_empty() {
            warn!(
                "No {} characteristic on {}, discovery stalled",
                target, handle.id
            );
            self.report_not_found(&handle);
        }
    }

    fn report_not_found(&mut self, handle: &PeripheralHandle) {
        if !self.session.not_found_reported {
            self.session.not_found_reported = true;
            self.sink.on_service_not_found(handle);
        }
    }

    /// Handle for `peripheral` if it is the one the session is about
    fn session_peripheral(&self, peripheral: &PeripheralId) -> Option<PeripheralHandle> {
        match self.session.peripheral() {
            Some(handle) if &handle.id == peripheral => Some(handle.clone()),
            _ => {
                debug!("Ignoring callback for foreign peripheral {}", peripheral);
                None
            }
        }
    }

    fn ready_peripheral(&self, operation: &'static str) -> Result<PeripheralId> {
        match (&self.session.connected, self.session.phase) {
            (Some(handle), Phase::Ready) => Ok(handle.id.clone()),
            _ => Err(BridgeError::InvalidPhase {
                operation,
                phase: self.session.phase,
            }),
        }
    }

    /// Clears the session, bumps the generation so in-flight callbacks
    /// become stale, releases the platform link and GATT objects, and
    /// returns the peripheral the session was about.
    fn reset_session(&mut self) -> Option<PeripheralHandle> {
        let session = std::mem::take(&mut self.session);
        if session.phase == Phase::Idle {
            return None;
        }
        self.generation = self.generation.next();
        let peripheral = session.connected.or(session.pending)?;
        self.transport.disconnect(&peripheral.id);
        Some(peripheral)
    }
}
