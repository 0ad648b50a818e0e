//! The platform BLE stack as seen by the core.

use uuid::Uuid;

use crate::core::bluetooth::types::{CharacteristicRef, Generation, PeripheralId, WriteMode};

/// Outbound commands to the radio.
///
/// Every call is fire-and-forget: results come back later as
/// `RadioEvent`s on the manager's inbound channel, tagged with the
/// `generation` passed in.
pub trait RadioTransport: Send {
    fn start_scan(&self);

    fn stop_scan(&self);

    /// Report peripherals the system already holds a link to, each as a
    /// `PeripheralDiscovered` event without signal strength.
    fn retrieve_connected(&self);

    fn connect(&self, generation: Generation, peripheral: &PeripheralId);

    /// Tear down the platform link and drop every object held for it.
    /// Issued whenever a session ends: on request, on connect failure,
    /// on link loss and on adapter state changes.
    fn disconnect(&self, peripheral: &PeripheralId);

    fn discover_services(&self, generation: Generation, peripheral: &PeripheralId);

    fn discover_characteristics(
        &self,
        generation: Generation,
        peripheral: &PeripheralId,
        service: Uuid,
        filter: Uuid,
    );

    fn set_notify(
        &self,
        generation: Generation,
        peripheral: &PeripheralId,
        characteristic: CharacteristicRef,
        enabled: bool,
    );

    fn read_signal_strength(&self, generation: Generation, peripheral: &PeripheralId);

    fn write_value(
        &self,
        generation: Generation,
        peripheral: &PeripheralId,
        characteristic: CharacteristicRef,
        data: Vec<u8>,
        mode: WriteMode,
    );
}
