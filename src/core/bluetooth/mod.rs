//! Bluetooth functionality for the serial bridge
//! This module handles all bluetooth operations including scanning,
//! connecting, and preparing the serial characteristic of a peripheral.

mod bluest_transport;
mod catalog;
mod constants;
mod events;
mod machine;
mod manager;
mod notification;
mod peripheral_list;
mod registry;
mod scanner;
mod transport;
mod types;
mod writer;

// Re-export types that should be publicly accessible
pub use bluest_transport::BluestTransport;
pub use catalog::{expand_short_uuid, GattCatalog};
pub use constants::*; // Re-export all constants
pub use events::{ChannelSink, EventSink, RadioEvent, SinkEvent};
pub use machine::{ConnectionStateMachine, SessionStatus};
pub use manager::{channel, BluetoothHandle, BluetoothManager, InboundReceiver, RadioEventSender};
pub use peripheral_list::PeripheralList;
pub use transport::RadioTransport;
pub use types::{
    AdapterState, CharacteristicInfo, CharacteristicRef, Generation, Phase, PeripheralHandle,
    PeripheralId, WriteMode,
};
pub use writer::{PayloadWriter, SerialWriter, DEFAULT_CHUNK_SIZE};
