//! Core functionality for the serial bridge
//! This module contains the core functionality for talking to a BLE serial peripheral

pub mod bluetooth;

// Re-export commonly used types
pub use bluetooth::{BluetoothHandle, BluetoothManager, ConnectionStateMachine};
