//! BLE serial bridge library
//! Discovers, connects to and prepares a serial-over-BLE peripheral for
//! byte-stream communication.

pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod state;

pub use error::BridgeError;
