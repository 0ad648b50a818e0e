//! Constants used throughout the application
//! This module contains the well-known UUIDs and the tuning values
//! of the bluetooth layer.

use uuid::Uuid;

/// Base UUID that 16-bit Bluetooth SIG identifiers are expanded into
pub const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

/// Generic serial-bridge service (HM-10 and clones)
pub const UUID_SERIAL_SERVICE: Uuid = Uuid::from_u128(0x0000ffe0_0000_1000_8000_00805f9b34fb);

/// Read/write/notify characteristic of the serial-bridge service
pub const UUID_SERIAL_CHAR: Uuid = Uuid::from_u128(0x0000ffe1_0000_1000_8000_00805f9b34fb);

/// Capacity of the manager's inbound channel
pub const INBOUND_CHANNEL_CAPACITY: usize = 256;

/// Scan duration in seconds
pub const DEFAULT_SCAN_DURATION_SECS: u64 = 5;
