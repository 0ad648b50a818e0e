//! The GATT service/characteristic pair the bridge looks for on a peripheral.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::bluetooth::constants::{BLUETOOTH_BASE_UUID, UUID_SERIAL_CHAR, UUID_SERIAL_SERVICE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GattCatalog {
    pub target_service: Uuid,
    pub target_characteristic: Uuid,
}

impl Default for GattCatalog {
    fn default() -> Self {
        Self {
            target_service: UUID_SERIAL_SERVICE,
            target_characteristic: UUID_SERIAL_CHAR,
        }
    }
}

impl GattCatalog {
    pub fn new(target_service: Uuid, target_characteristic: Uuid) -> Self {
        Self {
            target_service,
            target_characteristic,
        }
    }

    /// Builds a catalog from 16-bit SIG-style short ids, e.g. `0xFFE0`/`0xFFE1`.
    pub fn from_short(service: u16, characteristic: u16) -> Self {
        Self::new(expand_short_uuid(service), expand_short_uuid(characteristic))
    }
}

/// Expands a 16-bit id onto the Bluetooth base UUID
pub fn expand_short_uuid(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_serial_bridge_pair() {
        assert_eq!(GattCatalog::default(), GattCatalog::from_short(0xFFE0, 0xFFE1));
        assert_eq!(
            GattCatalog::default().target_characteristic.to_string(),
            "0000ffe1-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn catalog_round_trips_through_json() {
        let catalog = GattCatalog::from_short(0x1234, 0x5678);
        let json = serde_json::to_string(&catalog).unwrap();
        assert!(json.contains("00001234-0000-1000-8000-00805f9b34fb"));
        let parsed: GattCatalog = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, catalog);
    }
}
