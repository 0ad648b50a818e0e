//! Defines shared data structures for the Bluetooth module.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Power/availability state of the local radio, as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AdapterState {
    #[default]
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

impl AdapterState {
    /// Returns true if scanning and connecting are allowed
    pub fn is_powered_on(&self) -> bool {
        matches!(self, AdapterState::PoweredOn)
    }
}

/// Platform-assigned, stable identifier of a remote device
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeripheralId(String);

impl PeripheralId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeripheralId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A remote device as seen by the core.
///
/// Identity is the `id` alone. `name` and `rssi` are observations that may
/// change from one discovery event to the next.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeripheralHandle {
    /// Platform-specific unique identifier for the device
    pub id: PeripheralId,
    /// The advertised name of the device, if available
    pub name: Option<String>,
    /// Last-seen signal strength in dBm
    pub rssi: Option<i16>,
}

impl PeripheralHandle {
    /// Creates a new PeripheralHandle instance
    pub fn new(id: impl Into<PeripheralId>, name: Option<String>, rssi: Option<i16>) -> Self {
        Self {
            id: id.into(),
            name,
            rssi,
        }
    }

    /// Name for display, falling back to "Unknown"
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown")
    }

    /// Extracts a MAC address from the platform id when the platform embeds one.
    /// On macOS the id is a UUID and this returns None.
    pub fn address(&self) -> Option<String> {
        static MAC: OnceLock<Option<Regex>> = OnceLock::new();
        let re = MAC
            .get_or_init(|| Regex::new(r"([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})").ok())
            .as_ref()?;
        re.find_iter(self.id.as_str())
            .last()
            .map(|m| m.as_str().to_uppercase())
    }

    /// Returns true if the advertised name contains `filter`
    pub fn name_contains(&self, filter: &str) -> bool {
        self.name
            .as_ref()
            .map(|name| name.contains(filter))
            .unwrap_or(false)
    }
}

impl PartialEq for PeripheralHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PeripheralHandle {}

impl From<String> for PeripheralId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identifies a characteristic within the connected peripheral's GATT tree.
/// The transport resolves it back to its own platform object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicRef {
    pub service: Uuid,
    pub characteristic: Uuid,
}

/// A characteristic reported by a discovery callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub id: Uuid,
    pub supports_ack_write: bool,
    pub supports_unack_write: bool,
    pub supports_notify: bool,
}

impl CharacteristicInfo {
    /// Acknowledged writes win whenever the characteristic advertises them.
    pub fn preferred_write_mode(&self) -> WriteMode {
        if self.supports_ack_write {
            WriteMode::AckRequired
        } else {
            WriteMode::NoAck
        }
    }
}

/// How payloads are written to the serial characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WriteMode {
    #[default]
    AckRequired,
    NoAck,
}

/// Phase of the connection state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    Idle,
    Connecting,
    DiscoveringServices,
    DiscoveringCharacteristics,
    Ready,
}

/// Tag attached to every per-session command and echoed back by the transport.
/// A callback carrying an older generation belongs to a superseded session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Generation(pub u64);

impl Generation {
    pub fn next(self) -> Self {
        Generation(self.0.wrapping_add(1))
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_ignores_name_and_rssi() {
        let a = PeripheralHandle::new("dev-1", Some("HMSoft".into()), Some(-40));
        let b = PeripheralHandle::new("dev-1", None, Some(-90));
        let c = PeripheralHandle::new("dev-2", Some("HMSoft".into()), Some(-40));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn address_is_extracted_from_linux_style_ids() {
        let handle = PeripheralHandle::new("/org/bluez/hci0/dev_aa:bb:cc:dd:ee:ff", None, None);
        assert_eq!(handle.address().as_deref(), Some("AA:BB:CC:DD:EE:FF"));

        let mac_os = PeripheralHandle::new("4C3A1F0E-8D2B-4C1A-9E3F-0A1B2C3D4E5F", None, None);
        assert_eq!(mac_os.address(), None);
    }

    #[test]
    fn ack_write_is_preferred() {
        let both = CharacteristicInfo {
            id: Uuid::nil(),
            supports_ack_write: true,
            supports_unack_write: true,
            supports_notify: true,
        };
        assert_eq!(both.preferred_write_mode(), WriteMode::AckRequired);

        let unack_only = CharacteristicInfo {
            supports_ack_write: false,
            ..both
        };
        assert_eq!(unack_only.preferred_write_mode(), WriteMode::NoAck);
    }
}
