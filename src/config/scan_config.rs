use serde::{Deserialize, Serialize};

use crate::core::bluetooth::DEFAULT_SCAN_DURATION_SECS;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// How long to scan before picking a peripheral
    pub duration_secs: u64,
    /// Discoveries weaker than this (dBm) are not offered for connection
    pub min_rssi: Option<i16>,
    /// Substring the advertised name must contain; empty accepts any name
    pub name_filter: String,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            duration_secs: DEFAULT_SCAN_DURATION_SECS,
            min_rssi: None,
            name_filter: String::new(),
        }
    }
}

impl ScanConfig {
    /// Whether a discovery with this signal strength passes `min_rssi`
    pub fn accepts_rssi(&self, rssi: Option<i16>) -> bool {
        match (self.min_rssi, rssi) {
            (Some(min), Some(rssi)) => rssi >= min,
            // Already-connected peripherals carry no reading.
            (Some(_), None) => true,
            (None, _) => true,
        }
    }
}
