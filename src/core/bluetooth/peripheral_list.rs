//! Consumer-side list of discovered peripherals

use crate::core::bluetooth::types::{PeripheralHandle, PeripheralId};

/// Discovered peripherals, one entry per id, strongest signal first.
#[derive(Debug, Default, Clone)]
pub struct PeripheralList {
    entries: Vec<PeripheralHandle>,
}

impl PeripheralList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a discovery. Returns true if the id was not seen before.
    pub fn upsert(&mut self, peripheral: &PeripheralHandle, rssi: Option<i16>) -> bool {
        if let Some(existing) = self.entries.iter_mut().find(|p| p.id == peripheral.id) {
            if peripheral.name.is_some() {
                existing.name = peripheral.name.clone();
            }
            if rssi.is_some() {
                existing.rssi = rssi;
            }
            self.sort();
            return false;
        }

        let mut entry = peripheral.clone();
        entry.rssi = rssi.or(peripheral.rssi);
        self.entries.push(entry);
        self.sort();
        true
    }

    pub fn get(&self, id: &PeripheralId) -> Option<&PeripheralHandle> {
        self.entries.iter().find(|p| &p.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeripheralHandle> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Strongest peripheral whose name contains `filter`; any peripheral if `filter` is empty
    pub fn strongest_matching(&self, filter: &str) -> Option<&PeripheralHandle> {
        self.entries
            .iter()
            .find(|p| filter.is_empty() || p.name_contains(filter))
    }

    // Readings without signal strength sink to the bottom.
    fn sort(&mut self) {
        self.entries
            .sort_by_key(|p| std::cmp::Reverse(p.rssi.unwrap_or(i16::MIN)));
    }
}
