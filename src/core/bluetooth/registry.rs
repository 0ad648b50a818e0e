//! Platform objects held by a transport between commands.
//! Generic over the object types so the bookkeeping is independent of bluest.

use std::collections::HashMap;

use log::debug;
use uuid::Uuid;

use crate::core::bluetooth::types::{CharacteristicRef, Generation, PeripheralId};

/// Devices seen during the current scan, plus the one the session is using
#[derive(Debug)]
pub struct DeviceRegistry<D> {
    devices: HashMap<PeripheralId, D>,
}

impl<D> Default for DeviceRegistry<D> {
    fn default() -> Self {
        Self {
            devices: HashMap::new(),
        }
    }
}

impl<D: Clone> DeviceRegistry<D> {
    pub fn insert(&mut self, id: PeripheralId, device: D) {
        self.devices.insert(id, device);
    }

    pub fn get(&self, id: &PeripheralId) -> Option<D> {
        self.devices.get(id).cloned()
    }

    /// Forgets every device except `keep`
    pub fn prune(&mut self, keep: Option<&PeripheralId>) {
        self.devices.retain(|id, _| Some(id) == keep);
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }
}

/// Services and characteristics of one session.
///
/// Every write names the generation it belongs to and is ignored unless
/// that generation owns the cache.
#[derive(Debug)]
pub struct GattCache<S, C> {
    owner: Option<Generation>,
    services: HashMap<Uuid, S>,
    characteristics: HashMap<CharacteristicRef, C>,
}

impl<S, C> Default for GattCache<S, C> {
    fn default() -> Self {
        Self {
            owner: None,
            services: HashMap::new(),
            characteristics: HashMap::new(),
        }
    }
}

impl<S: Clone, C: Clone> GattCache<S, C> {
    /// Empties the cache and hands it to `generation`
    pub fn begin(&mut self, generation: Generation) {
        *self = Self::default();
        self.owner = Some(generation);
    }

    /// Empties the cache; nothing may be stored until the next `begin`
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    fn owned_by(&self, generation: Generation) -> bool {
        if self.owner == Some(generation) {
            true
        } else {
            debug!(
                "Discarding GATT objects from session {} (cache owner {:?})",
                generation, self.owner
            );
            false
        }
    }

    /// Replaces the service table. Returns false if `generation` is stale.
    pub fn store_services(
        &mut self,
        generation: Generation,
        services: impl IntoIterator<Item = (Uuid, S)>,
    ) -> bool {
        if !self.owned_by(generation) {
            return false;
        }
        self.services = services.into_iter().collect();
        true
    }

    pub fn service(&self, generation: Generation, id: &Uuid) -> Option<S> {
        if self.owner != Some(generation) {
            return None;
        }
        self.services.get(id).cloned()
    }

    /// Stores a characteristic. Returns false if `generation` is stale.
    pub fn store_characteristic(
        &mut self,
        generation: Generation,
        key: CharacteristicRef,
        characteristic: C,
    ) -> bool {
        if !self.owned_by(generation) {
            return false;
        }
        self.characteristics.insert(key, characteristic);
        true
    }

    pub fn characteristic(&self, generation: Generation, key: &CharacteristicRef) -> Option<C> {
        if self.owner != Some(generation) {
            return None;
        }
        self.characteristics.get(key).cloned()
    }
}
