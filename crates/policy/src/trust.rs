//! Trust levels for edge devices.

use std::collections::HashMap;

use parking_lot::RwLock;

use nx_domain::policy::TrustLevel;

/// Tracks the trust level assigned to each edge device. Unknown devices are
/// `Untrusted`.
#[derive(Default)]
pub struct TrustStore {
    levels: RwLock<HashMap<String, TrustLevel>>,
}

impl TrustStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, edge_id: &str) -> TrustLevel {
        self.levels
            .read()
            .get(edge_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn set(&self, edge_id: &str, level: TrustLevel) {
        self.levels.write().insert(edge_id.to_string(), level);
    }

    /// Trust-on-first-use: promote an unseen device to `Tofu`. Devices with
    /// an explicit level keep it.
    pub fn observe(&self, edge_id: &str) -> TrustLevel {
        let mut levels = self.levels.write();
        *levels
            .entry(edge_id.to_string())
            .or_insert(TrustLevel::Tofu)
    }

    pub fn remove(&self, edge_id: &str) {
        self.levels.write().remove(edge_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_devices_are_untrusted() {
        let store = TrustStore::new();
        assert_eq!(store.get("printer"), TrustLevel::Untrusted);
    }

    #[test]
    fn set_and_get() {
        let store = TrustStore::new();
        store.set("printer", TrustLevel::Trusted);
        assert_eq!(store.get("printer"), TrustLevel::Trusted);
        store.remove("printer");
        assert_eq!(store.get("printer"), TrustLevel::Untrusted);
    }

    #[test]
    fn observe_promotes_to_tofu_once() {
        let store = TrustStore::new();
        assert_eq!(store.observe("cam"), TrustLevel::Tofu);
        // Explicit levels survive later observations.
        store.set("cam", TrustLevel::Trusted);
        assert_eq!(store.observe("cam"), TrustLevel::Trusted);
    }
}
