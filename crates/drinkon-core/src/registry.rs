//! Peripherals seen while scanning.

use chrono::{DateTime, Utc};

use crate::protocol::LevelAdvertisement;
use crate::transport::PeripheralId;

/// A DrinkOn peripheral detected during a scan.
///
/// Fields are updated by the kit from advertisements and connection
/// events; consumers only read them.
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedPeripheral {
    id: PeripheralId,
    name: Option<String>,
    rssi: Option<i16>,
    rssi_updated: Option<DateTime<Utc>>,
    level: Option<f64>,
    consumed_24hr: Option<f64>,
    connected: bool,
}

impl ScannedPeripheral {
    pub fn new(id: PeripheralId, rssi: Option<i16>) -> Self {
        Self {
            id,
            name: None,
            rssi,
            rssi_updated: rssi.map(|_| Utc::now()),
            level: None,
            consumed_24hr: None,
            connected: false,
        }
    }

    pub fn id(&self) -> PeripheralId {
        self.id
    }

    /// Advertised local name, or "Unknown".
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown")
    }

    /// Last signal strength in dBm.
    pub fn rssi(&self) -> Option<i16> {
        self.rssi
    }

    pub fn rssi_updated(&self) -> Option<DateTime<Utc>> {
        self.rssi_updated
    }

    /// Advertised bottle level, 0.0 to 1.0.
    pub fn level(&self) -> Option<f64> {
        self.level
    }

    /// Advertised consumption over the previous 24 hours, in bottles.
    pub fn consumed_24hr(&self) -> Option<f64> {
        self.consumed_24hr
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub(crate) fn set_rssi(&mut self, rssi: i16) {
        self.rssi = Some(rssi);
        self.rssi_updated = Some(Utc::now());
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = Some(name);
    }

    pub(crate) fn apply_advertisement(&mut self, advert: &LevelAdvertisement) {
        self.level = advert.level;
        self.consumed_24hr = advert.consumed_24hr;
    }

    pub(crate) fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }
}

/// Deduplicated collection of scanned peripherals, keyed by identifier.
#[derive(Debug, Default)]
pub struct ScannedPeripheralRegistry {
    peripherals: Vec<ScannedPeripheral>,
}

impl ScannedPeripheralRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the entry for `id`, creating it if needed.
    ///
    /// An existing entry keeps its previous RSSI when `rssi` is `None`.
    pub fn upsert(&mut self, id: PeripheralId, rssi: Option<i16>) -> &mut ScannedPeripheral {
        match self.peripherals.iter().position(|p| p.id == id) {
            Some(index) => {
                let entry = &mut self.peripherals[index];
                if let Some(rssi) = rssi {
                    entry.set_rssi(rssi);
                }
                entry
            }
            None => {
                self.peripherals.push(ScannedPeripheral::new(id, rssi));
                let last = self.peripherals.len() - 1;
                &mut self.peripherals[last]
            }
        }
    }

    pub fn get(&self, id: PeripheralId) -> Option<&ScannedPeripheral> {
        self.peripherals.iter().find(|p| p.id == id)
    }

    pub(crate) fn get_mut(&mut self, id: PeripheralId) -> Option<&mut ScannedPeripheral> {
        self.peripherals.iter_mut().find(|p| p.id == id)
    }

    pub fn contains(&self, id: PeripheralId) -> bool {
        self.get(id).is_some()
    }

    pub fn remove(&mut self, id: PeripheralId) -> Option<ScannedPeripheral> {
        let index = self.peripherals.iter().position(|p| p.id == id)?;
        Some(self.peripherals.remove(index))
    }

    pub fn clear(&mut self) {
        self.peripherals.clear();
    }

    pub fn len(&self) -> usize {
        self.peripherals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peripherals.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScannedPeripheral> {
        self.peripherals.iter()
    }

    /// The peripheral with the highest RSSI.
    ///
    /// An entry without RSSI never displaces one that has a value, but is
    /// replaced by anything when it is the current best.
    pub fn strongest_signal(&self) -> Option<&ScannedPeripheral> {
        let mut strongest: Option<&ScannedPeripheral> = None;
        for candidate in &self.peripherals {
            strongest = match strongest {
                None => Some(candidate),
                Some(best) => match (best.rssi, candidate.rssi) {
                    (None, _) => Some(candidate),
                    (Some(_), None) => Some(best),
                    (Some(best_rssi), Some(rssi)) if rssi > best_rssi => Some(candidate),
                    (Some(_), Some(_)) => Some(best),
                },
            };
        }
        strongest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn id(n: u128) -> PeripheralId {
        PeripheralId(Uuid::from_u128(n))
    }

    #[test]
    fn test_upsert_deduplicates() {
        let mut registry = ScannedPeripheralRegistry::new();
        registry.upsert(id(1), Some(-70));
        let entry = registry.upsert(id(1), Some(-50));
        assert_eq!(entry.rssi(), Some(-50));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_upsert_without_rssi_keeps_previous() {
        let mut registry = ScannedPeripheralRegistry::new();
        registry.upsert(id(1), Some(-70));
        registry.upsert(id(1), None);
        assert_eq!(registry.get(id(1)).unwrap().rssi(), Some(-70));
        assert!(registry.get(id(1)).unwrap().rssi_updated().is_some());
    }

    #[test]
    fn test_strongest_signal() {
        let mut registry = ScannedPeripheralRegistry::new();
        registry.upsert(id(1), Some(-60));
        registry.upsert(id(2), Some(-40));
        registry.upsert(id(3), None);
        assert_eq!(registry.strongest_signal().unwrap().id(), id(2));
    }

    #[test]
    fn test_strongest_signal_missing_rssi_first() {
        let mut registry = ScannedPeripheralRegistry::new();
        registry.upsert(id(3), None);
        registry.upsert(id(1), Some(-80));
        assert_eq!(registry.strongest_signal().unwrap().id(), id(1));
    }

    #[test]
    fn test_strongest_signal_all_missing() {
        let mut registry = ScannedPeripheralRegistry::new();
        assert!(registry.strongest_signal().is_none());
        registry.upsert(id(4), None);
        registry.upsert(id(5), None);
        assert!(registry.strongest_signal().is_some());
    }

    #[test]
    fn test_remove_and_clear() {
        let mut registry = ScannedPeripheralRegistry::new();
        registry.upsert(id(1), None);
        registry.upsert(id(2), None);
        assert!(registry.remove(id(1)).is_some());
        assert!(registry.remove(id(1)).is_none());
        assert!(!registry.contains(id(1)));
        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_display_name_fallback() {
        let mut peripheral = ScannedPeripheral::new(id(1), None);
        assert_eq!(peripheral.display_name(), "Unknown");
        peripheral.set_name("Bottle".to_string());
        assert_eq!(peripheral.display_name(), "Bottle");
    }

    #[test]
    fn test_advertisement_replaces_telemetry() {
        let mut peripheral = ScannedPeripheral::new(id(1), None);
        peripheral.apply_advertisement(&LevelAdvertisement {
            level: Some(0.5),
            consumed_24hr: Some(1.2),
        });
        assert_eq!(peripheral.level(), Some(0.5));
        peripheral.apply_advertisement(&LevelAdvertisement::default());
        assert_eq!(peripheral.level(), None);
        assert_eq!(peripheral.consumed_24hr(), None);
    }
}
