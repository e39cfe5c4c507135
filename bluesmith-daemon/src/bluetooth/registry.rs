/*!
 * Device Registry
 * Reconciles scan events and one-shot listings into one view per address
 */

use chrono::Utc;
use std::collections::{HashMap, HashSet};

use super::device::Device;
use super::events::ScanEvent;
use super::parser::LineEvent;

/// Devices seen during one scan session, in discovery order.
#[derive(Debug, Default)]
pub struct ScanRegistry {
    devices: Vec<Device>,
    index: HashMap<String, usize>,
    suppressed: HashSet<String>,
}

impl ScanRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one parsed line into the registry, returning what the listener
    /// should be told, if anything.
    pub fn apply(&mut self, event: LineEvent) -> Option<ScanEvent> {
        match event {
            LineEvent::Suppressed { id } => {
                if !self.index.contains_key(&id) {
                    self.suppressed.insert(id);
                }
                None
            }
            LineEvent::Discovered(device) => {
                self.suppressed.remove(&device.id);
                match self.index.get(&device.id) {
                    Some(&slot) if self.devices[slot].name == device.name => None,
                    Some(&slot) => {
                        self.devices[slot].name = device.name.clone();
                        Some(self.discovered(slot))
                    }
                    None => {
                        self.index.insert(device.id.clone(), self.devices.len());
                        self.devices.push(device);
                        Some(self.discovered(self.devices.len() - 1))
                    }
                }
            }
            LineEvent::Rssi { id, rssi } => {
                if self.suppressed.contains(&id) {
                    return None;
                }
                if let Some(&slot) = self.index.get(&id) {
                    self.devices[slot].rssi = Some(rssi);
                }
                Some(ScanEvent::Rssi {
                    id,
                    rssi,
                    at: Utc::now(),
                })
            }
        }
    }

    fn discovered(&self, slot: usize) -> ScanEvent {
        ScanEvent::Discovered {
            device: self.devices[slot].clone(),
            at: Utc::now(),
        }
    }

    #[cfg(test)]
    pub fn get(&self, id: &str) -> Option<&Device> {
        self.index
            .get(&super::device::canonical_address(id))
            .map(|&slot| &self.devices[slot])
    }

    pub fn snapshot(&self) -> Vec<Device> {
        self.devices.clone()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }
}

/// Marks every device in `devices` that also appears in `paired` / `connected`.
pub fn annotate(devices: &mut [Device], paired: Option<&[Device]>, connected: Option<&[Device]>) {
    let contains = |list: Option<&[Device]>, id: &str| {
        list.is_some_and(|list| list.iter().any(|d| d.same_address(id)))
    };

    for device in devices.iter_mut() {
        if contains(paired, &device.id) {
            device.paired = true;
        }
        if contains(connected, &device.id) {
            device.connected = true;
        }
    }
}
