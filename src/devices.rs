use crate::config::MAX_DEVICES;
use log::{info, trace};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DeviceSlot {
    pub known: bool,
    pub bpm: f32,
}

/// The external devices seen on the network, by id.
pub struct Backline {
    slots: Mutex<[DeviceSlot; MAX_DEVICES + 1]>,
}

impl Default for Backline {
    fn default() -> Self {
        Self::new()
    }
}

fn slot(device: u8) -> Option<usize> {
    let id = usize::from(device);
    (1..=MAX_DEVICES).contains(&id).then_some(id)
}

impl Backline {
    pub fn new() -> Self {
        Backline {
            slots: Mutex::new([DeviceSlot::default(); MAX_DEVICES + 1]),
        }
    }

    fn slots(&self) -> MutexGuard<'_, [DeviceSlot; MAX_DEVICES + 1]> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks a device as present. Returns true the first time it is seen.
    pub fn discover(&self, device: u8) -> bool {
        let Some(id) = slot(device) else {
            trace!("Ignoring discovery of device {}", device);
            return false;
        };
        let mut slots = self.slots();
        if slots[id].known {
            return false;
        }
        slots[id].known = true;
        info!("Discovered device {}", device);
        true
    }

    /// Records a status report. Reports from unknown devices are dropped.
    pub fn observe_status(&self, device: u8, bpm: f32) -> bool {
        self.update(device, bpm)
    }

    pub fn observe_beat(&self, device: u8, bpm: f32) -> bool {
        self.update(device, bpm)
    }

    fn update(&self, device: u8, bpm: f32) -> bool {
        let Some(id) = slot(device) else {
            return false;
        };
        let mut slots = self.slots();
        if !slots[id].known {
            return false;
        }
        slots[id].bpm = bpm;
        true
    }

    pub fn is_known(&self, device: u8) -> bool {
        slot(device).map_or(false, |id| self.slots()[id].known)
    }

    /// Last bpm a known device reported.
    pub fn bpm(&self, device: u8) -> Option<f32> {
        let id = slot(device)?;
        let slot = self.slots()[id];
        slot.known.then_some(slot.bpm)
    }

    pub fn known_devices(&self) -> Vec<u8> {
        self.slots()
            .iter()
            .enumerate()
            .filter(|(_, s)| s.known)
            .map(|(id, _)| id as u8)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery() {
        let backline = Backline::new();
        assert!(!backline.is_known(2));
        assert!(backline.discover(2));
        assert!(!backline.discover(2));
        assert!(backline.is_known(2));
        assert!(!backline.discover(0));
        assert!(!backline.discover(33));
        assert_eq!(backline.known_devices(), vec![2]);
    }

    #[test]
    fn test_status_needs_discovery() {
        let backline = Backline::new();
        assert!(!backline.observe_status(1, 128.0));
        assert_eq!(backline.bpm(1), None);

        backline.discover(1);
        assert!(backline.observe_status(1, 128.0));
        assert_eq!(backline.bpm(1), Some(128.0));
        assert!(backline.observe_beat(1, 127.5));
        assert_eq!(backline.bpm(1), Some(127.5));
    }
}
