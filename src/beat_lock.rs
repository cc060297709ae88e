//! Trigger-from-player: freeze the clock on the next device beat and resume
//! it, in phase, on the chosen device's next downbeat.

use crate::state::SequencerState;
use log::{debug, info};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

const GATE_POLL: Duration = Duration::from_millis(10);

/// Binary open/closed gate the scheduler waits at.
pub struct Gate {
    closed: Mutex<bool>,
    changed: Condvar,
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl Gate {
    pub fn new() -> Self {
        Gate {
            closed: Mutex::new(false),
            changed: Condvar::new(),
        }
    }

    pub fn close(&self) {
        *self.closed.lock().unwrap_or_else(PoisonError::into_inner) = true;
    }

    pub fn open(&self) {
        *self.closed.lock().unwrap_or_else(PoisonError::into_inner) = false;
        self.changed.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks while the gate is closed and `keep_waiting` holds. Returns
    /// whether the gate is open.
    pub fn wait_open(&self, keep_waiting: impl Fn() -> bool) -> bool {
        let mut closed = self.closed.lock().unwrap_or_else(PoisonError::into_inner);
        while *closed && keep_waiting() {
            closed = self
                .changed
                .wait_timeout(closed, GATE_POLL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        !*closed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerState {
    #[default]
    Idle,
    Pending(u8),
    Engaged(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerTransition {
    Engaged,
    Released,
}

/// If the awaited device goes silent while engaged, the clock stays frozen
/// until the device comes back or the trigger is retargeted.
pub struct BeatLock {
    trigger: Mutex<TriggerState>,
    gate: Arc<Gate>,
    state: Arc<SequencerState>,
}

impl BeatLock {
    pub fn new(state: Arc<SequencerState>, gate: Arc<Gate>) -> Self {
        BeatLock {
            trigger: Mutex::new(TriggerState::Idle),
            gate,
            state,
        }
    }

    pub fn trigger_state(&self) -> TriggerState {
        *self.trigger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_engaged(&self) -> bool {
        matches!(self.trigger_state(), TriggerState::Engaged(_))
    }

    pub fn trigger_from_player(&self, device: u8) {
        let mut trigger = self.trigger.lock().unwrap_or_else(PoisonError::into_inner);
        *trigger = match *trigger {
            TriggerState::Idle | TriggerState::Pending(_) => TriggerState::Pending(device),
            TriggerState::Engaged(_) => TriggerState::Engaged(device),
        };
        info!("Trigger from player {} ({:?})", device, *trigger);
    }

    /// Advances the trigger on a device beat. At most one transition happens
    /// per beat, so the beat that engages can never also release.
    pub fn on_beat(&self, device: u8, bar_position: u8) -> Option<TriggerTransition> {
        let mut trigger = self.trigger.lock().unwrap_or_else(PoisonError::into_inner);
        match *trigger {
            TriggerState::Idle => None,
            TriggerState::Pending(awaited) => {
                self.gate.close();
                self.state.set_paused(false);
                *trigger = TriggerState::Engaged(awaited);
                debug!("Beat from {} froze the clock, awaiting {}", device, awaited);
                Some(TriggerTransition::Engaged)
            }
            TriggerState::Engaged(awaited) if awaited == device && bar_position == 1 => {
                self.gate.open();
                *trigger = TriggerState::Idle;
                info!("Downbeat from player {} released the clock", device);
                Some(TriggerTransition::Released)
            }
            TriggerState::Engaged(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn beat_lock() -> (BeatLock, Arc<Gate>, Arc<SequencerState>) {
        let state = Arc::new(SequencerState::default());
        let gate = Arc::new(Gate::new());
        (BeatLock::new(state.clone(), gate.clone()), gate, state)
    }

    #[test]
    fn test_trigger_cycle() {
        let (lock, gate, state) = beat_lock();
        assert_eq!(lock.on_beat(1, 1), None);

        lock.trigger_from_player(3);
        assert_eq!(lock.trigger_state(), TriggerState::Pending(3));

        assert_eq!(lock.on_beat(5, 2), Some(TriggerTransition::Engaged));
        assert!(gate.is_closed());
        assert!(!state.is_paused());
        assert!(lock.is_engaged());

        // wrong device, then wrong bar position
        assert_eq!(lock.on_beat(5, 1), None);
        assert_eq!(lock.on_beat(3, 2), None);
        assert!(gate.is_closed());

        assert_eq!(lock.on_beat(3, 1), Some(TriggerTransition::Released));
        assert!(!gate.is_closed());
        assert_eq!(lock.trigger_state(), TriggerState::Idle);
    }

    #[test]
    fn test_engaging_beat_does_not_release() {
        let (lock, gate, _) = beat_lock();
        lock.trigger_from_player(3);
        assert_eq!(lock.on_beat(3, 1), Some(TriggerTransition::Engaged));
        assert!(gate.is_closed());
    }

    #[test]
    fn test_retarget() {
        let (lock, _, _) = beat_lock();
        lock.trigger_from_player(3);
        lock.trigger_from_player(4);
        assert_eq!(lock.trigger_state(), TriggerState::Pending(4));

        lock.on_beat(1, 1);
        lock.trigger_from_player(2);
        assert_eq!(lock.trigger_state(), TriggerState::Engaged(2));
        assert_eq!(lock.on_beat(4, 1), None);
        assert_eq!(lock.on_beat(2, 1), Some(TriggerTransition::Released));
    }

    #[test]
    fn test_gate_wakes_waiter() {
        let gate = Arc::new(Gate::new());
        gate.close();
        let waiter = {
            let gate = gate.clone();
            thread::spawn(move || gate.wait_open(|| true))
        };
        thread::sleep(Duration::from_millis(30));
        gate.open();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_gate_wait_gives_up() {
        let gate = Gate::new();
        gate.close();
        assert!(!gate.wait_open(|| false));
    }
}
