//! Difflock: keep the local clock at a fixed phase offset from one device.
//!
//! Once per bar, on the locked device's fourth beat, the averaged phase
//! difference is compared with the target offset and the clock is nudged by
//! the difference, at most `DIFF_LIMIT_MS` either way. Master follow moves the
//! lock to whichever device reports itself master; tempo follow copies the
//! locked device's tempo whenever it changes.

use crate::beat_lock::BeatLock;
use crate::config::{BEATS_PER_BAR, DIFF_LIMIT_MS, DIFF_WINDOW, MAX_BPM, MIN_BPM};
use crate::devices::Backline;
use crate::diff::DiffTracker;
use crate::tempo::{TempoController, TempoRequest};
use log::{debug, info};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SyncLock {
    pub locked_player: Option<u8>,
    pub target_offset_ms: i32,
    pub master_follow: bool,
    pub tempo_follow: bool,
    pub known_master: Option<u8>,
    /// Whether the current lock took the configured default offset; master
    /// follow retargets the same way.
    pub use_default: bool,
    pub last_followed_bpm: Option<f32>,
}

pub struct SyncController {
    lock: Mutex<SyncLock>,
    tracker: Arc<DiffTracker>,
    backline: Arc<Backline>,
    tempo: Arc<TempoController>,
    beat_lock: Arc<BeatLock>,
    default_offset_ms: i32,
}

impl SyncController {
    pub fn new(
        tracker: Arc<DiffTracker>,
        backline: Arc<Backline>,
        tempo: Arc<TempoController>,
        beat_lock: Arc<BeatLock>,
        default_offset_ms: i32,
    ) -> Self {
        SyncController {
            lock: Mutex::new(SyncLock::default()),
            tracker,
            backline,
            tempo,
            beat_lock,
            default_offset_ms,
        }
    }

    fn guard(&self) -> MutexGuard<'_, SyncLock> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> SyncLock {
        *self.guard()
    }

    pub fn locked_player(&self) -> Option<u8> {
        self.guard().locked_player
    }

    /// Locks onto a known device. The target offset is the configured
    /// default, or the device's current phase difference.
    pub fn lock(&self, device: u8, use_default: bool) -> bool {
        if !self.backline.is_known(device) {
            debug!("Not locking to unknown device {}", device);
            return false;
        }
        let mut lock = self.guard();
        self.retarget(&mut lock, device, use_default);
        if lock.known_master != Some(device) {
            lock.master_follow = false;
        }
        true
    }

    fn retarget(&self, lock: &mut SyncLock, device: u8, use_default: bool) {
        lock.locked_player = Some(device);
        lock.use_default = use_default;
        lock.target_offset_ms = if use_default {
            self.default_offset_ms
        } else {
            self.tracker.last_diff(device)
        };
        lock.last_followed_bpm = self.backline.bpm(device);
        info!(
            "Locked to player {} at {} ms",
            device, lock.target_offset_ms
        );
    }

    pub fn release(&self) {
        let mut lock = self.guard();
        lock.locked_player = None;
        lock.master_follow = false;
        lock.last_followed_bpm = None;
        self.tracker.reset();
        info!("Sync released");
    }

    pub fn nudge_offset(&self, delta_ms: i32) -> i32 {
        let mut lock = self.guard();
        lock.target_offset_ms = lock.target_offset_ms.saturating_add(delta_ms);
        lock.target_offset_ms
    }

    /// Turning master follow on locks to the current master straight away.
    pub fn set_master_follow(&self, enabled: bool) {
        let mut lock = self.guard();
        lock.master_follow = enabled;
        if let Some(master) = lock.known_master.filter(|_| enabled) {
            if lock.locked_player != Some(master) && self.backline.is_known(master) {
                let use_default = lock.use_default;
                self.retarget(&mut lock, master, use_default);
            }
        }
    }

    pub fn set_tempo_follow(&self, enabled: bool) {
        let mut lock = self.guard();
        lock.tempo_follow = enabled;
        lock.last_followed_bpm = None;
    }

    /// Handles a device status report: master changes and tempo follow.
    pub fn on_status(&self, device: u8, bpm: f32, is_master: bool) {
        let mut lock = self.guard();

        if is_master && lock.known_master != Some(device) {
            info!("Player {} is now master", device);
            lock.known_master = Some(device);
            if lock.master_follow && lock.locked_player != Some(device) {
                let use_default = lock.use_default;
                self.retarget(&mut lock, device, use_default);
            }
        }

        if lock.tempo_follow
            && lock.locked_player == Some(device)
            && lock.last_followed_bpm != Some(bpm)
        {
            lock.last_followed_bpm = Some(bpm);
            if (MIN_BPM..=MAX_BPM).contains(&bpm) {
                debug!("Following player {} to {} bpm", device, bpm);
                self.tempo.request(TempoRequest::SetAbsolute(bpm));
            }
        }
    }

    /// Runs the once-per-bar correction. Returns the nudge issued, if any.
    pub fn on_beat(&self, device: u8, bar_position: u8) -> Option<i32> {
        let lock = self.snapshot();
        if u32::from(bar_position) != BEATS_PER_BAR || lock.locked_player != Some(device) {
            return None;
        }
        if self.beat_lock.is_engaged() {
            return None;
        }
        // the window average reads zero until it is full
        if (self.tracker.seen_count(device) as usize) < DIFF_WINDOW {
            return None;
        }
        let correction =
            (self.tracker.avg(device) - lock.target_offset_ms).clamp(-DIFF_LIMIT_MS, DIFF_LIMIT_MS);
        if correction == 0 {
            return None;
        }
        debug!(
            "Correcting {} ms against player {} (target {})",
            correction, device, lock.target_offset_ms
        );
        self.tempo.request(TempoRequest::NudgeMillis(correction));
        Some(correction)
    }
}
