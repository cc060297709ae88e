use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

const NO_BEAT: u64 = u64::MAX;

/// Sequencer flags and counters shared between the scheduler thread and the
/// threads that send it requests.
///
/// Every field is a plain atomic with last-write-wins semantics. Only the
/// scheduler writes `tick` and `last_local_beat_us`; only the tempo executor
/// writes `bpm` and `effective_bpm`. Any thread may flip the flags.
pub struct SequencerState {
    running: AtomicBool,
    paused: AtomicBool,
    restart_pending: AtomicBool,
    tick: AtomicU32,
    bpm: AtomicU32, // f32 bits
    effective_bpm: AtomicU32,
    last_local_beat_us: AtomicU64,
}

impl Default for SequencerState {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_BPM)
    }
}

impl SequencerState {
    /// A sequencer that is not running yet and starts out paused.
    pub fn new(bpm: f32) -> Self {
        Self {
            running: AtomicBool::new(false),
            paused: AtomicBool::new(true),
            restart_pending: AtomicBool::new(false),
            tick: AtomicU32::new(0),
            bpm: AtomicU32::new(bpm.to_bits()),
            effective_bpm: AtomicU32::new(bpm.to_bits()),
            last_local_beat_us: AtomicU64::new(NO_BEAT),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    /// Flips the pause flag and returns the new value.
    pub fn toggle_paused(&self) -> bool {
        !self.paused.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn request_restart(&self) {
        self.restart_pending.store(true, Ordering::SeqCst);
    }

    pub fn restart_pending(&self) -> bool {
        self.restart_pending.load(Ordering::SeqCst)
    }

    pub fn clear_restart(&self) {
        self.restart_pending.store(false, Ordering::SeqCst);
    }

    pub fn tick(&self) -> u32 {
        self.tick.load(Ordering::SeqCst)
    }

    pub fn set_tick(&self, tick: u32) {
        self.tick.store(tick, Ordering::SeqCst);
    }

    /// Nominal tempo, the one nudges revert to.
    pub fn bpm(&self) -> f32 {
        f32::from_bits(self.bpm.load(Ordering::SeqCst))
    }

    pub fn set_bpm(&self, bpm: f32) {
        self.bpm.store(bpm.to_bits(), Ordering::SeqCst);
    }

    /// Tempo currently applied to the sink.
    pub fn effective_bpm(&self) -> f32 {
        f32::from_bits(self.effective_bpm.load(Ordering::SeqCst))
    }

    pub fn set_effective_bpm(&self, bpm: f32) {
        self.effective_bpm.store(bpm.to_bits(), Ordering::SeqCst);
    }

    pub fn mark_local_beat(&self, micros: u64) {
        self.last_local_beat_us.store(micros, Ordering::SeqCst);
    }

    pub fn clear_local_beat(&self) {
        self.last_local_beat_us.store(NO_BEAT, Ordering::SeqCst);
    }

    /// When the scheduler last queued the first pulse of a beat.
    pub fn local_beat(&self) -> Option<u64> {
        match self.last_local_beat_us.load(Ordering::SeqCst) {
            NO_BEAT => None,
            micros => Some(micros),
        }
    }
}
