//! Tempo changes, applied off the scheduler thread.

use crate::listener::Listeners;
use crate::midi::ClockSink;
use crate::state::SequencerState;
use crate::timing::{bpm_to_micros, micros_to_bpm, nudge_bpm, nudge_micros, one_beat};
use crossbeam::atomic::AtomicCell;
use log::{debug, info, warn};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum TempoRequest {
    #[default]
    None,
    SetAbsolute(f32),
    AdjustRelative(f32),
    /// Plays `bpm + 0.1 * n` for one beat.
    NudgeMultiplier(i32),
    /// Lengthens one beat by the given milliseconds. Positive slows down.
    NudgeMillis(i32),
}

/// Services one pending [`TempoRequest`] at a time.
///
/// Requests land in a single slot: a request written while another is still
/// unconsumed replaces it, and one written during a nudge waits for the nudge
/// to finish.
pub struct TempoController {
    slot: AtomicCell<TempoRequest>,
    state: Arc<SequencerState>,
    sink: Arc<dyn ClockSink>,
    listeners: Arc<Listeners>,
    poll_interval: Duration,
}

impl TempoController {
    pub fn new(
        state: Arc<SequencerState>,
        sink: Arc<dyn ClockSink>,
        listeners: Arc<Listeners>,
    ) -> Self {
        TempoController {
            slot: AtomicCell::new(TempoRequest::None),
            state,
            sink,
            listeners,
            poll_interval: POLL_INTERVAL,
        }
    }

    pub fn request(&self, request: TempoRequest) {
        debug!("Tempo request {:?}", request);
        self.slot.store(request);
    }

    pub fn pending(&self) -> TempoRequest {
        self.slot.load()
    }

    pub fn run(&self) {
        info!("Tempo controller started");
        while self.state.is_running() {
            if !self.service_once() {
                thread::sleep(self.poll_interval);
            }
        }
        info!("Tempo controller stopped");
    }

    /// Takes the pending request and applies it. Nudges block for one beat.
    /// Returns false when there was nothing to do.
    pub fn service_once(&self) -> bool {
        match self.slot.swap(TempoRequest::None) {
            TempoRequest::None => false,
            TempoRequest::SetAbsolute(bpm) => {
                self.set_nominal(bpm);
                true
            }
            TempoRequest::AdjustRelative(delta) => {
                self.set_nominal(self.state.bpm() + delta);
                true
            }
            TempoRequest::NudgeMultiplier(0) | TempoRequest::NudgeMillis(0) => true,
            TempoRequest::NudgeMultiplier(multiplier) => {
                let original = self.state.bpm();
                let nudged = nudge_bpm(original, multiplier);
                self.nudge(original, bpm_to_micros(nudged), nudged);
                true
            }
            TempoRequest::NudgeMillis(millis) => {
                let original = self.state.bpm();
                let micros = nudge_micros(original, millis);
                self.nudge(original, micros, micros_to_bpm(u64::from(micros)));
                true
            }
        }
    }

    fn set_nominal(&self, bpm: f32) {
        if bpm.is_nan() || bpm <= 0.0 {
            warn!("Dropping tempo change to {} bpm", bpm);
            return;
        }
        self.state.set_bpm(bpm);
        self.push_tempo(bpm_to_micros(bpm), bpm);
        info!("Tempo set to {:.2} bpm", bpm);
    }

    fn nudge(&self, original: f32, micros: u32, effective: f32) {
        debug!("Nudging to {:.2} bpm for one beat", effective);
        self.push_tempo(micros, effective);
        thread::sleep(one_beat(original));
        self.push_tempo(bpm_to_micros(original), original);
    }

    fn push_tempo(&self, micros_per_beat: u32, effective: f32) {
        if let Err(e) = self.sink.set_tempo(micros_per_beat) {
            warn!("Failed to apply tempo {}: {}", micros_per_beat, e);
            return;
        }
        self.state.set_effective_bpm(effective);
        self.listeners.tempo(effective);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::RecordingSink;
    use std::time::Instant;

    fn controller(bpm: f32) -> (Arc<TempoController>, Arc<RecordingSink>, Arc<SequencerState>) {
        let state = Arc::new(SequencerState::new(bpm));
        let sink = Arc::new(RecordingSink::new());
        let tempo = TempoController::new(state.clone(), sink.clone(), Arc::new(Listeners::new()));
        (Arc::new(tempo), sink, state)
    }

    #[test]
    fn test_set_and_adjust() {
        let (tempo, sink, state) = controller(120.0);
        assert!(!tempo.service_once());

        tempo.request(TempoRequest::SetAbsolute(128.0));
        assert!(tempo.service_once());
        assert_eq!(state.bpm(), 128.0);
        assert_eq!(state.effective_bpm(), 128.0);

        tempo.request(TempoRequest::AdjustRelative(-8.0));
        assert!(tempo.service_once());
        assert_eq!(state.bpm(), 120.0);
        assert_eq!(sink.tempos(), vec![468_750, 500_000]);
    }

    #[test]
    fn test_non_positive_tempo_is_dropped() {
        let (tempo, sink, state) = controller(120.0);
        tempo.request(TempoRequest::AdjustRelative(-200.0));
        assert!(tempo.service_once());
        assert_eq!(state.bpm(), 120.0);
        assert!(sink.tempos().is_empty());
    }

    #[test]
    fn test_last_write_wins() {
        let (tempo, _, state) = controller(120.0);
        tempo.request(TempoRequest::SetAbsolute(90.0));
        tempo.request(TempoRequest::SetAbsolute(100.0));
        assert_eq!(tempo.pending(), TempoRequest::SetAbsolute(100.0));
        tempo.service_once();
        assert_eq!(state.bpm(), 100.0);
        assert_eq!(tempo.pending(), TempoRequest::None);
    }

    #[test]
    fn test_multiplier_nudge_reverts_after_one_beat() {
        let (tempo, sink, state) = controller(120.0);
        tempo.request(TempoRequest::NudgeMultiplier(10));

        let started = Instant::now();
        let worker = {
            let tempo = tempo.clone();
            thread::spawn(move || tempo.service_once())
        };
        thread::sleep(Duration::from_millis(150));
        assert!((state.effective_bpm() - 121.0).abs() < 1e-3);
        assert_eq!(state.bpm(), 120.0);

        assert!(worker.join().unwrap());
        assert!(started.elapsed() >= Duration::from_millis(500));
        assert_eq!(state.effective_bpm(), 120.0);
        assert_eq!(sink.tempos(), vec![bpm_to_micros(121.0), 500_000]);
    }

    #[test]
    fn test_request_during_nudge_waits_for_revert() {
        let (tempo, sink, state) = controller(120.0);
        state.set_running(true);
        tempo.request(TempoRequest::NudgeMultiplier(10));
        let worker = {
            let tempo = tempo.clone();
            thread::spawn(move || tempo.run())
        };

        thread::sleep(Duration::from_millis(150));
        assert!((state.effective_bpm() - 121.0).abs() < 1e-3);
        tempo.request(TempoRequest::SetAbsolute(90.0));
        tempo.request(TempoRequest::SetAbsolute(100.0));
        thread::sleep(Duration::from_millis(100));
        // held in the slot until the nudge has reverted
        assert_eq!(tempo.pending(), TempoRequest::SetAbsolute(100.0));
        assert_eq!(state.bpm(), 120.0);

        let deadline = Instant::now() + Duration::from_secs(2);
        while state.bpm() != 100.0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        state.set_running(false);
        worker.join().unwrap();

        assert_eq!(state.bpm(), 100.0);
        assert_eq!(
            sink.tempos(),
            vec![bpm_to_micros(121.0), 500_000, 600_000]
        );
    }

    #[test]
    fn test_millis_nudge() {
        let (tempo, sink, state) = controller(240.0);
        tempo.request(TempoRequest::NudgeMillis(5));
        assert!(tempo.service_once());
        assert_eq!(sink.tempos(), vec![255_000, 250_000]);
        assert_eq!(state.effective_bpm(), 240.0);
    }
}
