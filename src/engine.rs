//! The control surface of the clock.
//!
//! [`Engine`] owns every component, routes decoded device events through the
//! sync logic and exposes the operations that consoles and controllers call.
//! All methods take `&self` and are safe to call from any thread.

use crate::beat_lock::{BeatLock, Gate, TriggerState, TriggerTransition};
use crate::config::{Settings, MAX_BPM, MIN_BPM};
use crate::devices::Backline;
use crate::diff::DiffTracker;
use crate::event_loop::DeviceEvent;
use crate::listener::{BeatReport, Listener, Listeners};
use crate::midi::{ClockSink, SinkError};
use crate::scheduler::ClockScheduler;
use crate::state::SequencerState;
use crate::store::{BpmStore, StoreError};
use crate::sync::{SyncController, SyncLock};
use crate::tap::TapTempo;
use crate::tempo::{TempoController, TempoRequest};
use crate::threads::Spawner;
use crate::timing::{bpm_to_micros, now_micros, phase_diff_ms};
use log::{debug, error, info, trace};
use std::error::Error;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug)]
pub enum EngineError {
    /// A worker thread could not be started
    Spawn(io::Error),
    /// The clock output could not be opened or failed
    Sink(SinkError),
    /// The configuration could not be read
    Config(::config::ConfigError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Spawn(e) => write!(f, "failed to start thread: {}", e),
            EngineError::Sink(e) => write!(f, "{}", e),
            EngineError::Config(e) => write!(f, "configuration error: {}", e),
        }
    }
}

impl Error for EngineError {}

impl From<SinkError> for EngineError {
    fn from(e: SinkError) -> Self {
        EngineError::Sink(e)
    }
}

impl From<::config::ConfigError> for EngineError {
    fn from(e: ::config::ConfigError) -> Self {
        EngineError::Config(e)
    }
}

pub struct Engine {
    state: Arc<SequencerState>,
    sink: Arc<dyn ClockSink>,
    gate: Arc<Gate>,
    listeners: Arc<Listeners>,
    tracker: Arc<DiffTracker>,
    backline: Arc<Backline>,
    tempo: Arc<TempoController>,
    beat_lock: Arc<BeatLock>,
    sync: SyncController,
    tap: TapTempo,
    store: BpmStore,
    pulses_per_batch: u32,
    sync_output: bool,
    failed: Arc<AtomicBool>,
}

impl Engine {
    pub fn new(settings: &Settings, sink: Arc<dyn ClockSink>) -> Self {
        let state = Arc::new(SequencerState::new(settings.bpm));
        let gate = Arc::new(Gate::new());
        let listeners = Arc::new(Listeners::new());
        let tracker = Arc::new(DiffTracker::new());
        let backline = Arc::new(Backline::new());
        let tempo = Arc::new(TempoController::new(
            state.clone(),
            sink.clone(),
            listeners.clone(),
        ));
        let beat_lock = Arc::new(BeatLock::new(state.clone(), gate.clone()));
        let sync = SyncController::new(
            tracker.clone(),
            backline.clone(),
            tempo.clone(),
            beat_lock.clone(),
            settings.default_offset_ms,
        );

        Engine {
            state,
            sink,
            gate,
            listeners,
            tracker,
            backline,
            tempo,
            beat_lock,
            sync,
            tap: TapTempo::new(),
            store: BpmStore::new(&settings.bpm_file),
            pulses_per_batch: settings.pulses_per_batch(),
            sync_output: settings.sync_output,
            failed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn Listener>) {
        self.listeners.add(listener);
    }

    pub fn scheduler(&self) -> ClockScheduler {
        ClockScheduler::new(
            self.state.clone(),
            self.sink.clone(),
            self.gate.clone(),
            self.listeners.clone(),
        )
        .with_batch(self.pulses_per_batch)
        .with_sync_output(self.sync_output)
    }

    /// Starts the scheduler and tempo threads. The clock stays paused until
    /// [`Engine::start`].
    pub fn launch<S: Spawner>(&self, spawner: &S) -> Result<(), EngineError> {
        self.state.set_running(true);

        let scheduler = self.scheduler();
        let state = self.state.clone();
        let failed = self.failed.clone();
        let spawned = spawner.spawn("clock-scheduler", move || {
            if let Err(e) = scheduler.run() {
                error!("Clock output failed, shutting down: {}", e);
                failed.store(true, Ordering::SeqCst);
                state.set_running(false);
            }
        });
        if let Err(e) = spawned {
            self.state.set_running(false);
            return Err(EngineError::Spawn(e));
        }

        let tempo = self.tempo.clone();
        if let Err(e) = spawner.spawn("tempo-controller", move || tempo.run()) {
            self.state.set_running(false);
            return Err(EngineError::Spawn(e));
        }

        if self.listeners.is_empty() {
            debug!("No clock listeners registered");
        }
        info!(
            "Engine launched at {} bpm, {} listeners",
            self.state.bpm(),
            self.listeners.len()
        );
        Ok(())
    }

    fn report(&self, message: &str) {
        debug!("op: {}", message);
        self.listeners.message(message);
    }

    pub fn start(&self) {
        self.state.set_paused(false);
        self.report("start");
    }

    pub fn stop(&self) {
        self.state.set_paused(true);
        self.report("stop");
    }

    pub fn toggle(&self) {
        if self.state.toggle_paused() {
            self.report("stop");
        } else {
            self.report("start");
        }
    }

    pub fn nudge(&self, multiplier: i32) {
        self.tempo.request(TempoRequest::NudgeMultiplier(multiplier));
        self.report(if multiplier >= 0 { "nudge >" } else { "< nudge" });
    }

    pub fn nudge_millis(&self, millis: i32) {
        self.tempo.request(TempoRequest::NudgeMillis(millis));
        self.report(if millis >= 0 { "nudge ms >" } else { "< nudge ms" });
    }

    pub fn set_tempo(&self, bpm: f32) {
        self.tempo.request(TempoRequest::SetAbsolute(bpm));
        self.report(&format!("bpm {:.2}", bpm));
    }

    pub fn adjust_tempo(&self, delta: f32) {
        self.tempo.request(TempoRequest::AdjustRelative(delta));
        self.report(&format!("bpm {:+.2}", delta));
    }

    pub fn quantized_restart(&self) {
        self.state.request_restart();
        self.report("restart");
    }

    pub fn trigger_from_player(&self, device: u8) {
        self.beat_lock.trigger_from_player(device);
        self.report(&format!("trigger {}", device));
    }

    pub fn lock(&self, device: u8, use_default: bool) -> bool {
        let locked = self.sync.lock(device, use_default);
        if locked {
            self.report(&format!("lock {}", device));
        }
        locked
    }

    pub fn release(&self) {
        self.sync.release();
        self.report("release");
    }

    pub fn nudge_offset(&self, delta_ms: i32) -> i32 {
        let offset = self.sync.nudge_offset(delta_ms);
        self.report(&format!("offset {} ms", offset));
        offset
    }

    pub fn set_master_follow(&self, enabled: bool) {
        self.sync.set_master_follow(enabled);
        self.report(if enabled { "master follow on" } else { "master follow off" });
    }

    pub fn set_tempo_follow(&self, enabled: bool) {
        self.sync.set_tempo_follow(enabled);
        self.report(if enabled { "tempo follow on" } else { "tempo follow off" });
    }

    /// Takes over a device's reported tempo. Returns false if the device is
    /// unknown or its tempo is out of range.
    pub fn copy_bpm(&self, device: u8) -> bool {
        match self.backline.bpm(device) {
            Some(bpm) if (MIN_BPM..=MAX_BPM).contains(&bpm) => {
                self.set_tempo(bpm);
                true
            }
            _ => {
                debug!("Nothing to copy from device {}", device);
                false
            }
        }
    }

    pub fn mark_track_start(&self, device: u8) {
        self.tracker.track_start(device, now_micros());
        self.report(&format!("track {}", device));
    }

    pub fn tap(&self) -> Option<f32> {
        let bpm = self.tap.tap(now_micros());
        match bpm {
            Some(bpm) => self.set_tempo(bpm),
            None => self.report(&format!("tap {}", self.tap.count())),
        }
        bpm
    }

    pub fn save_bpm(&self) -> Result<(), StoreError> {
        self.store.save(self.state.bpm())?;
        self.report("saved");
        Ok(())
    }

    pub fn quit(&self) {
        info!("Quit requested");
        self.state.set_running(false);
    }

    /// True once the clock output has failed.
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    pub fn is_paused(&self) -> bool {
        self.state.is_paused()
    }

    pub fn bpm(&self) -> f32 {
        self.state.bpm()
    }

    pub fn effective_bpm(&self) -> f32 {
        self.state.effective_bpm()
    }

    pub fn state(&self) -> &Arc<SequencerState> {
        &self.state
    }

    pub fn tempo(&self) -> &Arc<TempoController> {
        &self.tempo
    }

    pub fn tracker(&self) -> &Arc<DiffTracker> {
        &self.tracker
    }

    pub fn backline(&self) -> &Arc<Backline> {
        &self.backline
    }

    pub fn sync_status(&self) -> SyncLock {
        self.sync.snapshot()
    }

    pub fn trigger_state(&self) -> TriggerState {
        self.beat_lock.trigger_state()
    }

    pub fn is_frozen(&self) -> bool {
        self.gate.is_closed()
    }

    /// Routes one decoded device event. Events from unknown devices or with
    /// an impossible bar position are dropped.
    pub fn handle_event(&self, event: &DeviceEvent) {
        match *event {
            DeviceEvent::Discovery { device } => {
                self.backline.discover(device);
            }
            DeviceEvent::Status {
                device,
                bpm,
                is_master,
            } => {
                if !self.backline.observe_status(device, bpm) {
                    trace!("Dropping status from unknown device {}", device);
                    return;
                }
                self.sync.on_status(device, bpm, is_master);
            }
            DeviceEvent::Beat {
                device,
                bar_position,
                bpm,
                timestamp_us,
            } => self.handle_beat(device, bar_position, bpm, timestamp_us),
        }
    }

    fn handle_beat(&self, device: u8, bar_position: u8, bpm: f32, timestamp_us: u64) {
        if !(1..=4).contains(&bar_position) {
            trace!("Dropping beat with bar position {}", bar_position);
            return;
        }
        if !self.backline.observe_beat(device, bpm) {
            trace!("Dropping beat from unknown device {}", device);
            return;
        }

        let mut diff_ms = 0;
        if !self.state.is_paused() && !self.gate.is_closed() {
            if let Some(local) = self.state.local_beat() {
                let beat_len = u64::from(bpm_to_micros(self.state.effective_bpm()));
                diff_ms = phase_diff_ms(local, beat_len, timestamp_us);
                self.tracker.add_diff(device, diff_ms);
            }
        }

        let (mut bar_bpm, mut track_bpm) = (None, None);
        if bar_position == 1 {
            bar_bpm = estimate(self.tracker.estimate_bar_bpm(device, timestamp_us));
            track_bpm = estimate(self.tracker.estimate_track_bpm(device, timestamp_us));
            trace!(
                "Device {} bar tempo {:?}, track tempo {:?}",
                device,
                bar_bpm,
                track_bpm
            );
        }

        match self.beat_lock.on_beat(device, bar_position) {
            Some(TriggerTransition::Engaged) => self.report("triggered"),
            Some(TriggerTransition::Released) => self.report("released"),
            None => {}
        }

        let correction_ms = self.sync.on_beat(device, bar_position);
        if let Some(correction) = correction_ms {
            self.report(&format!("sync {:+} ms", correction));
        }

        self.listeners.beat(&BeatReport {
            device,
            bar_position,
            bpm,
            diff_ms,
            avg_ms: self.tracker.avg(device),
            correction_ms,
            bar_bpm,
            track_bpm,
        });
    }
}

/// Zero means the tracker had nothing to estimate from.
fn estimate(bpm: f32) -> Option<f32> {
    (bpm > 0.0).then_some(bpm)
}
