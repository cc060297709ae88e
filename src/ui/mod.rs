//! Terminal status display
//!
//! Shows where the clock is in the beat and the bar, the tempo, and the state
//! of the sync and trigger machinery. Built on indicatif progress bars and fed
//! by a [`ChannelListener`], so drawing never runs on the clock threads.
//!
//! [`ChannelListener`]: crate::listener::ChannelListener

mod progress;

use crate::beat_lock::TriggerState;
use crate::config::{BEATS_PER_BAR, PPQ, TICKS_PER_QUARTER_BEAT};
use crate::engine::Engine;
use crate::listener::{BeatReport, Notification, TransportEvent};
use crate::sync::SyncLock;
use crossbeam::channel::{Receiver, RecvTimeoutError};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget};
use log::info;
use std::sync::Arc;
use std::time::Duration;

pub use progress::{
    create_bar_progress, create_beat_progress, create_status_spinner, QUARTERS_PER_BEAT,
};

const REFRESH: Duration = Duration::from_millis(100);

/// Beat (1..=4) and quarter beat (1..=4) for a scheduler tick.
pub fn position(tick: u32) -> (u32, u32) {
    let beat = (tick / PPQ) % BEATS_PER_BAR + 1;
    let quarter = (tick / TICKS_PER_QUARTER_BEAT) % QUARTERS_PER_BEAT as u32 + 1;
    (beat, quarter)
}

/// Everything the status line shows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusView {
    pub bpm: f32,
    pub effective_bpm: f32,
    pub playing: bool,
    pub sync: SyncLock,
    pub trigger: TriggerState,
    pub players: Vec<u8>,
    pub last_beat: Option<BeatReport>,
    pub last_message: String,
}

impl StatusView {
    /// Keeps the latest beat. Tempo estimates only arrive on downbeats, so
    /// the previous ones stay on show until the same device reports new ones.
    pub fn record_beat(&mut self, mut report: BeatReport) {
        if let Some(previous) = &self.last_beat {
            if previous.device == report.device {
                report.bar_bpm = report.bar_bpm.or(previous.bar_bpm);
                report.track_bpm = report.track_bpm.or(previous.track_bpm);
            }
        }
        self.last_beat = Some(report);
    }

    pub fn line(&self) -> String {
        let mut line = format!(
            "{} | {:.2} bpm",
            if self.playing { "playing" } else { "stopped" },
            self.bpm
        );
        if (self.effective_bpm - self.bpm).abs() > f32::EPSILON {
            line.push_str(&format!(" ({:.2})", self.effective_bpm));
        }
        if let Some(player) = self.sync.locked_player {
            line.push_str(&format!(
                " | lock {} @ {} ms",
                player, self.sync.target_offset_ms
            ));
        }
        if self.sync.master_follow {
            line.push_str(" | master");
        }
        if self.sync.tempo_follow {
            line.push_str(" | follow");
        }
        match self.trigger {
            TriggerState::Idle => {}
            TriggerState::Pending(id) => line.push_str(&format!(" | trigger {}", id)),
            TriggerState::Engaged(id) => line.push_str(&format!(" | waiting for {}", id)),
        }
        if !self.players.is_empty() {
            let players: Vec<String> = self.players.iter().map(|p| p.to_string()).collect();
            line.push_str(&format!(" | players {}", players.join(",")));
        }
        if let Some(beat) = &self.last_beat {
            line.push_str(&format!(
                " | p{} {}/4 {:+} ms (avg {:+})",
                beat.device, beat.bar_position, beat.diff_ms, beat.avg_ms
            ));
            if let Some(bpm) = beat.bar_bpm {
                line.push_str(&format!(" bar {:.2}", bpm));
            }
            if let Some(bpm) = beat.track_bpm {
                line.push_str(&format!(" track {:.2}", bpm));
            }
        }
        if !self.last_message.is_empty() {
            line.push_str(&format!(" | {}", self.last_message));
        }
        line
    }
}

pub struct StatusDisplay {
    engine: Arc<Engine>,
    notifications: Receiver<Notification>,
    #[allow(dead_code)]
    multi_progress: MultiProgress,
    beat_pb: ProgressBar,
    bar_pb: ProgressBar,
    status_pb: ProgressBar,
    view: StatusView,
}

impl StatusDisplay {
    pub fn new(engine: Arc<Engine>, notifications: Receiver<Notification>) -> Self {
        let multi_progress = MultiProgress::with_draw_target(ProgressDrawTarget::stderr());
        let beat_pb = create_beat_progress(&multi_progress);
        let bar_pb = create_bar_progress(&multi_progress);
        let status_pb = create_status_spinner(&multi_progress);

        StatusDisplay {
            engine,
            notifications,
            multi_progress,
            beat_pb,
            bar_pb,
            status_pb,
            view: StatusView::default(),
        }
    }

    pub fn run(mut self) {
        info!("Status display started");
        while self.engine.is_running() {
            match self.notifications.recv_timeout(REFRESH) {
                Ok(notification) => self.apply(notification),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            for notification in self.notifications.try_iter().collect::<Vec<_>>() {
                self.apply(notification);
            }
            self.refresh();
        }
        self.status_pb.finish_and_clear();
    }

    fn apply(&mut self, notification: Notification) {
        match notification {
            Notification::Tick(tick) => {
                let (beat, quarter) = position(tick);
                self.bar_pb.set_position(u64::from(beat));
                self.beat_pb.set_position(u64::from(quarter));
            }
            Notification::Beat(report) => self.view.record_beat(report),
            Notification::Tempo(bpm) => self.view.effective_bpm = bpm,
            Notification::Transport(TransportEvent::Stopped) => {
                self.bar_pb.set_position(0);
                self.beat_pb.set_position(0);
            }
            Notification::Transport(_) => {}
            Notification::Message(message) => self.view.last_message = message,
        }
    }

    fn refresh(&mut self) {
        self.view.bpm = self.engine.bpm();
        self.view.effective_bpm = self.engine.effective_bpm();
        self.view.playing = !self.engine.is_paused() && !self.engine.is_frozen();
        self.view.sync = self.engine.sync_status();
        self.view.trigger = self.engine.trigger_state();
        self.view.players = self.engine.backline().known_devices();
        self.status_pb.set_message(self.view.line());
        self.status_pb.tick();
    }
}
