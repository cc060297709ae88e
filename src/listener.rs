//! Observers of the clock.
//!
//! Listeners are called from the thread that produced the event: ticks from
//! the scheduler, tempo changes from the tempo executor, beats from the event
//! loop. Implementations must return quickly; [`ChannelListener`] hands
//! everything to another thread without blocking.

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use log::trace;
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    Started,
    Stopped,
    Restarted,
}

/// A device beat after it has been routed through the sync logic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeatReport {
    pub device: u8,
    pub bar_position: u8,
    pub bpm: f32,
    pub diff_ms: i32,
    pub avg_ms: i32,
    /// Nudge issued by this beat, if any.
    pub correction_ms: Option<i32>,
    /// Tempo over the bar just ended. Downbeats only.
    pub bar_bpm: Option<f32>,
    /// Average tempo since the device's track was marked. Downbeats only.
    pub track_bpm: Option<f32>,
}

pub trait Listener: Send + Sync {
    /// Called once per refill cycle, after the first pulse is queued.
    fn on_tick(&self, _tick: u32) {}

    fn on_beat(&self, _beat: &BeatReport) {}

    /// New effective bpm applied to the sink.
    fn on_tempo(&self, _bpm: f32) {}

    fn on_transport(&self, _event: TransportEvent) {}

    /// Short human readable report of an operation ("nudge >", "saved", ...).
    fn on_message(&self, _message: &str) {}
}

#[derive(Default)]
pub struct Listeners {
    listeners: RwLock<Vec<Arc<dyn Listener>>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn Listener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn each(&self, f: impl Fn(&dyn Listener)) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        for listener in listeners.iter() {
            f(listener.as_ref());
        }
    }

    pub fn tick(&self, tick: u32) {
        self.each(|l| l.on_tick(tick));
    }

    pub fn beat(&self, beat: &BeatReport) {
        self.each(|l| l.on_beat(beat));
    }

    pub fn tempo(&self, bpm: f32) {
        self.each(|l| l.on_tempo(bpm));
    }

    pub fn transport(&self, event: TransportEvent) {
        self.each(|l| l.on_transport(event));
    }

    pub fn message(&self, message: &str) {
        self.each(|l| l.on_message(message));
    }
}

/// Everything a [`Listener`] can observe, as a value.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Tick(u32),
    Beat(BeatReport),
    Tempo(f32),
    Transport(TransportEvent),
    Message(String),
}

/// Forwards notifications into a bounded channel. When the consumer falls
/// behind, new notifications are dropped rather than blocking the caller.
pub struct ChannelListener {
    tx: Sender<Notification>,
}

impl ChannelListener {
    pub fn bounded(capacity: usize) -> (Self, Receiver<Notification>) {
        let (tx, rx) = channel::bounded(capacity);
        (ChannelListener { tx }, rx)
    }

    fn forward(&self, notification: Notification) {
        match self.tx.try_send(notification) {
            Ok(()) => {}
            Err(TrySendError::Full(n)) => trace!("Listener channel full, dropped {:?}", n),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

impl Listener for ChannelListener {
    fn on_tick(&self, tick: u32) {
        self.forward(Notification::Tick(tick));
    }

    fn on_beat(&self, beat: &BeatReport) {
        self.forward(Notification::Beat(*beat));
    }

    fn on_tempo(&self, bpm: f32) {
        self.forward(Notification::Tempo(bpm));
    }

    fn on_transport(&self, event: TransportEvent) {
        self.forward(Notification::Transport(event));
    }

    fn on_message(&self, message: &str) {
        self.forward(Notification::Message(message.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_listener_forwards() {
        let hub = Listeners::new();
        let (listener, rx) = ChannelListener::bounded(8);
        hub.add(Arc::new(listener));

        hub.tick(24);
        hub.tempo(121.0);
        hub.transport(TransportEvent::Started);
        hub.message("nudge >");

        assert_eq!(rx.try_recv().unwrap(), Notification::Tick(24));
        assert_eq!(rx.try_recv().unwrap(), Notification::Tempo(121.0));
        assert_eq!(
            rx.try_recv().unwrap(),
            Notification::Transport(TransportEvent::Started)
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            Notification::Message("nudge >".to_string())
        );
    }

    #[test]
    fn test_full_channel_drops_instead_of_blocking() {
        let (listener, rx) = ChannelListener::bounded(1);
        listener.on_tick(0);
        listener.on_tick(24);
        assert_eq!(rx.len(), 1);
        assert_eq!(rx.try_recv().unwrap(), Notification::Tick(0));
    }
}
