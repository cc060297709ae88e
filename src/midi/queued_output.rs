use super::{ClockSink, Result, SinkError, CLOCK, START, STOP};
use crate::config::PPQ;
use log::{debug, error, info, trace};
use midir::{MidiOutput, MidiOutputConnection};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

const IDLE_WAIT: Duration = Duration::from_millis(10);

/// Queue position and tempo anchor. Pulse due times are computed from the
/// anchor so a tempo change only affects pulses that have not played yet.
struct Playout {
    pending: VecDeque<u32>,
    micros_per_beat: u32,
    anchor_tick: f64,
    anchor: Instant,
    playing: bool,
}

impl Playout {
    fn tick_micros(&self) -> f64 {
        f64::from(self.micros_per_beat) / f64::from(PPQ)
    }

    fn position(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.anchor).as_micros() as f64;
        self.anchor_tick + elapsed / self.tick_micros()
    }

    fn due(&self, tick: u32) -> Instant {
        let ahead = (f64::from(tick) - self.anchor_tick).max(0.0) * self.tick_micros();
        self.anchor + Duration::from_micros(ahead as u64)
    }

    fn reset(&mut self, playing: bool) {
        self.pending.clear();
        self.anchor_tick = 0.0;
        self.anchor = Instant::now();
        self.playing = playing;
    }
}

/// First send failure seen by the playout thread. Once set the output is
/// dead and every later pulse is refused.
#[derive(Default)]
struct Fault(Mutex<Option<String>>);

impl Fault {
    fn record(&self, message: String) {
        let mut fault = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if fault.is_none() {
            *fault = Some(message);
        }
    }

    fn is_set(&self) -> bool {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn check(&self) -> Result<()> {
        match &*self.0.lock().unwrap_or_else(PoisonError::into_inner) {
            Some(message) => Err(SinkError::SendError(message.clone())),
            None => Ok(()),
        }
    }
}

struct Shared {
    playout: Mutex<Playout>,
    changed: Condvar,
    connection: Mutex<MidiOutputConnection>,
    alive: AtomicBool,
    fault: Fault,
}

impl Shared {
    fn playout(&self) -> MutexGuard<'_, Playout> {
        self.playout.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, message: &[u8]) -> Result<()> {
        let mut conn = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        conn.send(message)
            .map_err(|e| SinkError::SendError(e.to_string()))
    }
}

/// MIDI clock output with its own playout thread.
///
/// The scheduler fills the queue a fraction of a beat ahead; the playout
/// thread sends each pulse when its tick falls due at the current tempo.
pub struct QueuedClockOutput {
    shared: Arc<Shared>,
    port_name: String,
}

impl QueuedClockOutput {
    /// Connects to the first output port whose name contains `device_name`,
    /// or to the first available port when no name is given.
    pub fn connect(client_name: &str, device_name: Option<&str>) -> Result<Self> {
        let midi_out = MidiOutput::new(client_name)
            .map_err(|e| SinkError::ConnectionError(e.to_string()))?;

        let out_ports = midi_out.ports();
        let available: Vec<String> = out_ports
            .iter()
            .filter_map(|p| midi_out.port_name(p).ok())
            .collect();
        info!("Available MIDI output ports: {:?}", available);

        let port = match device_name {
            Some(name) => out_ports
                .iter()
                .find(|p| midi_out.port_name(p).unwrap_or_default().contains(name))
                .ok_or_else(|| {
                    error!("MIDI output device '{}' not found", name);
                    SinkError::ConnectionError(format!("MIDI output '{}' not found", name))
                })?,
            None => out_ports.first().ok_or_else(|| {
                SinkError::ConnectionError("No MIDI output ports available".to_string())
            })?,
        };

        let port_name = midi_out
            .port_name(port)
            .map_err(|e| SinkError::ConnectionError(e.to_string()))?;
        info!("Connecting clock to MIDI output port: {}", port_name);

        let connection = midi_out
            .connect(port, &format!("{}-clock", client_name))
            .map_err(|e| SinkError::ConnectionError(e.to_string()))?;

        let shared = Arc::new(Shared {
            playout: Mutex::new(Playout {
                pending: VecDeque::with_capacity(64),
                micros_per_beat: 500_000,
                anchor_tick: 0.0,
                anchor: Instant::now(),
                playing: false,
            }),
            changed: Condvar::new(),
            connection: Mutex::new(connection),
            alive: AtomicBool::new(true),
            fault: Fault::default(),
        });

        let worker = Arc::clone(&shared);
        thread::Builder::new()
            .name("clock-playout".to_string())
            .spawn(move || run_playout(worker))
            .map_err(|e| SinkError::ConnectionError(e.to_string()))?;

        Ok(QueuedClockOutput { shared, port_name })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Names of all MIDI output ports on this host.
    pub fn list_ports(client_name: &str) -> Result<Vec<String>> {
        let midi_out = MidiOutput::new(&format!("{}-port-lister", client_name))
            .map_err(|e| SinkError::ConnectionError(e.to_string()))?;
        Ok(midi_out
            .ports()
            .iter()
            .filter_map(|p| midi_out.port_name(p).ok())
            .collect())
    }
}

fn run_playout(shared: Arc<Shared>) {
    debug!("Clock playout thread started");
    let mut playout = shared.playout();
    while shared.alive.load(Ordering::SeqCst) {
        let front = if playout.playing {
            playout.pending.front().copied()
        } else {
            None
        };
        let Some(next) = front else {
            playout = shared
                .changed
                .wait_timeout(playout, IDLE_WAIT)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
            continue;
        };

        let now = Instant::now();
        let due = playout.due(next);
        if due > now {
            playout = shared
                .changed
                .wait_timeout(playout, due - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
            continue;
        }

        playout.pending.pop_front();
        drop(playout);
        if let Err(e) = shared.send(&[CLOCK]) {
            error!("Clock pulse at tick {} failed, output is dead: {}", next, e);
            shared.fault.record(e.to_string());
            shared.changed.notify_all();
            break;
        }
        trace!("Played clock pulse at tick {}", next);
        shared.changed.notify_all();
        playout = shared.playout();
    }
    debug!("Clock playout thread stopped");
}

impl ClockSink for QueuedClockOutput {
    fn start(&self) -> Result<()> {
        self.shared.playout().reset(true);
        self.shared.changed.notify_all();
        self.shared.send(&[START])
    }

    fn stop(&self) -> Result<()> {
        self.shared.playout().reset(false);
        self.shared.changed.notify_all();
        self.shared.send(&[STOP])
    }

    fn clock(&self, tick: u32) -> Result<()> {
        self.shared.fault.check()?;
        self.shared.playout().pending.push_back(tick);
        self.shared.changed.notify_all();
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.shared.fault.check()
    }

    fn set_tempo(&self, micros_per_beat: u32) -> Result<()> {
        let mut playout = self.shared.playout();
        let now = Instant::now();
        playout.anchor_tick = playout.position(now);
        playout.anchor = now;
        playout.micros_per_beat = micros_per_beat.max(1);
        drop(playout);
        self.shared.changed.notify_all();
        Ok(())
    }

    fn queued(&self) -> usize {
        self.shared.playout().pending.len()
    }

    fn wait_drained(&self) {
        let mut playout = self.shared.playout();
        while playout.playing && !playout.pending.is_empty() && !self.shared.fault.is_set() {
            playout = self
                .shared
                .changed
                .wait_timeout(playout, IDLE_WAIT)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl Drop for QueuedClockOutput {
    fn drop(&mut self) {
        self.shared.alive.store(false, Ordering::SeqCst);
        self.shared.changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_starts_clear() {
        let fault = Fault::default();
        assert!(!fault.is_set());
        assert!(fault.check().is_ok());
    }

    #[test]
    fn test_fault_keeps_first_failure() {
        let fault = Fault::default();
        fault.record("port unplugged".to_string());
        fault.record("second failure".to_string());
        assert!(fault.is_set());
        match fault.check() {
            Err(SinkError::SendError(message)) => assert_eq!(message, "port unplugged"),
            other => panic!("expected a send error, got {:?}", other),
        }
    }
}
