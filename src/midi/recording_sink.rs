use super::{ClockSink, Result, SinkError};
use crate::config::{CLOCKS_PER_BEAT, DEFAULT_BPM, PULSES_PER_BATCH};
use crate::timing::bpm_to_micros;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

/// A call made on a [`RecordingSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkCall {
    Start,
    Stop,
    Clock(u32),
    Tempo(u32),
}

/// Clock sink that keeps a log of what it was asked to do.
///
/// The reported backlog defaults to one full batch, which paces a scheduler
/// at the nominal refill rate. Draining takes as long as playing the backlog
/// at the last tempo set. Used by tests and by `--null-output`.
pub struct RecordingSink {
    calls: Mutex<VecDeque<SinkCall>>,
    limit: Option<usize>,
    backlog: AtomicUsize,
    clocks_allowed: Option<usize>,
    clocks_sent: AtomicUsize,
    micros_per_beat: AtomicU32,
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingSink {
    pub fn new() -> Self {
        RecordingSink {
            calls: Mutex::new(VecDeque::new()),
            limit: None,
            backlog: AtomicUsize::new(PULSES_PER_BATCH as usize),
            clocks_allowed: None,
            clocks_sent: AtomicUsize::new(0),
            micros_per_beat: AtomicU32::new(bpm_to_micros(DEFAULT_BPM)),
        }
    }

    /// Keeps only the most recent `limit` calls.
    pub fn with_limit(limit: usize) -> Self {
        RecordingSink {
            limit: Some(limit),
            ..Self::new()
        }
    }

    /// Accepts `allowed` clock pulses, then fails every further one.
    pub fn failing_after(allowed: usize) -> Self {
        RecordingSink {
            clocks_allowed: Some(allowed),
            ..Self::new()
        }
    }

    pub fn set_backlog(&self, pulses: usize) {
        self.backlog.store(pulses, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }

    pub fn clear(&self) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn count(&self, call: SinkCall) -> usize {
        self.calls().iter().filter(|c| **c == call).count()
    }

    pub fn clocks(&self) -> Vec<u32> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                SinkCall::Clock(tick) => Some(tick),
                _ => None,
            })
            .collect()
    }

    pub fn tempos(&self) -> Vec<u32> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                SinkCall::Tempo(micros) => Some(micros),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: SinkCall) {
        let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        calls.push_back(call);
        if let Some(limit) = self.limit {
            while calls.len() > limit {
                calls.pop_front();
            }
        }
    }
}

impl ClockSink for RecordingSink {
    fn start(&self) -> Result<()> {
        self.record(SinkCall::Start);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.record(SinkCall::Stop);
        Ok(())
    }

    fn clock(&self, tick: u32) -> Result<()> {
        let sent = self.clocks_sent.fetch_add(1, Ordering::SeqCst);
        if let Some(allowed) = self.clocks_allowed {
            if sent >= allowed {
                return Err(SinkError::SendError("output went away".to_string()));
            }
        }
        self.record(SinkCall::Clock(tick));
        Ok(())
    }

    fn set_tempo(&self, micros_per_beat: u32) -> Result<()> {
        self.micros_per_beat.store(micros_per_beat, Ordering::SeqCst);
        self.record(SinkCall::Tempo(micros_per_beat));
        Ok(())
    }

    fn queued(&self) -> usize {
        self.backlog.load(Ordering::SeqCst)
    }

    fn wait_drained(&self) {
        thread::sleep(self.drain_time());
    }
}

impl RecordingSink {
    /// Time a real output would need to play the reported backlog. Never
    /// less than one pulse, so a drain-paced scheduler cannot spin.
    pub fn drain_time(&self) -> Duration {
        let pulses = self.queued().max(1) as u64;
        let beat_micros = u64::from(self.micros_per_beat.load(Ordering::SeqCst));
        Duration::from_micros(beat_micros.saturating_mul(pulses) / u64::from(CLOCKS_PER_BEAT))
    }
}
