//! The clock scheduler: keeps the sink's pulse queue topped up a fraction of
//! a beat ahead of real time.

use crate::beat_lock::Gate;
use crate::config::{PPQ, PULSES_PER_BATCH, RESTART_QUANTUM, TICKS_PER_CLOCK};
use crate::listener::{Listeners, TransportEvent};
use crate::midi::{ClockSink, SinkError};
use crate::state::SequencerState;
use crate::timing::{batch_sleep, bpm_to_micros, now_micros};
use log::{debug, error, info, trace};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const PAUSE_POLL: Duration = Duration::from_millis(10);

pub struct ClockScheduler {
    state: Arc<SequencerState>,
    sink: Arc<dyn ClockSink>,
    gate: Arc<Gate>,
    listeners: Arc<Listeners>,
    pulses_per_batch: u32,
    sync_output: bool,
}

impl ClockScheduler {
    pub fn new(
        state: Arc<SequencerState>,
        sink: Arc<dyn ClockSink>,
        gate: Arc<Gate>,
        listeners: Arc<Listeners>,
    ) -> Self {
        ClockScheduler {
            state,
            sink,
            gate,
            listeners,
            pulses_per_batch: PULSES_PER_BATCH,
            sync_output: false,
        }
    }

    pub fn with_batch(mut self, pulses: u32) -> Self {
        self.pulses_per_batch = pulses.max(1);
        self
    }

    /// Wait for the sink to drain instead of sleeping between refills.
    pub fn with_sync_output(mut self, sync_output: bool) -> Self {
        self.sync_output = sync_output;
        self
    }

    /// Runs until the `running` flag clears. A sink error ends the loop and
    /// is returned.
    pub fn run(&self) -> Result<(), SinkError> {
        info!(
            "Clock scheduler started, {} pulses per refill",
            self.pulses_per_batch
        );
        let result = self.run_loop();
        match &result {
            Ok(()) => info!("Clock scheduler stopped"),
            Err(e) => error!("Clock scheduler failed: {}", e),
        }
        result
    }

    fn run_loop(&self) -> Result<(), SinkError> {
        self.sink
            .set_tempo(bpm_to_micros(self.state.effective_bpm()))?;

        let mut halted = true;
        while self.state.is_running() {
            if self.state.is_paused() || self.gate.is_closed() {
                if !halted {
                    self.halt()?;
                    halted = true;
                }
                if self.state.is_paused() {
                    thread::sleep(PAUSE_POLL);
                } else {
                    debug!("Clock frozen at the gate");
                    self.gate
                        .wait_open(|| self.state.is_running() && !self.state.is_paused());
                }
                continue;
            }

            if halted {
                self.resume()?;
                halted = false;
            } else if self.state.restart_pending() && self.state.tick() % RESTART_QUANTUM == 0 {
                self.restart()?;
            }

            self.queue_batch()?;
            self.pace();
        }

        if !halted {
            self.sink.stop()?;
        }
        Ok(())
    }

    /// Restarts from the top of the cycle. A restart that was waiting for a
    /// boundary is no longer needed.
    fn resume(&self) -> Result<(), SinkError> {
        self.state.set_tick(0);
        self.state.clear_restart();
        self.sink.start()?;
        info!("Clock started");
        self.listeners.transport(TransportEvent::Started);
        Ok(())
    }

    fn halt(&self) -> Result<(), SinkError> {
        self.sink.stop()?;
        self.state.clear_local_beat();
        info!("Clock stopped at tick {}", self.state.tick());
        self.listeners.transport(TransportEvent::Stopped);
        Ok(())
    }

    fn restart(&self) -> Result<(), SinkError> {
        self.sink.stop()?;
        self.state.set_tick(0);
        self.sink.start()?;
        self.state.clear_restart();
        info!("Quantized restart");
        self.listeners.transport(TransportEvent::Restarted);
        Ok(())
    }

    /// Queues one batch of pulses from the current tick. The tick observers
    /// run once the first pulse is already queued.
    fn queue_batch(&self) -> Result<(), SinkError> {
        let batch_start = self.state.tick();
        if batch_start % PPQ == 0 {
            self.state.mark_local_beat(now_micros());
        }

        self.sink.clock(batch_start)?;
        self.listeners.tick(batch_start);
        for pulse in 1..self.pulses_per_batch {
            self.sink
                .clock(batch_start.wrapping_add(pulse * TICKS_PER_CLOCK))?;
        }
        self.sink.flush()?;

        let next = batch_start.wrapping_add(self.pulses_per_batch * TICKS_PER_CLOCK);
        self.state.set_tick(next);
        trace!("Queued ticks {}..{}", batch_start, next);
        Ok(())
    }

    fn pace(&self) {
        if self.sync_output {
            self.sink.wait_drained();
            return;
        }
        let deficit = i64::from(self.pulses_per_batch) - self.sink.queued() as i64;
        if deficit > 0 {
            trace!("Sink is {} pulses short, shortening sleep", deficit);
        }
        thread::sleep(batch_sleep(
            self.state.effective_bpm(),
            self.pulses_per_batch,
            deficit,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::{RecordingSink, SinkCall};

    fn scheduler(sink: Arc<RecordingSink>) -> (ClockScheduler, Arc<SequencerState>) {
        let state = Arc::new(SequencerState::new(300.0));
        let scheduler = ClockScheduler::new(
            state.clone(),
            sink,
            Arc::new(Gate::new()),
            Arc::new(Listeners::new()),
        );
        (scheduler, state)
    }

    #[test]
    fn test_batch_positions() {
        let sink = Arc::new(RecordingSink::new());
        let (scheduler, state) = scheduler(sink.clone());
        state.set_tick(PPQ);
        scheduler.queue_batch().unwrap();
        assert_eq!(sink.clocks(), vec![96, 100, 104, 108, 112, 116]);
        assert_eq!(state.tick(), 120);
        assert!(state.local_beat().is_some());
    }

    #[test]
    fn test_mid_beat_batch_does_not_mark_beat() {
        let sink = Arc::new(RecordingSink::new());
        let (scheduler, state) = scheduler(sink);
        state.set_tick(24);
        scheduler.queue_batch().unwrap();
        assert_eq!(state.local_beat(), None);
    }

    #[test]
    fn test_sink_error_is_fatal() {
        let sink = Arc::new(RecordingSink::failing_after(8));
        let (scheduler, state) = scheduler(sink.clone());
        state.set_running(true);
        state.set_paused(false);
        assert!(scheduler.run().is_err());
        assert_eq!(sink.clocks().len(), 8);
        assert_eq!(sink.calls().first(), Some(&SinkCall::Tempo(200_000)));
    }
}
