//! MIDI clock output for phaselock
//!
//! The scheduler talks to a [`ClockSink`], which owns a queue of clock pulses
//! positioned in scheduler ticks and plays them out at the current tempo.
//!
//! - [`QueuedClockOutput`] plays the queue to a real MIDI port via midir
//! - [`RecordingSink`] records every call, for tests and headless runs
//!
mod queued_output;
mod recording_sink;

use std::error::Error;
use std::fmt;

pub use queued_output::QueuedClockOutput;
pub use recording_sink::{RecordingSink, SinkCall};

/// MIDI real-time status bytes
pub const CLOCK: u8 = 0xF8;
pub const START: u8 = 0xFA;
pub const STOP: u8 = 0xFC;

/// Custom error type for clock output
#[derive(Debug)]
pub enum SinkError {
    /// Error when opening or connecting the output port
    ConnectionError(String),
    /// Error when sending to a connected port
    SendError(String),
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::ConnectionError(msg) => write!(f, "MIDI connection error: {}", msg),
            SinkError::SendError(msg) => write!(f, "MIDI send error: {}", msg),
        }
    }
}

impl Error for SinkError {}

/// Result type for clock output operations
pub type Result<T> = std::result::Result<T, SinkError>;

/// Destination of the generated clock.
///
/// Ticks are absolute queue positions at `PPQ` ticks per beat, counted from
/// the last `start()`. Implementations are shared between the scheduler and
/// the tempo executor, so every method takes `&self`.
pub trait ClockSink: Send + Sync {
    /// Clears the queue, restarts the queue position at tick 0 and sends START.
    fn start(&self) -> Result<()>;

    /// Clears the queue and sends STOP.
    fn stop(&self) -> Result<()>;

    /// Queues a clock pulse to play at `tick`.
    fn clock(&self, tick: u32) -> Result<()>;

    /// Changes the playout tempo from the current queue position on.
    fn set_tempo(&self, micros_per_beat: u32) -> Result<()>;

    /// Pushes queued pulses towards the device.
    fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Pulses queued but not yet played.
    fn queued(&self) -> usize;

    /// Blocks until the queue has played out.
    fn wait_drained(&self) {}
}
