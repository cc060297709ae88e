// event_loop.rs

use crate::engine::Engine;
use crossbeam::channel::{Receiver, RecvTimeoutError};
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;

const RECV_TIMEOUT: Duration = Duration::from_millis(50);

/// A decoded message from an external device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeviceEvent {
    /// The device announced itself on the network.
    Discovery { device: u8 },
    Status { device: u8, bpm: f32, is_master: bool },
    /// A beat, stamped with [`crate::timing::now_micros`] on arrival.
    Beat {
        device: u8,
        bar_position: u8,
        bpm: f32,
        timestamp_us: u64,
    },
}

/// Drains device events into the engine. This is the only thread that
/// writes per-device diff and tempo state.
pub struct EventLoop {
    engine: Arc<Engine>,
    events: Receiver<DeviceEvent>,
}

impl EventLoop {
    pub fn new(engine: Arc<Engine>, events: Receiver<DeviceEvent>) -> Self {
        EventLoop { engine, events }
    }

    pub fn run(&self) {
        info!("Device event loop started");
        while self.engine.is_running() {
            match self.events.recv_timeout(RECV_TIMEOUT) {
                Ok(event) => {
                    debug!("Device event: {:?}", event);
                    self.engine.handle_event(&event);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    info!("Device event source closed");
                    break;
                }
            }
        }
        info!("Device event loop stopped");
    }
}
