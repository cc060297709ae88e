use crate::engine::Engine;
use crate::event_loop::{DeviceEvent, EventLoop};
use crate::threads::Spawner;
use crate::timing::{now_micros, one_beat};
use crossbeam::channel::{self, Sender};
use log::{debug, info};
use std::io;
use std::sync::Arc;
use std::thread;

const EVENT_QUEUE: usize = 1024;

/// Feeds a simulated player into `engine`: one thread plays the device, a
/// second drains its events through an [`EventLoop`]. Both stop with the
/// engine.
pub fn spawn_simulated_player<S: Spawner>(
    engine: &Arc<Engine>,
    device: u8,
    bpm: f32,
    spawner: &S,
) -> io::Result<()> {
    let (tx, rx) = channel::bounded::<DeviceEvent>(EVENT_QUEUE);
    let event_loop = EventLoop::new(engine.clone(), rx);
    spawner.spawn("device-events", move || event_loop.run())?;

    let simulator = Simulator::new(device, bpm, tx);
    let sim_engine = engine.clone();
    spawner.spawn("simulator", move || {
        simulator.run(|| sim_engine.is_running())
    })
}

/// A single pretend player on the network, for running without hardware.
///
/// Announces itself, reports as master, then sends a beat every beat at a
/// fixed tempo, stamped on send like a real receiver would stamp arrivals.
pub struct Simulator {
    device: u8,
    bpm: f32,
    tx: Sender<DeviceEvent>,
}

impl Simulator {
    pub fn new(device: u8, bpm: f32, tx: Sender<DeviceEvent>) -> Self {
        Simulator { device, bpm, tx }
    }

    /// Blocks the calling thread until `keep_running` turns false or the
    /// receiving side goes away.
    pub fn run(&self, keep_running: impl Fn() -> bool) {
        info!("Simulating player {} at {} bpm", self.device, self.bpm);
        let beat = one_beat(self.bpm);
        if beat.is_zero() {
            return;
        }

        let intro = [
            DeviceEvent::Discovery {
                device: self.device,
            },
            self.status(),
        ];
        for event in intro {
            if self.tx.send(event).is_err() {
                return;
            }
        }

        let mut bar_position = 1u8;
        while keep_running() {
            let event = DeviceEvent::Beat {
                device: self.device,
                bar_position,
                bpm: self.bpm,
                timestamp_us: now_micros(),
            };
            if self.tx.send(event).is_err() {
                break;
            }
            if bar_position == 1 && self.tx.send(self.status()).is_err() {
                break;
            }
            bar_position = bar_position % 4 + 1;
            thread::sleep(beat);
        }
        debug!("Simulated player {} stopped", self.device);
    }

    fn status(&self) -> DeviceEvent {
        DeviceEvent::Status {
            device: self.device,
            bpm: self.bpm,
            is_master: true,
        }
    }
}
