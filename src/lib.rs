pub mod beat_lock;
pub mod cli;
pub mod config;
pub mod console;
pub mod devices;
pub mod diff;
pub mod engine;
pub mod event_loop;
pub mod listener;
pub mod logging;
pub mod midi;
pub mod scheduler;
pub mod simulator;
pub mod state;
pub mod store;
pub mod sync;
pub mod tap;
pub mod tempo;
pub mod threads;
pub mod timing;
pub mod ui;

pub use engine::{Engine, EngineError};
pub use event_loop::{DeviceEvent, EventLoop};
pub use listener::{Listener, Listeners};
pub use midi::{ClockSink, SinkError};
pub use threads::{Spawner, ThreadSpawner};
