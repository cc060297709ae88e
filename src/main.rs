use clap::Parser;
use phaselock::{
    cli::{validate_output, Args},
    config::Settings,
    console::run_console,
    listener::ChannelListener,
    logging::{self, LogTarget},
    midi::{ClockSink, QueuedClockOutput, RecordingSink},
    simulator::spawn_simulated_player,
    store::BpmStore,
    ui::StatusDisplay,
    Engine, EngineError, SinkError, Spawner, ThreadSpawner,
};
use std::io;
use std::sync::Arc;
use std::{thread, time::Duration};

const SIMULATED_DEVICE: u8 = 1;
const NULL_OUTPUT_HISTORY: usize = 1024;

fn main() {
    let args = Args::parse();
    initialize_logging(&args);

    if args.list_outputs {
        list_outputs();
        return;
    }

    match run(args) {
        Ok(()) => log::info!("Application exiting"),
        Err(e) => exit_with_error(&e.to_string()),
    }
}

fn initialize_logging(args: &Args) {
    let target = if args.log_stderr {
        LogTarget::Stderr
    } else {
        LogTarget::File
    };
    if let Err(e) = logging::init_logger(target) {
        eprintln!("Logger initialization failed: {}", e);
    }
    log::info!("Application starting");
}

fn list_outputs() {
    match QueuedClockOutput::list_ports("phaselock") {
        Ok(ports) => {
            println!("Available MIDI outputs:");
            for port in ports {
                println!("  - {}", port);
            }
        }
        Err(e) => exit_with_error(&e.to_string()),
    }
}

fn exit_with_error(message: &str) -> ! {
    log::error!("{}", message);
    eprintln!("{}", message);
    std::process::exit(1);
}

fn run(args: Args) -> Result<(), EngineError> {
    let mut settings = Settings::load(&args)?;
    if settings.load_bpm {
        load_saved_bpm(&mut settings);
    }

    let sink = open_sink(&settings)?;
    let engine = Arc::new(Engine::new(&settings, sink));
    let spawner = ThreadSpawner::new();

    let display = settings.display.then(|| {
        let (listener, notifications) = ChannelListener::bounded(256);
        engine.add_listener(Arc::new(listener));
        StatusDisplay::new(engine.clone(), notifications)
    });

    engine.launch(&spawner)?;
    if let Some(display) = display {
        if let Err(e) = spawner.spawn("status-display", move || display.run()) {
            log::warn!("Status display unavailable: {}", e);
        }
    }
    start_inputs(&settings, &engine, &spawner);

    if settings.auto_start {
        engine.start();
    }

    run_application_loop(&engine);
    if engine.has_failed() {
        return Err(EngineError::Sink(SinkError::SendError(
            "clock output failed".to_string(),
        )));
    }
    Ok(())
}

fn load_saved_bpm(settings: &mut Settings) {
    let store = BpmStore::new(&settings.bpm_file);
    match store.load() {
        Ok(Some(bpm)) if bpm > 0.0 => {
            log::info!("Loaded {} bpm from {}", bpm, store.path().display());
            settings.bpm = bpm;
        }
        Ok(_) => log::info!("No usable saved bpm in {}", store.path().display()),
        Err(e) => log::warn!("Could not load saved bpm: {}", e),
    }
}

fn open_sink(settings: &Settings) -> Result<Arc<dyn ClockSink>, EngineError> {
    if settings.null_output {
        log::info!("Clock output disabled");
        return Ok(Arc::new(RecordingSink::with_limit(NULL_OUTPUT_HISTORY)));
    }

    if let Some(name) = &settings.midi_output {
        let ports = QueuedClockOutput::list_ports(&settings.client_name)?;
        if let Err(error_msg) = validate_output(name, &ports) {
            exit_with_error(&error_msg);
        }
    }

    let output =
        QueuedClockOutput::connect(&settings.client_name, settings.midi_output.as_deref())?;
    log::info!("Sending clock to {}", output.port_name());
    println!("Sending clock to {}", output.port_name());
    Ok(Arc::new(output))
}

/// Starts the optional input threads. Failing to start one is not fatal.
fn start_inputs<S: Spawner>(settings: &Settings, engine: &Arc<Engine>, spawner: &S) {
    match settings.simulate_bpm {
        Some(bpm) => {
            if let Err(e) = spawn_simulated_player(engine, SIMULATED_DEVICE, bpm, spawner) {
                log::warn!("Simulator unavailable: {}", e);
            }
        }
        None => log::info!("No device event source, running as a free clock"),
    }

    if settings.console {
        let console_engine = engine.clone();
        if let Err(e) = spawner.spawn("console", move || {
            run_console(console_engine, io::stdin().lock())
        }) {
            log::warn!("Console unavailable: {}", e);
        }
    }
}

fn run_application_loop(engine: &Engine) {
    log::info!("Application running. Press Ctrl+C to exit...");
    while engine.is_running() {
        thread::sleep(Duration::from_millis(100));
    }
}
