use crossbeam::channel::Receiver;
use phaselock::beat_lock::Gate;
use phaselock::config::{RESTART_QUANTUM, TICKS_PER_QUARTER_BEAT};
use phaselock::listener::{ChannelListener, Listeners, Notification, TransportEvent};
use phaselock::midi::{RecordingSink, SinkCall};
use phaselock::scheduler::ClockScheduler;
use phaselock::state::SequencerState;
use phaselock::SinkError;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

// a quarter beat is 12.5 ms at this tempo
const FAST_BPM: f32 = 1200.0;

struct Running {
    state: Arc<SequencerState>,
    sink: Arc<RecordingSink>,
    gate: Arc<Gate>,
    notifications: Receiver<Notification>,
    handle: JoinHandle<Result<(), SinkError>>,
}

impl Running {
    fn quit(self) -> Result<(), SinkError> {
        self.state.set_running(false);
        self.handle.join().unwrap()
    }

    fn wait_for(&self, event: TransportEvent) -> bool {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while std::time::Instant::now() < deadline {
            if let Ok(Notification::Transport(e)) =
                self.notifications.recv_timeout(Duration::from_millis(50))
            {
                if e == event {
                    return true;
                }
            }
        }
        false
    }
}

fn spawn_scheduler(paused: bool) -> Running {
    spawn_configured(paused, RecordingSink::new(), |scheduler| scheduler)
}

fn spawn_configured(
    paused: bool,
    sink: RecordingSink,
    configure: impl FnOnce(ClockScheduler) -> ClockScheduler,
) -> Running {
    let _ = env_logger::builder().is_test(true).try_init();
    let state = Arc::new(SequencerState::new(FAST_BPM));
    let sink = Arc::new(sink);
    let gate = Arc::new(Gate::new());
    let listeners = Arc::new(Listeners::new());
    let (listener, notifications) = ChannelListener::bounded(4096);
    listeners.add(Arc::new(listener));

    state.set_running(true);
    state.set_paused(paused);
    let scheduler = configure(ClockScheduler::new(
        state.clone(),
        sink.clone(),
        gate.clone(),
        listeners,
    ));
    let handle = thread::spawn(move || scheduler.run());

    Running {
        state,
        sink,
        gate,
        notifications,
        handle,
    }
}

#[test]
fn test_paused_scheduler_only_sets_tempo() {
    let running = spawn_scheduler(true);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(running.sink.calls(), vec![SinkCall::Tempo(50_000)]);
    assert!(running.quit().is_ok());
}

#[test]
fn test_start_and_stop() {
    let running = spawn_scheduler(true);
    running.state.set_paused(false);
    assert!(running.wait_for(TransportEvent::Started));
    thread::sleep(Duration::from_millis(100));

    let clocks = running.sink.clocks();
    assert!(clocks.len() >= 12);
    assert_eq!(&clocks[..6], &[0, 4, 8, 12, 16, 20]);
    assert_eq!(running.sink.calls()[1], SinkCall::Start);

    running.state.set_paused(true);
    assert!(running.wait_for(TransportEvent::Stopped));
    assert_eq!(running.sink.calls().last(), Some(&SinkCall::Stop));

    // paused means no more pulses
    let count = running.sink.clocks().len();
    thread::sleep(Duration::from_millis(60));
    assert_eq!(running.sink.clocks().len(), count);
    assert!(running.quit().is_ok());
}

#[test]
fn test_resume_starts_from_top() {
    let running = spawn_scheduler(false);
    assert!(running.wait_for(TransportEvent::Started));
    thread::sleep(Duration::from_millis(60));
    running.state.set_paused(true);
    assert!(running.wait_for(TransportEvent::Stopped));
    assert!(running.state.tick() > 0);

    running.sink.clear();
    running.state.set_paused(false);
    assert!(running.wait_for(TransportEvent::Started));
    thread::sleep(Duration::from_millis(20));
    let calls = running.sink.calls();
    assert_eq!(calls[0], SinkCall::Start);
    assert_eq!(calls[1], SinkCall::Clock(0));
    assert!(running.quit().is_ok());
}

#[test]
fn test_tick_observer_sees_batch_starts() {
    let running = spawn_scheduler(false);
    thread::sleep(Duration::from_millis(120));
    let ticks: Vec<u32> = running
        .notifications
        .try_iter()
        .filter_map(|n| match n {
            Notification::Tick(tick) => Some(tick),
            _ => None,
        })
        .collect();
    assert!(ticks.len() >= 4);
    assert_eq!(ticks[0], 0);
    for pair in ticks.windows(2) {
        assert_eq!(pair[1] - pair[0], TICKS_PER_QUARTER_BEAT);
    }
    assert!(running.quit().is_ok());
}

#[test]
fn test_quantized_restart_waits_for_boundary() {
    let running = spawn_scheduler(false);
    assert!(running.wait_for(TransportEvent::Started));
    thread::sleep(Duration::from_millis(60));
    assert!(running.state.tick() < RESTART_QUANTUM);

    running.state.request_restart();
    assert!(running.wait_for(TransportEvent::Restarted));
    assert!(!running.state.restart_pending());

    let calls = running.sink.calls();
    let stop = calls
        .iter()
        .position(|c| *c == SinkCall::Stop)
        .expect("restart sends stop");
    assert_eq!(calls[stop - 1], SinkCall::Clock(RESTART_QUANTUM - 4));
    assert_eq!(calls[stop + 1], SinkCall::Start);
    assert!(running.quit().is_ok());
}

#[test]
fn test_closed_gate_freezes_until_opened() {
    let running = spawn_scheduler(false);
    assert!(running.wait_for(TransportEvent::Started));

    running.gate.close();
    assert!(running.wait_for(TransportEvent::Stopped));
    let count = running.sink.clocks().len();
    thread::sleep(Duration::from_millis(60));
    assert_eq!(running.sink.clocks().len(), count);

    running.sink.clear();
    running.gate.open();
    assert!(running.wait_for(TransportEvent::Started));
    thread::sleep(Duration::from_millis(20));
    let calls = running.sink.calls();
    assert_eq!(calls[0], SinkCall::Start);
    assert_eq!(calls[1], SinkCall::Clock(0));
    assert!(running.quit().is_ok());
}

#[test]
fn test_local_beat_is_recorded() {
    let running = spawn_scheduler(false);
    assert!(running.wait_for(TransportEvent::Started));
    thread::sleep(Duration::from_millis(30));
    assert!(running.state.local_beat().is_some());
    assert!(running.quit().is_ok());
}

#[test]
fn test_failing_sink_ends_the_loop() {
    let _ = env_logger::builder().is_test(true).try_init();
    let state = Arc::new(SequencerState::new(FAST_BPM));
    state.set_running(true);
    state.set_paused(false);
    let scheduler = ClockScheduler::new(
        state.clone(),
        Arc::new(RecordingSink::failing_after(30)),
        Arc::new(Gate::new()),
        Arc::new(Listeners::new()),
    );
    let result = thread::spawn(move || scheduler.run()).join().unwrap();
    assert!(matches!(result, Err(SinkError::SendError(_))));
}

#[test]
fn test_short_backlog_speeds_up_refills() {
    let nominal = spawn_scheduler(false);
    let behind = spawn_scheduler(false);
    // half a batch missing halves the sleep between refills
    behind.sink.set_backlog(3);

    thread::sleep(Duration::from_millis(250));
    let nominal_clocks = nominal.sink.clocks().len();
    let behind_clocks = behind.sink.clocks().len();
    assert!(nominal.quit().is_ok());
    assert!(behind.quit().is_ok());

    assert!(nominal_clocks >= 6 * 8);
    assert!(
        behind_clocks * 2 > nominal_clocks * 3,
        "{} clocks behind vs {} nominal",
        behind_clocks,
        nominal_clocks
    );
}

#[test]
fn test_sync_output_waits_for_the_sink() {
    let running = spawn_configured(false, RecordingSink::new(), |scheduler| {
        scheduler.with_sync_output(true)
    });
    assert!(running.wait_for(TransportEvent::Started));
    thread::sleep(Duration::from_millis(100));
    let tick = running.state.tick();
    assert!(running.quit().is_ok());

    // a batch drains in 12.5 ms, so roughly eight batches in 100 ms
    assert!(tick >= 4 * TICKS_PER_QUARTER_BEAT, "tick {}", tick);
    assert!(tick <= 20 * TICKS_PER_QUARTER_BEAT, "tick {}", tick);
}
