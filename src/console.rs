//! Line based command console.
//!
//! Each line is one command; an empty line toggles the transport.

use crate::engine::Engine;
use log::{info, warn};
use std::io::BufRead;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Start,
    Stop,
    Toggle,
    Nudge(i32),
    NudgeMillis(i32),
    SetTempo(f32),
    AdjustTempo(f32),
    Restart,
    Trigger(u8),
    Lock { device: u8, use_default: bool },
    Release,
    Offset(i32),
    MasterFollow(bool),
    TempoFollow(bool),
    Copy(u8),
    TrackStart(u8),
    Tap,
    Save,
    Quit,
}

fn switch(word: &str) -> Option<bool> {
    match word {
        "on" => Some(true),
        "off" => Some(false),
        _ => None,
    }
}

pub fn parse_command(line: &str) -> Option<Command> {
    let mut words = line.split_whitespace();
    let Some(name) = words.next() else {
        return Some(Command::Toggle);
    };
    let arg = words.next();
    if words.next().is_some() {
        return None;
    }

    let command = match (name, arg) {
        ("start", None) => Command::Start,
        ("stop", None) => Command::Stop,
        ("toggle", None) => Command::Toggle,
        ("restart", None) => Command::Restart,
        ("release", None) => Command::Release,
        ("tap", None) => Command::Tap,
        ("save", None) => Command::Save,
        ("quit" | "exit", None) => Command::Quit,
        ("nudge", Some(n)) => Command::Nudge(n.parse().ok()?),
        ("nudge-ms", Some(ms)) => Command::NudgeMillis(ms.parse().ok()?),
        ("bpm", Some(bpm)) => Command::SetTempo(bpm.parse().ok()?),
        ("adjust", Some(delta)) => Command::AdjustTempo(delta.parse().ok()?),
        ("trigger", Some(id)) => Command::Trigger(id.parse().ok()?),
        ("lock", Some(id)) => Command::Lock {
            device: id.parse().ok()?,
            use_default: false,
        },
        ("lock-default", Some(id)) => Command::Lock {
            device: id.parse().ok()?,
            use_default: true,
        },
        ("offset", Some(ms)) => Command::Offset(ms.parse().ok()?),
        ("master", Some(s)) => Command::MasterFollow(switch(s)?),
        ("follow", Some(s)) => Command::TempoFollow(switch(s)?),
        ("copy", Some(id)) => Command::Copy(id.parse().ok()?),
        ("track", Some(id)) => Command::TrackStart(id.parse().ok()?),
        _ => return None,
    };
    Some(command)
}

/// Runs one command. Setting a tempo by hand ends any difflock.
pub fn dispatch(engine: &Engine, command: Command) {
    match command {
        Command::Start => engine.start(),
        Command::Stop => engine.stop(),
        Command::Toggle => engine.toggle(),
        Command::Nudge(n) => engine.nudge(n),
        Command::NudgeMillis(ms) => engine.nudge_millis(ms),
        Command::SetTempo(bpm) => {
            engine.release();
            engine.set_tempo(bpm);
        }
        Command::AdjustTempo(delta) => engine.adjust_tempo(delta),
        Command::Restart => engine.quantized_restart(),
        Command::Trigger(device) => engine.trigger_from_player(device),
        Command::Lock {
            device,
            use_default,
        } => {
            if !engine.lock(device, use_default) {
                warn!("Cannot lock to unknown device {}", device);
            }
        }
        Command::Release => engine.release(),
        Command::Offset(ms) => {
            engine.nudge_offset(ms);
        }
        Command::MasterFollow(on) => engine.set_master_follow(on),
        Command::TempoFollow(on) => engine.set_tempo_follow(on),
        Command::Copy(device) => {
            engine.release();
            engine.copy_bpm(device);
        }
        Command::TrackStart(device) => engine.mark_track_start(device),
        Command::Tap => {
            engine.tap();
        }
        Command::Save => {
            if let Err(e) = engine.save_bpm() {
                warn!("Could not save bpm: {}", e);
            }
        }
        Command::Quit => engine.quit(),
    }
}

/// Reads commands until end of input or quit.
pub fn run_console<R: BufRead>(engine: Arc<Engine>, input: R) {
    info!("Console started");
    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("Console input failed: {}", e);
                break;
            }
        };
        match parse_command(&line) {
            Some(command) => dispatch(&engine, command),
            None => warn!("Unknown command: {}", line.trim()),
        }
        if !engine.is_running() {
            break;
        }
    }
    info!("Console stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        let cases = [
            ("", Command::Toggle),
            ("start", Command::Start),
            ("stop", Command::Stop),
            ("toggle", Command::Toggle),
            ("nudge -3", Command::Nudge(-3)),
            ("nudge-ms 5", Command::NudgeMillis(5)),
            ("bpm 128.5", Command::SetTempo(128.5)),
            ("adjust -0.5", Command::AdjustTempo(-0.5)),
            ("restart", Command::Restart),
            ("trigger 3", Command::Trigger(3)),
            (
                "lock 2",
                Command::Lock {
                    device: 2,
                    use_default: false,
                },
            ),
            (
                "lock-default 2",
                Command::Lock {
                    device: 2,
                    use_default: true,
                },
            ),
            ("release", Command::Release),
            ("offset -2", Command::Offset(-2)),
            ("master on", Command::MasterFollow(true)),
            ("follow off", Command::TempoFollow(false)),
            ("copy 4", Command::Copy(4)),
            ("track 1", Command::TrackStart(1)),
            ("tap", Command::Tap),
            ("save", Command::Save),
            ("  quit  ", Command::Quit),
        ];
        for (line, expected) in cases {
            assert_eq!(parse_command(line), Some(expected), "parsing {:?}", line);
        }
    }

    #[test]
    fn test_reject_bad_commands() {
        for line in ["warp", "bpm", "bpm fast", "start now", "master maybe", "lock 300"] {
            assert_eq!(parse_command(line), None, "parsing {:?}", line);
        }
    }
}
