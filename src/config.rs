// config.rs

use crate::cli::Args;
use ::config::{Config, ConfigError, Environment, File};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};

/// Scheduler ticks per beat.
pub const PPQ: u32 = 96;
/// MIDI clock pulses per beat, fixed by the MIDI standard.
pub const CLOCKS_PER_BEAT: u32 = 24;
/// Scheduler ticks between two clock pulses.
pub const TICKS_PER_CLOCK: u32 = PPQ / CLOCKS_PER_BEAT;
/// A quarter beat, the unit the tick observer and the display work in.
pub const TICKS_PER_QUARTER_BEAT: u32 = PPQ / 4;
pub const BEATS_PER_BAR: u32 = 4;
/// Boundary a quantized restart waits for.
pub const RESTART_QUANTUM: u32 = PPQ * 4 * BEATS_PER_BAR;

/// Fraction of a beat queued ahead on every refill cycle.
pub const BEATS_QUEUED: f64 = 0.25;
pub const PULSES_PER_BATCH: u32 = 6;

/// Device ids are 1..=MAX_DEVICES.
pub const MAX_DEVICES: usize = 32;
pub const DIFF_WINDOW: usize = 4;
pub const DIFF_LIMIT_MS: i32 = 20;

pub const DEFAULT_BPM: f32 = 120.0;
pub const MIN_BPM: f32 = 20.0;
pub const MAX_BPM: f32 = 300.0;

pub const DEFAULT_CONFIG_FILE: &str = "/etc/phaselock.toml";
pub const DEFAULT_BPM_FILE: &str = "/var/tmp/phaselock-bpm";
pub const ENV_PREFIX: &str = "PHASELOCK";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub bpm: f32,
    pub auto_start: bool,
    pub client_name: String,
    pub midi_output: Option<String>,
    pub null_output: bool,
    pub sync_output: bool,
    pub beats_queued: f64,
    pub default_offset_ms: i32,
    pub bpm_file: PathBuf,
    pub load_bpm: bool,
    pub console: bool,
    pub display: bool,
    pub simulate_bpm: Option<f32>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            bpm: DEFAULT_BPM,
            auto_start: false,
            client_name: "phaselock".to_string(),
            midi_output: None,
            null_output: false,
            sync_output: false,
            beats_queued: BEATS_QUEUED,
            default_offset_ms: 0,
            bpm_file: PathBuf::from(DEFAULT_BPM_FILE),
            load_bpm: false,
            console: false,
            display: true,
            simulate_bpm: None,
        }
    }
}

// Missing keys fall back to defaults, anything else is a real error
fn optional<T>(value: Result<T, ConfigError>) -> Result<Option<T>, ConfigError> {
    match value {
        Ok(v) => Ok(Some(v)),
        Err(ConfigError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

impl Settings {
    /// Reads the config file and `PHASELOCK_*` environment, then lets the
    /// command line override both.
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let path = args
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        let source = Self::read_sources(&path, args.config.is_some())?;
        let mut settings = Self::from_config(&source)?;
        settings.apply_args(args);
        info!("Effective settings: {:?}", settings);
        Ok(settings)
    }

    fn read_sources(path: &Path, required: bool) -> Result<Config, ConfigError> {
        debug!("Reading configuration from {}", path.display());
        Config::builder()
            .add_source(File::from(path).required(required))
            .add_source(Environment::with_prefix(ENV_PREFIX))
            .build()
    }

    pub fn from_config(source: &Config) -> Result<Self, ConfigError> {
        let mut settings = Settings::default();

        if let Some(bpm) = optional(source.get_float("bpm"))? {
            settings.bpm = bpm as f32;
        }
        if let Some(auto_start) = optional(source.get_bool("auto_start"))? {
            settings.auto_start = auto_start;
        }
        if let Some(name) = optional(source.get_string("client_name"))? {
            settings.client_name = name;
        }
        settings.midi_output = optional(source.get_string("midi_output"))?;
        if let Some(sync) = optional(source.get_bool("sync_output"))? {
            settings.sync_output = sync;
        }
        if let Some(fraction) = optional(source.get_float("beats_queued"))? {
            settings.beats_queued = fraction;
        }
        if let Some(offset) = optional(source.get_int("default_offset"))? {
            settings.default_offset_ms = offset as i32;
        }
        if let Some(file) = optional(source.get_string("bpm_file"))? {
            settings.bpm_file = PathBuf::from(file);
        }
        if let Some(console) = optional(source.get_bool("console"))? {
            settings.console = console;
        }
        if let Some(display) = optional(source.get_bool("display"))? {
            settings.display = display;
        }

        Ok(settings)
    }

    pub fn apply_args(&mut self, args: &Args) {
        if let Some(bpm) = args.bpm {
            self.bpm = bpm;
        }
        if let Some(name) = &args.midi_output {
            self.midi_output = Some(name.clone());
        }
        if let Some(offset) = args.default_offset {
            self.default_offset_ms = offset;
        }
        if let Some(file) = &args.bpm_file {
            self.bpm_file = file.clone();
        }
        self.auto_start |= args.auto_start;
        self.null_output |= args.null_output;
        self.sync_output |= args.sync_output;
        self.load_bpm |= args.load_bpm;
        self.console |= args.console;
        if args.no_display {
            self.display = false;
        }
        if args.simulate.is_some() {
            self.simulate_bpm = args.simulate;
        }
    }

    /// Pulses queued per refill cycle. The batch must divide a beat evenly so
    /// that bar boundaries land on a cycle start.
    pub fn pulses_per_batch(&self) -> u32 {
        let pulses = (f64::from(CLOCKS_PER_BEAT) * self.beats_queued).round() as u32;
        if pulses == 0 || CLOCKS_PER_BEAT % pulses != 0 {
            warn!(
                "beats_queued {} does not divide a beat, using {}",
                self.beats_queued, BEATS_QUEUED
            );
            return PULSES_PER_BATCH;
        }
        pulses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_defaults_from_empty_config() {
        let source = Config::builder().build().unwrap();
        let settings = Settings::from_config(&source).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.pulses_per_batch(), PULSES_PER_BATCH);
    }

    #[test]
    fn test_values_from_config() {
        let source = Config::builder()
            .set_override("bpm", 128.5)
            .unwrap()
            .set_override("default_offset", -3i64)
            .unwrap()
            .set_override("midi_output", "TR-6S")
            .unwrap()
            .set_override("sync_output", true)
            .unwrap()
            .build()
            .unwrap();
        let settings = Settings::from_config(&source).unwrap();
        assert_eq!(settings.bpm, 128.5);
        assert_eq!(settings.default_offset_ms, -3);
        assert_eq!(settings.midi_output.as_deref(), Some("TR-6S"));
        assert!(settings.sync_output);
    }

    #[test]
    fn test_args_override_config() {
        let source = Config::builder()
            .set_override("bpm", 100.0)
            .unwrap()
            .build()
            .unwrap();
        let mut settings = Settings::from_config(&source).unwrap();
        let args = Args::parse_from(["phaselock", "--bpm", "132", "--no-display", "--auto-start"]);
        settings.apply_args(&args);
        assert_eq!(settings.bpm, 132.0);
        assert!(!settings.display);
        assert!(settings.auto_start);
    }

    #[test]
    fn test_uneven_batch_falls_back() {
        let settings = Settings {
            beats_queued: 0.3,
            ..Settings::default()
        };
        assert_eq!(settings.pulses_per_batch(), PULSES_PER_BATCH);

        let settings = Settings {
            beats_queued: 0.5,
            ..Settings::default()
        };
        assert_eq!(settings.pulses_per_batch(), 12);
    }
}
