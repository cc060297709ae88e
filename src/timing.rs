//! Tempo arithmetic and the monotonic clock that device beats are stamped with.

use crate::config::CLOCKS_PER_BEAT;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Microseconds since the first call in this process.
pub fn now_micros() -> u64 {
    EPOCH.get_or_init(Instant::now).elapsed().as_micros() as u64
}

/// Microseconds in a minute / bpm = micros per beat
pub fn bpm_to_micros(bpm: f32) -> u32 {
    if bpm <= 0.0 {
        return u32::MAX;
    }
    (60_000_000.0 / f64::from(bpm)) as u32
}

pub fn micros_to_bpm(micros_per_beat: u64) -> f32 {
    if micros_per_beat == 0 {
        return 0.0;
    }
    (60_000_000.0 / micros_per_beat as f64) as f32
}

pub fn one_beat(bpm: f32) -> Duration {
    if bpm <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_nanos((60_000_000_000.0 / f64::from(bpm)) as u64)
}

/// Tempo applied for one beat by a multiplier nudge. Resolution is 0.1 bpm.
pub fn nudge_bpm(bpm: f32, multiplier: i32) -> f32 {
    (bpm + 0.1 * multiplier as f32).max(0.0)
}

/// Beat length that shifts the clock by `millis` over one beat.
pub fn nudge_micros(bpm: f32, millis: i32) -> u32 {
    let micros = i64::from(bpm_to_micros(bpm)) + i64::from(millis) * 1000;
    micros.clamp(1, i64::from(u32::MAX)) as u32
}

/// Time to sleep between two refills of `pulses` clock pulses.
///
/// When the sink holds fewer than `pulses` unplayed pulses the host missed a
/// wakeup, so every missing pulse takes one pulse length off the sleep.
pub fn batch_sleep(bpm: f32, pulses: u32, deficit: i64) -> Duration {
    if bpm <= 0.0 || pulses == 0 {
        return Duration::ZERO;
    }
    let beats = f64::from(pulses) / f64::from(CLOCKS_PER_BEAT);
    let nominal = (beats * 60_000_000_000.0 / f64::from(bpm)) as u64;
    let reduction = if deficit > 0 {
        (nominal / u64::from(pulses)).saturating_mul(deficit as u64)
    } else {
        0
    };
    Duration::from_nanos(nominal.saturating_sub(reduction))
}

/// Milliseconds between a device beat and the nearest local beat, folded into
/// half a beat either side. Positive means the device beat came after ours.
pub fn phase_diff_ms(local_beat_us: u64, beat_len_us: u64, event_us: u64) -> i32 {
    if beat_len_us == 0 {
        return 0;
    }
    let len = beat_len_us as i64;
    let mut diff = (event_us as i64 - local_beat_us as i64).rem_euclid(len);
    if diff > len / 2 {
        diff -= len;
    }
    (diff / 1000) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bpm_micros_conversion() {
        assert_eq!(bpm_to_micros(120.0), 500_000);
        assert_eq!(bpm_to_micros(0.0), u32::MAX);
        assert!((micros_to_bpm(500_000) - 120.0).abs() < 1e-4);
        assert_eq!(micros_to_bpm(0), 0.0);
    }

    #[test]
    fn test_one_beat() {
        assert_eq!(one_beat(120.0), Duration::from_millis(500));
        assert_eq!(one_beat(0.0), Duration::ZERO);
    }

    #[test]
    fn test_nudge_values() {
        assert!((nudge_bpm(120.0, 10) - 121.0).abs() < 1e-4);
        assert!((nudge_bpm(120.0, -20) - 118.0).abs() < 1e-4);
        assert_eq!(nudge_bpm(1.0, -100), 0.0);

        assert_eq!(nudge_micros(120.0, 5), 505_000);
        assert_eq!(nudge_micros(120.0, -5), 495_000);
    }

    #[test]
    fn test_batch_sleep_nominal() {
        // a quarter beat at 120 bpm
        assert_eq!(batch_sleep(120.0, 6, 0), Duration::from_millis(125));
        // surplus pulses never lengthen the sleep
        assert_eq!(batch_sleep(120.0, 6, -3), Duration::from_millis(125));
    }

    #[test]
    fn test_batch_sleep_drops_ticks() {
        let nominal = batch_sleep(120.0, 6, 0);
        let one_short = batch_sleep(120.0, 6, 1);
        let two_short = batch_sleep(120.0, 6, 2);
        assert!(one_short < nominal);
        assert!(two_short < one_short);
        assert_eq!(nominal - one_short, Duration::from_nanos(125_000_000 / 6));
        assert!(batch_sleep(120.0, 6, 6) < Duration::from_micros(1));
        assert_eq!(batch_sleep(120.0, 6, 60), Duration::ZERO);
    }

    #[test]
    fn test_phase_diff_folds_into_half_beat() {
        let beat = 500_000;
        assert_eq!(phase_diff_ms(1_000_000, beat, 1_015_000), 15);
        assert_eq!(phase_diff_ms(1_000_000, beat, 985_000), -15);
        // a device beat just before our next beat is early, not late
        assert_eq!(phase_diff_ms(1_000_000, beat, 1_490_000), -10);
        assert_eq!(phase_diff_ms(1_000_000, beat, 2_510_000), 10);
        assert_eq!(phase_diff_ms(1_000_000, 0, 2_000_000), 0);
    }

    #[test]
    fn test_now_micros_is_monotonic() {
        let a = now_micros();
        let b = now_micros();
        assert!(b >= a);
    }
}
