//! Per-device phase difference window and tempo estimates.

use crate::config::{BEATS_PER_BAR, DIFF_LIMIT_MS, DIFF_WINDOW, MAX_DEVICES};
use crate::timing::micros_to_bpm;
use log::trace;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct DiffSample {
    last_diff_ms: i32,
    window: [i32; DIFF_WINDOW],
    window_pos: usize,
    seen_count: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct BeatEstimate {
    last_beat_us: Option<u64>,
    track_start_us: Option<u64>,
    track_beat_count: u32,
}

fn slot(device: u8) -> Option<usize> {
    let id = usize::from(device);
    (1..=MAX_DEVICES).contains(&id).then_some(id)
}

/// Indexed by device id; slot 0 is never used.
pub struct DiffTracker {
    samples: Mutex<[DiffSample; MAX_DEVICES + 1]>,
    estimates: Mutex<[BeatEstimate; MAX_DEVICES + 1]>,
}

impl Default for DiffTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl DiffTracker {
    pub fn new() -> Self {
        DiffTracker {
            samples: Mutex::new([DiffSample::default(); MAX_DEVICES + 1]),
            estimates: Mutex::new([BeatEstimate::default(); MAX_DEVICES + 1]),
        }
    }

    fn samples(&self) -> MutexGuard<'_, [DiffSample; MAX_DEVICES + 1]> {
        self.samples.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn estimates(&self) -> MutexGuard<'_, [BeatEstimate; MAX_DEVICES + 1]> {
        self.estimates.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_diff(&self, device: u8, diff_ms: i32) {
        let Some(id) = slot(device) else {
            trace!("Ignoring diff for device {}", device);
            return;
        };
        let mut samples = self.samples();
        let sample = &mut samples[id];
        sample.last_diff_ms = diff_ms;
        sample.window[sample.window_pos] = diff_ms;
        sample.window_pos = (sample.window_pos + 1) % DIFF_WINDOW;
        sample.seen_count = sample.seen_count.saturating_add(1);
    }

    pub fn last_diff(&self, device: u8) -> i32 {
        slot(device).map_or(0, |id| self.samples()[id].last_diff_ms)
    }

    pub fn seen_count(&self, device: u8) -> u32 {
        slot(device).map_or(0, |id| self.samples()[id].seen_count)
    }

    /// Mean of the window, clamped to the correction limit. Zero until the
    /// window has been filled once.
    pub fn avg(&self, device: u8) -> i32 {
        let Some(id) = slot(device) else {
            return 0;
        };
        let sample = self.samples()[id];
        if (sample.seen_count as usize) < DIFF_WINDOW {
            return 0;
        }
        let sum: i64 = sample.window.iter().map(|&d| i64::from(d)).sum();
        let limit = i64::from(DIFF_LIMIT_MS);
        (sum / DIFF_WINDOW as i64).clamp(-limit, limit) as i32
    }

    /// Tempo over the bar that ended at `now_us`. Zero on the first bar seen.
    pub fn estimate_bar_bpm(&self, device: u8, now_us: u64) -> f32 {
        let Some(id) = slot(device) else {
            return 0.0;
        };
        let mut estimates = self.estimates();
        let estimate = &mut estimates[id];
        estimate.track_beat_count = estimate.track_beat_count.saturating_add(BEATS_PER_BAR);
        let previous = estimate.last_beat_us.replace(now_us);
        match previous {
            Some(last) if now_us > last => micros_to_bpm((now_us - last) / u64::from(BEATS_PER_BAR)),
            _ => 0.0,
        }
    }

    /// Anchors the running track average at `now_us`.
    pub fn track_start(&self, device: u8, now_us: u64) {
        if let Some(id) = slot(device) {
            let mut estimates = self.estimates();
            estimates[id].track_start_us = Some(now_us);
            estimates[id].track_beat_count = 0;
        }
    }

    /// Average tempo since the track start.
    pub fn estimate_track_bpm(&self, device: u8, now_us: u64) -> f32 {
        let Some(id) = slot(device) else {
            return 0.0;
        };
        let estimate = self.estimates()[id];
        match estimate.track_start_us {
            Some(start) if estimate.track_beat_count > 0 && now_us > start => {
                micros_to_bpm((now_us - start) / u64::from(estimate.track_beat_count))
            }
            _ => 0.0,
        }
    }

    pub fn reset(&self) {
        *self.samples() = [DiffSample::default(); MAX_DEVICES + 1];
        *self.estimates() = [BeatEstimate::default(); MAX_DEVICES + 1];
    }
}
