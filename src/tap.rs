use crate::timing::micros_to_bpm;
use std::sync::{Mutex, PoisonError};

const TAPS: usize = 4;

/// Four taps set the tempo; the fifth starts a new count.
#[derive(Default)]
pub struct TapTempo {
    taps: Mutex<Vec<u64>>,
}

impl TapTempo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a tap at `now_us`. Returns the tapped bpm on the fourth tap.
    pub fn tap(&self, now_us: u64) -> Option<f32> {
        let mut taps = self.taps.lock().unwrap_or_else(PoisonError::into_inner);
        taps.push(now_us);
        if taps.len() < TAPS {
            return None;
        }
        let first = taps[0];
        taps.clear();
        let interval = now_us.saturating_sub(first) / (TAPS as u64 - 1);
        (interval > 0).then(|| micros_to_bpm(interval))
    }

    pub fn count(&self) -> usize {
        self.taps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
