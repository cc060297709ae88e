use crate::config::BEATS_PER_BAR;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Quarter beats within the current beat.
pub const QUARTERS_PER_BEAT: u64 = 4;

fn bar_style(template: &str, chars: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars(chars)
}

pub fn create_beat_progress(multi_progress: &MultiProgress) -> ProgressBar {
    let pb = multi_progress.add(ProgressBar::new(QUARTERS_PER_BEAT));
    pb.set_style(bar_style(
        "{prefix:.bold} [{bar:40.cyan}] {pos}/{len}",
        "⣀⣤⣦⣶⣷⣿ ",
    ));
    pb.set_prefix("Beat");
    pb
}

pub fn create_bar_progress(multi_progress: &MultiProgress) -> ProgressBar {
    let pb = multi_progress.add(ProgressBar::new(u64::from(BEATS_PER_BAR)));
    pb.set_style(bar_style(
        "{prefix:.bold} [{bar:20.white/black}] {pos}/{len}",
        "█▊ ",
    ));
    pb.set_prefix("Bar");
    pb
}

pub fn create_status_spinner(multi_progress: &MultiProgress) -> ProgressBar {
    let pb = multi_progress.add(ProgressBar::new_spinner());
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_prefix("Clock");
    pb
}
