use std::{
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

use console::style;
use indicatif::ProgressBar;
use skipper_core::{AdSegment, Player, PromptSurface, format_segment, format_timestamp};

/// A playback clock running at 1x from a chosen position.
pub struct SimulatedPlayer {
    anchor: Mutex<(Instant, f64)>,
}

impl SimulatedPlayer {
    pub fn starting_at(position: f64) -> Self {
        Self {
            anchor: Mutex::new((Instant::now(), position.max(0.0))),
        }
    }

    fn anchor(&self) -> std::sync::MutexGuard<'_, (Instant, f64)> {
        self.anchor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Player for SimulatedPlayer {
    fn current_time(&self) -> f64 {
        let (at, base) = *self.anchor();
        base + at.elapsed().as_secs_f64()
    }

    fn seek(&self, position: f64) {
        *self.anchor() = (Instant::now(), position);
    }

    fn is_connected(&self) -> bool {
        true
    }
}

/// Prints prompt and notices above the playback spinner.
pub struct TerminalSurface {
    progress: ProgressBar,
    visible: AtomicBool,
}

impl TerminalSurface {
    pub fn new(progress: ProgressBar) -> Self {
        Self {
            progress,
            visible: AtomicBool::new(false),
        }
    }
}

impl PromptSurface for TerminalSurface {
    fn show_prompt(&self, segment: &AdSegment) {
        self.visible.store(true, Ordering::SeqCst);
        self.progress.println(format!(
            "{} Ad ahead {}, skipping shortly. {}",
            style("▶").yellow().bold(),
            style(format_segment(segment)).bold(),
            style("Press Enter to keep watching.").dim()
        ));
    }

    fn show_skipped(&self, segment: &AdSegment) {
        self.visible.store(false, Ordering::SeqCst);
        self.progress.println(format!(
            "{} Ad skipped, jumped to {}",
            style("✓").green().bold(),
            style(format_timestamp(segment.end)).cyan()
        ));
    }

    fn hide_prompt(&self) {
        if self.visible.swap(false, Ordering::SeqCst) {
            self.progress
                .println(format!("{}", style("  prompt dismissed").dim()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seek_moves_the_clock() {
        let player = SimulatedPlayer::starting_at(12.0);
        assert!(player.current_time() >= 12.0);

        player.seek(300.0);
        let now = player.current_time();
        assert!((300.0..301.0).contains(&now));
    }

    #[test]
    fn negative_start_is_clamped() {
        let player = SimulatedPlayer::starting_at(-5.0);
        assert!(player.current_time() >= 0.0);
    }

    #[test]
    fn hide_without_prompt_is_silent() {
        let surface = TerminalSurface::new(ProgressBar::hidden());
        surface.hide_prompt();
        assert!(!surface.visible.load(Ordering::SeqCst));

        surface.show_prompt(&AdSegment { start: 10.0, end: 20.0 });
        assert!(surface.visible.load(Ordering::SeqCst));
        surface.hide_prompt();
        assert!(!surface.visible.load(Ordering::SeqCst));
    }
}
