//! Progress bar for interactive runs.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use shotscan_core::{Identifier, Outcome, ProgressSink, RunStats};

pub(crate) struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub(crate) fn new(total: u64) -> Self {
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }

    pub(crate) fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressSink for BarProgress {
    fn on_outcome(&mut self, id: &Identifier, _outcome: &Outcome, stats: &RunStats) {
        self.bar.inc(1);
        self.bar.set_message(format_message(id, stats));
    }
}

fn format_message(id: &Identifier, stats: &RunStats) -> String {
    format!(
        "{id} saved={} dead={} skipped={} errors={}",
        stats.persisted, stats.marked_dead, stats.skipped, stats.fetch_errors
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use shotscan_core::IdentifierSpace;

    #[test]
    fn test_format_message_shows_counters() {
        let id = IdentifierSpace::default().parse("ab0001").unwrap();
        let stats = RunStats {
            persisted: 2,
            marked_dead: 1,
            skipped: 4,
            fetch_errors: 3,
            ..RunStats::default()
        };
        assert_eq!(
            format_message(&id, &stats),
            "ab0001 saved=2 dead=1 skipped=4 errors=3"
        );
    }

    #[test]
    fn test_bar_counts_outcomes() {
        let mut progress = BarProgress::new(10);
        let id = IdentifierSpace::default().parse("ab0001").unwrap();
        progress.on_outcome(&id, &Outcome::Skipped, &RunStats::default());
        assert_eq!(progress.bar.position(), 1);
        progress.finish();
    }
}
