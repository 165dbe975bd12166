//! Progress display for running loads

use etl_core::batch::{BatchStats, OutcomeSink, TracingSink};
use etl_core::Outcome;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Create a spinner for a load of unknown length
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .template("{spinner:.green} [{elapsed_precise}] {pos} records {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// One-line summary of the counters
pub fn format_stats(stats: &BatchStats) -> String {
    format!(
        "{} created, {} updated, {} existing, {} rejected",
        stats.created, stats.updated, stats.existing, stats.rejected
    )
}

/// Drives a spinner and forwards every outcome to the tracing log
pub struct ProgressSink {
    bar: ProgressBar,
    log: TracingSink,
}

impl ProgressSink {
    pub fn new(bar: ProgressBar) -> Self {
        Self {
            bar,
            log: TracingSink,
        }
    }

    /// Hidden bar, for runs where nothing should be drawn
    pub fn hidden() -> Self {
        Self::new(ProgressBar::hidden())
    }

    pub fn finish(&self, stats: &BatchStats) {
        self.bar.finish_with_message(format_stats(stats));
    }
}

impl OutcomeSink for ProgressSink {
    fn outcome(&mut self, ordinal: u64, outcome: &Outcome) {
        self.bar.inc(1);
        self.log.outcome(ordinal, outcome);
    }

    fn progress(&mut self, stats: &BatchStats) {
        self.bar.set_message(format_stats(stats));
        self.log.progress(stats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etl_core::RowRef;

    #[test]
    fn test_format_stats() {
        let mut stats = BatchStats::new();
        stats.record(&Outcome::Created(RowRef::new("Person", 1)));
        stats.record(&Outcome::Rejected("bad".to_string()));
        assert_eq!(format_stats(&stats), "1 created, 0 updated, 0 existing, 1 rejected");
    }

    #[test]
    fn test_sink_counts_outcomes() {
        let mut sink = ProgressSink::hidden();
        sink.outcome(1, &Outcome::Exists(RowRef::new("Person", 1)));
        sink.outcome(2, &Outcome::Rejected("bad".to_string()));
        assert_eq!(sink.bar.position(), 2);
    }
}
