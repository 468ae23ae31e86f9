//! Per-turn latency accounting.
//!
//! Four independent metrics, all in milliseconds:
//!
//! | Metric  | Source                                              |
//! |---------|-----------------------------------------------------|
//! | `stt`   | self-reported by the STT engine                     |
//! | `api`   | dialogue round trip, measured by the orchestrator   |
//! | `tts`   | self-reported by the TTS engine                     |
//! | `total` | turn start to playback completion (wall clock)      |
//!
//! Each is zero at the start of a turn and written at most once.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Latency snapshot for one turn, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyMetrics {
    pub stt: f64,
    pub api: f64,
    pub tts: f64,
    pub total: f64,
}

/// Which metric a measurement belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Stt,
    Api,
    Tts,
    Total,
}

/// Records the four metrics of the current turn.
#[derive(Debug, Default)]
pub struct LatencyTracker {
    metrics: LatencyMetrics,
    recorded: [bool; 4],
    started_at: Option<Instant>,
}

impl LatencyTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero every metric and mark the start of a new turn.
    pub fn begin(&mut self, now: Instant) {
        self.reset();
        self.started_at = Some(now);
    }

    /// Zero every metric and forget the turn start.
    pub fn reset(&mut self) {
        self.metrics = LatencyMetrics::default();
        self.recorded = [false; 4];
        self.started_at = None;
    }

    /// Record a metric. Returns `false` if it was already written this turn.
    pub fn record(&mut self, stage: Stage, elapsed: Duration) -> bool {
        let slot = stage as usize;
        if self.recorded[slot] {
            tracing::debug!(?stage, "Latency already recorded for this turn, ignoring");
            return false;
        }
        self.recorded[slot] = true;

        let ms = elapsed.as_secs_f64() * 1000.0;
        match stage {
            Stage::Stt => self.metrics.stt = ms,
            Stage::Api => self.metrics.api = ms,
            Stage::Tts => self.metrics.tts = ms,
            Stage::Total => self.metrics.total = ms,
        }
        true
    }

    /// Record `total` as the time since [`begin`](Self::begin).
    pub fn finish(&mut self, now: Instant) -> bool {
        let Some(started_at) = self.started_at else {
            return false;
        };
        self.record(Stage::Total, now.saturating_duration_since(started_at))
    }

    /// Current snapshot.
    #[must_use]
    pub const fn metrics(&self) -> LatencyMetrics {
        self.metrics
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn metrics_start_at_zero() {
        let tracker = LatencyTracker::new();
        assert_eq!(tracker.metrics(), LatencyMetrics::default());
    }

    #[test]
    fn each_metric_is_written_once_per_turn() {
        let mut tracker = LatencyTracker::new();
        tracker.begin(Instant::now());

        assert!(tracker.record(Stage::Stt, Duration::from_millis(120)));
        assert!(!tracker.record(Stage::Stt, Duration::from_millis(999)));
        assert_eq!(tracker.metrics().stt, 120.0);
    }

    #[tokio::test(start_paused = true)]
    async fn total_spans_the_turn() {
        let mut tracker = LatencyTracker::new();
        tracker.begin(Instant::now());
        tokio::time::advance(Duration::from_millis(900)).await;

        assert!(tracker.finish(Instant::now()));
        assert_eq!(tracker.metrics().total, 900.0);
    }

    #[test]
    fn finish_without_begin_records_nothing() {
        let mut tracker = LatencyTracker::new();
        assert!(!tracker.finish(Instant::now()));
        assert_eq!(tracker.metrics().total, 0.0);
    }

    #[test]
    fn begin_clears_previous_turn() {
        let mut tracker = LatencyTracker::new();
        tracker.begin(Instant::now());
        tracker.record(Stage::Api, Duration::from_millis(80));

        tracker.begin(Instant::now());
        assert_eq!(tracker.metrics(), LatencyMetrics::default());
        assert!(tracker.record(Stage::Api, Duration::from_millis(40)));
    }
}
