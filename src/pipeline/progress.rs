//! Per-stage progress metrics for pipeline runs.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Counters for one pipeline stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageMetrics {
    pub items_processed: usize,
    pub items_successful: usize,
    pub items_failed: usize,
    /// Seconds the stage spent, set when the stage completes.
    pub elapsed_secs: f64,
}

impl StageMetrics {
    /// Successful share of processed items, as a percentage.
    pub fn success_rate(&self) -> f64 {
        if self.items_processed == 0 {
            0.0
        } else {
            self.items_successful as f64 / self.items_processed as f64 * 100.0
        }
    }
}

#[derive(Default)]
struct TrackerState {
    metrics: BTreeMap<String, StageMetrics>,
    started: BTreeMap<String, Instant>,
}

/// Collects [`StageMetrics`] across a run.
///
/// Interior mutability keeps the tracker shareable by reference from stage
/// helpers without threading `&mut` through the orchestrator.
#[derive(Default)]
pub struct ProgressTracker {
    state: Mutex<TrackerState>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_stage(&self, stage: &str, total_items: usize) {
        let mut state = self.state.lock();
        state.started.insert(stage.to_string(), Instant::now());
        state
            .metrics
            .insert(stage.to_string(), StageMetrics::default());
        tracing::info!(stage, total_items, "stage started");
    }

    pub fn record(&self, stage: &str, successful: bool, increment: usize) {
        let mut state = self.state.lock();
        let metrics = state.metrics.entry(stage.to_string()).or_default();
        metrics.items_processed += increment;
        if successful {
            metrics.items_successful += increment;
        } else {
            metrics.items_failed += increment;
        }
    }

    pub fn complete_stage(&self, stage: &str) -> Duration {
        let mut state = self.state.lock();
        let elapsed = state
            .started
            .get(stage)
            .map(|start| start.elapsed())
            .unwrap_or_default();
        if let Some(metrics) = state.metrics.get_mut(stage) {
            metrics.elapsed_secs = elapsed.as_secs_f64();
            tracing::info!(
                stage,
                processed = metrics.items_processed,
                successful = metrics.items_successful,
                failed = metrics.items_failed,
                success_rate = format!("{:.2}%", metrics.success_rate()),
                elapsed_secs = metrics.elapsed_secs,
                "stage completed"
            );
        }
        elapsed
    }

    pub fn metrics(&self, stage: &str) -> Option<StageMetrics> {
        self.state.lock().metrics.get(stage).cloned()
    }

    pub fn all_metrics(&self) -> BTreeMap<String, StageMetrics> {
        self.state.lock().metrics.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_success_and_failure_counts() {
        let tracker = ProgressTracker::new();
        tracker.start_stage("crawling", 3);
        tracker.record("crawling", true, 1);
        tracker.record("crawling", true, 1);
        tracker.record("crawling", false, 1);
        tracker.complete_stage("crawling");

        let metrics = tracker.metrics("crawling").unwrap();
        assert_eq!(metrics.items_processed, 3);
        assert_eq!(metrics.items_successful, 2);
        assert_eq!(metrics.items_failed, 1);
        assert!((metrics.success_rate() - 66.666).abs() < 0.01);
    }

    #[test]
    fn empty_stage_has_zero_rate() {
        let tracker = ProgressTracker::new();
        tracker.start_stage("embedding", 0);
        tracker.complete_stage("embedding");
        let metrics = tracker.metrics("embedding").unwrap();
        assert_eq!(metrics.success_rate(), 0.0);
    }

    #[test]
    fn batch_increments_accumulate() {
        let tracker = ProgressTracker::new();
        tracker.start_stage("storing", 100);
        tracker.record("storing", true, 64);
        tracker.record("storing", false, 36);
        let metrics = tracker.metrics("storing").unwrap();
        assert_eq!(metrics.items_processed, 100);
        assert_eq!(metrics.items_failed, 36);
    }
}
