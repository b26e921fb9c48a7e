//! Observability metrics for coverage orchestration.
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `cover_resolve_total` | Counter | `outcome` | Resolutions by outcome |
//! | `cover_runs_total` | Counter | `result` | Completed runner invocations |
//! | `cover_run_duration_seconds` | Histogram | `result` | Runner invocation duration |
//! | `cover_admission_outstanding` | Gauge | - | Admission tokens currently held |
//! | `cover_overflow_published_total` | Counter | `result` | Overflow queue publishes |
//!
//! Metrics go through the `metrics` facade; installing an exporter is the
//! binary's job.
//!
//! ```rust,no_run
//! use cover_flow::metrics::CoverMetrics;
//!
//! let metrics = CoverMetrics::new();
//! metrics.record_resolve("in_progress");
//! metrics.set_admission_outstanding(2);
//! ```

use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: Resolutions by outcome.
    pub const RESOLVE_TOTAL: &str = "cover_resolve_total";
    /// Counter: Completed runner invocations.
    pub const RUNS_TOTAL: &str = "cover_runs_total";
    /// Histogram: Runner invocation duration in seconds.
    pub const RUN_DURATION_SECONDS: &str = "cover_run_duration_seconds";
    /// Gauge: Admission tokens currently held.
    pub const ADMISSION_OUTSTANDING: &str = "cover_admission_outstanding";
    /// Counter: Overflow queue publish attempts.
    pub const OVERFLOW_PUBLISHED_TOTAL: &str = "cover_overflow_published_total";
}

/// Label keys used across metrics.
pub mod labels {
    /// Resolution outcome (ready, queued, `in_progress`, ...).
    pub const OUTCOME: &str = "outcome";
    /// Result status (success, failure, delivered, dropped).
    pub const RESULT: &str = "result";
}

/// High-level interface for recording orchestration metrics.
///
/// Stateless; cloning is free.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoverMetrics;

impl CoverMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Records one resolution.
    pub fn record_resolve(&self, outcome: &str) {
        counter!(names::RESOLVE_TOTAL, labels::OUTCOME => outcome.to_string()).increment(1);
    }

    /// Records a finished runner invocation and its duration.
    pub fn record_run(&self, result: &str, duration: Duration) {
        counter!(names::RUNS_TOTAL, labels::RESULT => result.to_string()).increment(1);
        histogram!(names::RUN_DURATION_SECONDS, labels::RESULT => result.to_string())
            .record(duration.as_secs_f64());
    }

    /// Sets the number of held admission tokens.
    #[allow(clippy::cast_precision_loss)] // Gauge values are small
    pub fn set_admission_outstanding(&self, count: usize) {
        gauge!(names::ADMISSION_OUTSTANDING).set(count as f64);
    }

    /// Records an overflow publish attempt.
    pub fn record_overflow_publish(&self, result: &str) {
        counter!(names::OVERFLOW_PUBLISHED_TOTAL, labels::RESULT => result.to_string())
            .increment(1);
    }
}

/// RAII guard that reports elapsed time when dropped.
pub struct TimingGuard<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> TimingGuard<F>
where
    F: FnOnce(Duration),
{
    /// Creates a guard that calls `on_drop` with the elapsed duration.
    pub fn new(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }

    /// Returns the elapsed time since the guard was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl<F> Drop for TimingGuard<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}
