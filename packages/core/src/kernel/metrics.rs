//! Thin wrappers over the `metrics` facade (§2.12).
//!
//! Every job-loop iteration reports exactly one outcome and, when it did
//! real work, a duration. These are process-wide commutative counters —
//! per §9's Design Notes, "Metric counters are the sole process-wide
//! mutables, and they are commutative" — so plain `metrics::counter!`/
//! `histogram!` calls suffice; no locking is needed here.

use std::time::Duration;

/// The three outcomes a job-loop iteration can report, per §4.5 / §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Claimed,
    Empty,
    Error,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Outcome::Claimed => "claimed",
            Outcome::Empty => "empty",
            Outcome::Error => "error",
        }
    }
}

/// Increments the per-(job_class, outcome) counter.
pub fn record_outcome(job_class: &'static str, outcome: Outcome) {
    metrics::counter!(
        "autoscaler_job_iterations_total",
        "job_class" => job_class,
        "outcome" => outcome.as_str(),
    )
    .increment(1);
}

/// Records how long a claimed-row iteration took to process.
pub fn record_duration(job_class: &'static str, duration: Duration) {
    metrics::histogram!(
        "autoscaler_job_duration_seconds",
        "job_class" => job_class,
    )
    .record(duration.as_secs_f64());
}

/// Records the number of rows a garbage-collection sweep removed (§4.6).
pub fn record_gc_deleted(count: u64) {
    metrics::counter!("autoscaler_gc_deleted_total").increment(count);
}
