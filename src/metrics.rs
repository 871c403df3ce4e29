//! In-process instrumentation.
//!
//! Counters and histograms recorded through the `metrics` crate's facade.
//! No exporter is installed here — callers who want a served `/metrics`
//! endpoint install their own recorder before touching this crate. Without
//! one, these calls are harmless no-ops.

use std::time::Duration;

use metrics::{counter, histogram};

pub mod names {
    pub const CACHE_HITS: &str = "docsync_cache_hits_total";
    pub const CACHE_MISSES: &str = "docsync_cache_misses_total";
    pub const CACHE_EVICTIONS: &str = "docsync_cache_evictions_total";
    pub const JOBS_PROCESSED: &str = "docsync_jobs_processed_total";
    pub const JOB_DURATION: &str = "docsync_job_duration_seconds";
    pub const BATCH_OPERATIONS: &str = "docsync_batch_operations_total";
    pub const RETRIES: &str = "docsync_retries_total";
}

#[derive(Debug, Clone, Copy)]
pub enum JobOutcome {
    Success,
    Failed,
    Cancelled,
}

impl JobOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

pub fn record_cache_hit() {
    counter!(names::CACHE_HITS).increment(1);
}

pub fn record_cache_miss() {
    counter!(names::CACHE_MISSES).increment(1);
}

pub fn record_cache_eviction() {
    counter!(names::CACHE_EVICTIONS).increment(1);
}

pub fn record_job_outcome(outcome: JobOutcome) {
    counter!(names::JOBS_PROCESSED, "outcome" => outcome.as_str()).increment(1);
}

pub fn record_job_duration(duration: Duration) {
    histogram!(names::JOB_DURATION).record(duration.as_secs_f64());
}

pub fn record_batch_operations(tag: &str, outcome: JobOutcome) {
    counter!(names::BATCH_OPERATIONS, "tag" => tag.to_string(), "outcome" => outcome.as_str())
        .increment(1);
}

pub fn record_retry(attempt: u32) {
    counter!(names::RETRIES, "attempt" => attempt.to_string()).increment(1);
}
