//! Worker metrics.

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_DISPATCHED_TOTAL: &str = "pcast_jobs_dispatched_total";
    pub const DISPATCH_FAILURES_TOTAL: &str = "pcast_dispatch_failures_total";
    pub const JOBS_TIMED_OUT_TOTAL: &str = "pcast_jobs_timed_out_total";
    pub const WEBHOOKS_UNMATCHED_TOTAL: &str = "pcast_webhooks_unmatched_total";

    pub const COMPLETION_CHECKS_TOTAL: &str = "pcast_completion_checks_total";
    pub const STORIES_READY_TOTAL: &str = "pcast_stories_ready_total";
    pub const PHASE_TRIGGER_FAILURES_TOTAL: &str = "pcast_phase_trigger_failures_total";
    pub const IMAGE_SUCCESS_RATE: &str = "pcast_image_success_rate";

    pub const LIMITER_ACTIVE: &str = "pcast_limiter_active";
    pub const NARRATION_DURATION_SECONDS: &str = "pcast_narration_duration_seconds";
}

pub fn record_job_dispatched(kind: &str) {
    let labels = [("kind", kind.to_string())];
    counter!(names::JOBS_DISPATCHED_TOTAL, &labels).increment(1);
}

pub fn record_dispatch_failure(kind: &str) {
    let labels = [("kind", kind.to_string())];
    counter!(names::DISPATCH_FAILURES_TOTAL, &labels).increment(1);
}

pub fn record_job_timed_out(kind: &str) {
    let labels = [("kind", kind.to_string())];
    counter!(names::JOBS_TIMED_OUT_TOTAL, &labels).increment(1);
}

pub fn record_unmatched_webhook() {
    counter!(names::WEBHOOKS_UNMATCHED_TOTAL).increment(1);
}

/// Record one evaluator run by its result.
pub fn record_completion_check(result: &str) {
    let labels = [("result", result.to_string())];
    counter!(names::COMPLETION_CHECKS_TOTAL, &labels).increment(1);
}

pub fn record_story_ready() {
    counter!(names::STORIES_READY_TOTAL).increment(1);
}

pub fn record_trigger_failure() {
    counter!(names::PHASE_TRIGGER_FAILURES_TOTAL).increment(1);
}

pub fn record_image_success_rate(rate: f64) {
    histogram!(names::IMAGE_SUCCESS_RATE).record(rate);
}

pub fn set_limiter_active(active: usize) {
    gauge!(names::LIMITER_ACTIVE).set(active as f64);
}

pub fn record_narration_duration(secs: f64) {
    histogram!(names::NARRATION_DURATION_SECONDS).record(secs);
}
