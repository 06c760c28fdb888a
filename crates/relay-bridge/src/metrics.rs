//! Metric names recorded by the bridge.

pub const JOBS_DISPATCHED: &str = "jobs_dispatched";
pub const DISPATCH_FAILURES: &str = "dispatch_failures";
pub const DELIVERIES: &str = "deliveries";
pub const ORPHANED_DELIVERIES: &str = "orphaned_deliveries";
pub const DUPLICATE_CALLBACKS: &str = "duplicate_callbacks";
pub const UNCORRELATED_CALLBACKS: &str = "uncorrelated_callbacks";
pub const POLL_ATTEMPTS: &str = "poll_attempts";
pub const POLLS_STARTED: &str = "polls_started";
pub const JOB_TIMEOUTS: &str = "job_timeouts";
pub const JOB_FAILURES: &str = "job_failures";
/// Seconds from dispatch to delivery, labelled by `source`.
pub const RESOLUTION_LATENCY: &str = "resolution_latency_seconds";
