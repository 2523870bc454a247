//! Metrics for rebuild observability.
//!
//! Recorded through the `metrics` facade. The library never installs a
//! recorder; hosts install an exporter of their choice and call
//! [`register_metrics`] once to attach descriptions.
//!
//! # Example
//!
//! ```rust
//! use money_age_runtime::metrics;
//!
//! // Describe all money age metrics on the installed recorder
//! metrics::register_metrics();
//! ```

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use money_age_core::PoolStatistics;
use std::time::Duration;

/// Rebuild runs that acquired the busy flag
pub const REBUILDS_STARTED: &str = "money_age_rebuilds_started_total";
/// Rebuild runs that saved their results
pub const REBUILDS_COMPLETED: &str = "money_age_rebuilds_completed_total";
/// Rebuild runs that failed or were cancelled, labelled by `reason`
pub const REBUILDS_FAILED: &str = "money_age_rebuilds_failed_total";
/// Rebuild requests turned away because another run was active
pub const REBUILDS_REJECTED: &str = "money_age_rebuilds_rejected_total";
/// Wall-clock duration of rebuild runs
pub const REBUILD_DURATION: &str = "money_age_rebuild_duration_seconds";
/// Average money age of the last successful rebuild
pub const AVERAGE_DAYS: &str = "money_age_average_days";
/// Pools created by the last successful rebuild
pub const POOLS_TOTAL: &str = "money_age_pools_total";

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(REBUILDS_STARTED, "Total number of money age rebuilds started");
    describe_counter!(
        REBUILDS_COMPLETED,
        "Total number of money age rebuilds that completed successfully"
    );
    describe_counter!(
        REBUILDS_FAILED,
        "Total number of money age rebuilds that failed, by reason"
    );
    describe_counter!(
        REBUILDS_REJECTED,
        "Total number of rebuild requests rejected because a rebuild was running"
    );
    describe_histogram!(REBUILD_DURATION, "Time taken by money age rebuilds");
    describe_gauge!(
        AVERAGE_DAYS,
        "Amount-weighted average money age of the last successful rebuild, in days"
    );
    describe_gauge!(POOLS_TOTAL, "Resource pools created by the last successful rebuild");
}

/// Rebuild metrics recorder.
pub struct RebuildMetrics;

impl RebuildMetrics {
    /// Record a run acquiring the busy flag.
    pub fn record_started() {
        counter!(REBUILDS_STARTED).increment(1);
    }

    /// Record a successful run.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_completed(duration: Duration, average_days: f64, statistics: &PoolStatistics) {
        counter!(REBUILDS_COMPLETED).increment(1);
        histogram!(REBUILD_DURATION).record(duration.as_secs_f64());
        gauge!(AVERAGE_DAYS).set(average_days);
        gauge!(POOLS_TOTAL).set(statistics.total_pools as f64);
    }

    /// Record a failed or cancelled run.
    pub fn record_failed(reason: &'static str, duration: Duration) {
        counter!(REBUILDS_FAILED, "reason" => reason).increment(1);
        histogram!(REBUILD_DURATION).record(duration.as_secs_f64());
    }

    /// Record a request rejected by the busy flag.
    pub fn record_rejected() {
        counter!(REBUILDS_REJECTED).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        register_metrics();
        RebuildMetrics::record_started();
        RebuildMetrics::record_completed(
            Duration::from_millis(12),
            4.5,
            &PoolStatistics::default(),
        );
        RebuildMetrics::record_failed("cancelled", Duration::from_millis(3));
        RebuildMetrics::record_rejected();
    }
}
