//! # Money Age Runtime
//!
//! Drives the pure [`MoneyAgeCalculator`](money_age_core::MoneyAgeCalculator)
//! over real transaction history and persists what it produces.
//!
//! ## Core Components
//!
//! - **[`RebuildOrchestrator`]**: full and incremental rebuilds with batched
//!   progress, cooperative cancellation and a fail-fast busy flag
//! - **[`IntegrityValidator`]**: read-only consistency check between the
//!   pool store and the transaction source
//! - **[`MoneyAgeQueries`]**: average age, per-transaction age, daily trend and the
//!   health dashboard read from stored results
//! - **[`ProgressBroadcaster`]**: fire-and-forget progress channel
//!
//! ## Example
//!
//! ```ignore
//! use money_age_runtime::{RebuildConfig, RebuildOrchestrator};
//! use std::sync::Arc;
//!
//! let orchestrator = RebuildOrchestrator::new(Arc::new(source), Arc::new(store));
//! let mut progress = orchestrator.subscribe_progress();
//!
//! let result = orchestrator.rebuild_all(RebuildConfig::default()).await;
//! if result.success {
//!     println!("average money age: {:.1} days", result.average_money_age);
//! } else {
//!     println!("{}", result.summary());
//! }
//! ```

/// Rebuild and service configuration
pub mod config;

/// Integrity validation of stored pools and consumptions
pub mod integrity;

/// Metric names and registration
pub mod metrics;

/// Progress broadcasting
pub mod progress;

/// Read-side queries over stored money ages
pub mod queries;

/// The rebuild orchestrator
pub mod rebuild;

/// Error types for rebuild runs
pub mod error {
    use crate::config::ConfigError;
    use money_age_core::{CalculationError, RebuildStage, StoreError};
    use thiserror::Error;

    /// Why a rebuild run did not complete.
    ///
    /// Rebuild operations never return this directly; it travels inside a
    /// failed [`RebuildResult`](crate::RebuildResult).
    #[derive(Error, Debug, Clone, PartialEq)]
    pub enum RebuildError {
        /// Another rebuild holds the busy flag
        ///
        /// Retryable once the running rebuild finishes. Not data corruption.
        #[error("A money age rebuild is already in progress")]
        RebuildInProgress,

        /// The caller requested cancellation
        ///
        /// Observed at a batch boundary; nothing was saved.
        #[error("Rebuild cancelled during stage {stage:?}")]
        Cancelled {
            /// Stage the run was in when the flag was observed
            stage: RebuildStage,
        },

        /// Reading transactions or stored data failed
        #[error("Failed to load data: {0}")]
        Load(StoreError),

        /// Deleting or writing pools, consumptions or ages failed
        #[error("Failed to save money age data: {0}")]
        Save(StoreError),

        /// The calculator rejected a transaction
        #[error("Money age calculation failed: {0}")]
        Calculation(#[from] CalculationError),

        /// The rebuild configuration did not validate
        #[error("Invalid rebuild configuration: {0}")]
        InvalidConfig(#[from] ConfigError),
    }

    impl RebuildError {
        /// Whether retrying the same request later may succeed
        #[must_use]
        pub const fn is_retryable(&self) -> bool {
            matches!(self, Self::RebuildInProgress | Self::Load(_) | Self::Save(_))
        }

        /// Short label used for the `reason` metric label
        #[must_use]
        pub const fn reason(&self) -> &'static str {
            match self {
                Self::RebuildInProgress => "in_progress",
                Self::Cancelled { .. } => "cancelled",
                Self::Load(_) => "load",
                Self::Save(_) => "save",
                Self::Calculation(_) => "calculation",
                Self::InvalidConfig(_) => "invalid_config",
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_retryable_errors() {
            assert!(RebuildError::RebuildInProgress.is_retryable());
            assert!(RebuildError::Save(StoreError::Save("disk full".into())).is_retryable());
            assert!(
                !RebuildError::Cancelled {
                    stage: RebuildStage::Loading
                }
                .is_retryable()
            );
        }

        #[test]
        fn test_error_messages_carry_cause() {
            let error = RebuildError::Load(StoreError::Load("connection reset".into()));
            assert_eq!(
                error.to_string(),
                "Failed to load data: Load failed: connection reset"
            );
            assert_eq!(error.reason(), "load");
        }
    }
}

pub use config::{ConfigError, MoneyAgeConfig, RebuildConfig};
pub use error::RebuildError;
pub use integrity::{IntegrityReport, IntegrityValidator, IntegrityViolation};
pub use progress::ProgressBroadcaster;
pub use queries::{
    DASHBOARD_TREND_DAYS, MoneyAgeDashboard, MoneyAgeQueries, MoneyAgeTrend, TrendDirection,
    TrendPoint,
};
pub use rebuild::{RebuildOrchestrator, RebuildResult};
