//! # Money Age Core
//!
//! Domain types and the pure calculation engine for money age: the number
//! of days between money entering a user's accounts (income) and leaving
//! them (expense), attributed by depleting income pools oldest-first.
//!
//! ## Core Concepts
//!
//! - **Resource pool**: remaining balance of one income transaction
//! - **Consumption**: the slice of a pool spent by one expense, with its age
//! - **Money age**: amount-weighted average age of the money an expense spent
//! - **Strategy**: how an expense is split across open pools (FIFO by default)
//!
//! ## Architecture
//!
//! ```text
//! TransactionSource ──► MoneyAgeCalculator ──► PoolStore
//!   (trait, I/O)          (pure, in-memory)     (trait, I/O)
//! ```
//!
//! The calculator never touches a store. The rebuild orchestrator in
//! `money-age-runtime` feeds it and persists what it produces; both
//! collaborators are injected as trait objects.

pub use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
pub use serde::{Deserialize, Serialize};

/// Fixed-point money amounts
pub mod money;

/// Ledger transactions, identifiers and filters
pub mod transaction;

/// Resource pools, consumptions and results
pub mod pool;

/// Pool selection strategies
pub mod strategy;

/// The money age calculator
pub mod calculator;

/// Health classification of money age values
pub mod health;

/// Rebuild stages and progress records
pub mod progress;

/// Transaction source and pool store traits
pub mod store;

/// Environment module - Dependency injection traits
///
/// External dependencies that make runs non-deterministic are abstracted
/// behind traits and injected into the orchestrator.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Test - fixed time for deterministic tests
    /// struct FixedClock { time: DateTime<Utc> }
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

// Re-export main types for convenience
pub use calculator::{CalculationError, MoneyAgeCalculator};
pub use environment::{Clock, SystemClock};
pub use health::{HealthDistribution, HealthLevel, HealthThresholds, LevelStats};
pub use money::Money;
pub use pool::{
    ConsumptionId, MoneyAgeResult, PoolId, PoolStatistics, ResourceConsumption, ResourcePool,
};
pub use progress::{RebuildProgress, RebuildStage};
pub use store::{PoolStore, SaveBatch, StoreError, StoreFuture, TransactionSource};
pub use strategy::{ConsumptionStrategy, UnknownStrategy};
pub use transaction::{
    AccountId, DateRange, LedgerId, Transaction, TransactionFilter, TransactionId, TransactionKind,
};
