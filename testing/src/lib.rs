//! # Money Age Testing
//!
//! Testing utilities for the money age engine and rebuild runtime.
//!
//! This crate provides:
//! - In-memory implementations of [`TransactionSource`] and [`PoolStore`]
//! - A gated source for deterministic cancellation and concurrency tests
//! - Fault injection for load and save failures
//! - Ledger fixtures and a fixed clock
//!
//! ## Example
//!
//! ```ignore
//! use money_age_testing::{InMemoryPoolStore, InMemoryTransactionSource, LedgerFixture};
//!
//! let mut ledger = LedgerFixture::new();
//! let source = InMemoryTransactionSource::with_transactions(vec![
//!     ledger.income(100, 0),
//!     ledger.expense(40, 10),
//! ]);
//! let store = InMemoryPoolStore::new();
//! let orchestrator = RebuildOrchestrator::new(Arc::new(source), Arc::new(store.clone()));
//! ```
//!
//! [`TransactionSource`]: money_age_core::TransactionSource
//! [`PoolStore`]: money_age_core::PoolStore

use chrono::{DateTime, Utc};
use money_age_core::environment::Clock;

/// In-memory collaborators
pub mod store_mocks;

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use money_age_testing::mocks::FixedClock;
    /// use money_age_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-06-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-06-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Ledger fixtures.
pub mod fixtures {
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use money_age_core::{AccountId, LedgerId, Money, Transaction, TransactionKind};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Builds transactions for one ledger/account with increasing
    /// insertion order. Days are offsets from 2025-01-01 00:00 UTC.
    #[derive(Debug, Clone)]
    pub struct LedgerFixture {
        /// Ledger all transactions belong to
        pub ledger_id: LedgerId,
        /// Account all transactions are booked against
        pub account_id: AccountId,
        origin: DateTime<Utc>,
        sequence: Arc<AtomicU64>,
    }

    impl LedgerFixture {
        /// Fresh ledger and account
        #[must_use]
        pub fn new() -> Self {
            Self {
                ledger_id: LedgerId::new(),
                account_id: AccountId::new(),
                origin: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single().unwrap_or_default(),
                sequence: Arc::new(AtomicU64::new(0)),
            }
        }

        /// Another account in the same ledger, sharing the insertion sequence
        #[must_use]
        pub fn other_account(&self) -> Self {
            Self {
                account_id: AccountId::new(),
                ..self.clone()
            }
        }

        /// Instant `day` days after the fixture origin
        #[must_use]
        pub fn day(&self, day: i64) -> DateTime<Utc> {
            self.origin + Duration::days(day)
        }

        /// Income of `major` whole units on `day`
        pub fn income(&mut self, major: i64, day: i64) -> Transaction {
            self.transaction(TransactionKind::Income, Money::from_major(major), day)
        }

        /// Expense of `major` whole units on `day`
        pub fn expense(&mut self, major: i64, day: i64) -> Transaction {
            self.transaction(TransactionKind::Expense, Money::from_major(major), day)
        }

        /// Transfer of `major` whole units on `day`
        pub fn transfer(&mut self, major: i64, day: i64) -> Transaction {
            self.transaction(TransactionKind::Transfer, Money::from_major(major), day)
        }

        /// Transaction of any kind and exact amount on `day`
        pub fn transaction(&mut self, kind: TransactionKind, amount: Money, day: i64) -> Transaction {
            let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
            Transaction::new(
                kind,
                amount,
                self.day(day),
                self.ledger_id,
                self.account_id,
                sequence,
            )
        }
    }

    impl Default for LedgerFixture {
        fn default() -> Self {
            Self::new()
        }
    }
}

/// Installs a `tracing` subscriber honouring `RUST_LOG` for the current
/// test binary. Safe to call from every test.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use fixtures::LedgerFixture;
pub use mocks::{FixedClock, test_clock};
pub use store_mocks::{
    FailPoint, GatedTransactionSource, InMemoryPoolStore, InMemoryTransactionSource, SourceGate,
};
