//! In-memory FIFO money age engine.
//!
//! The calculator is deterministic and performs no I/O. Incomes open
//! resource pools; expenses drain them according to the configured
//! [`ConsumptionStrategy`] and each drained slice becomes a
//! [`ResourceConsumption`] whose age is the whole number of days between
//! the income and the expense.
//!
//! # Insufficient funds
//!
//! When the open pools hold less than an expense, the uncovered part is
//! attributed to an implicit source of age zero. It adds nothing to the
//! weighted age sum and produces no consumption record, which keeps the
//! engine total over historically inconsistent ledgers.
//!
//! # Resuming from stored data
//!
//! An incremental rebuild does not replay the whole history. It re-opens
//! the stored pools with [`MoneyAgeCalculator::reopen_pool`] and applies
//! the draws of expenses it will not recompute with
//! [`MoneyAgeCalculator::replay_consumption`], so the pools hold what a
//! full rebuild would leave for the remaining expenses.
//!
//! # Example
//!
//! ```
//! use chrono::{TimeZone, Utc};
//! use money_age_core::{
//!     AccountId, LedgerId, Money, MoneyAgeCalculator, Transaction, TransactionKind,
//! };
//!
//! let ledger = LedgerId::new();
//! let account = AccountId::new();
//! let at = |d| Utc.with_ymd_and_hms(2025, 1, d, 0, 0, 0).unwrap();
//!
//! let mut calc = MoneyAgeCalculator::default();
//! calc.process_income(&Transaction::new(
//!     TransactionKind::Income, Money::from_major(100), at(1), ledger, account, 0,
//! ))?;
//! let result = calc.process_expense(&Transaction::new(
//!     TransactionKind::Expense, Money::from_major(40), at(11), ledger, account, 1,
//! ))?;
//! assert_eq!(result.money_age, 10.0);
//! # Ok::<(), money_age_core::CalculationError>(())
//! ```

use crate::{
    ConsumptionId, ConsumptionStrategy, Money, MoneyAgeResult, PoolId, PoolStatistics,
    ResourceConsumption, ResourcePool, Transaction, TransactionId, TransactionKind,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

/// Errors raised for input the calculator cannot accept.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CalculationError {
    /// Expense with a negative amount
    #[error("Transaction {0} has a negative amount")]
    NegativeAmount(TransactionId),

    /// Income with a zero or negative amount
    #[error("Income {0} must have a positive amount")]
    NonPositiveIncome(TransactionId),

    /// Transaction of the wrong kind for the operation
    #[error("Transaction {id} of kind {kind:?} cannot be processed as {expected:?}")]
    UnsupportedKind {
        /// Offending transaction
        id: TransactionId,
        /// Its kind
        kind: TransactionKind,
        /// Kind the operation expects
        expected: TransactionKind,
    },

    /// Replayed consumption refers to a pool this calculator does not hold
    #[error("Consumption refers to unknown pool {0}")]
    UnknownPool(PoolId),

    /// Replayed consumption takes more than the pool has left
    #[error("Pool {pool} cannot give {amount}, only {remaining} left")]
    Overdrawn {
        /// Pool being drawn
        pool: PoolId,
        /// Amount of the replayed consumption
        amount: Money,
        /// What the pool still held
        remaining: Money,
    },
}

#[derive(Debug, Clone, Copy)]
struct ActiveEntry {
    key: (DateTime<Utc>, u64),
    index: usize,
}

/// FIFO (by default) money age simulator for one rebuild run.
///
/// Owns every pool and consumption it creates until the run hands them to
/// a store via [`MoneyAgeCalculator::into_parts`]. Not meant to be shared
/// between runs.
#[derive(Debug, Clone, Default)]
pub struct MoneyAgeCalculator {
    strategy: ConsumptionStrategy,
    pools: Vec<ResourcePool>,
    by_id: HashMap<PoolId, usize>,
    /// Open pools, oldest first. Exhausted pools are evicted so long
    /// histories do not rescan drained incomes.
    active: Vec<ActiveEntry>,
    consumptions: Vec<ResourceConsumption>,
}

impl MoneyAgeCalculator {
    /// Creates a calculator using the given selection strategy
    #[must_use]
    pub fn new(strategy: ConsumptionStrategy) -> Self {
        Self {
            strategy,
            pools: Vec::new(),
            by_id: HashMap::new(),
            active: Vec::new(),
            consumptions: Vec::new(),
        }
    }

    /// Selection strategy in use
    #[must_use]
    pub const fn strategy(&self) -> ConsumptionStrategy {
        self.strategy
    }

    /// Opens a resource pool for an income transaction.
    ///
    /// The caller must not submit the same income twice.
    ///
    /// # Errors
    ///
    /// Returns [`CalculationError`] if the transaction is not an income or
    /// its amount is not positive.
    pub fn process_income(&mut self, tx: &Transaction) -> Result<&ResourcePool, CalculationError> {
        if tx.kind != TransactionKind::Income {
            return Err(CalculationError::UnsupportedKind {
                id: tx.id,
                kind: tx.kind,
                expected: TransactionKind::Income,
            });
        }
        if !tx.amount.is_positive() {
            return Err(CalculationError::NonPositiveIncome(tx.id));
        }

        let index = self.open(ResourcePool::from_income(tx));
        Ok(&self.pools[index])
    }

    /// Re-opens a stored pool at its original amount.
    ///
    /// Bookkeeping from earlier runs is cleared; apply the draws that still
    /// stand with [`MoneyAgeCalculator::replay_consumption`]. A pool already
    /// held is replaced.
    pub fn reopen_pool(&mut self, mut pool: ResourcePool) -> &ResourcePool {
        pool.remaining_amount = pool.original_amount;
        pool.consumption_count = 0;
        pool.first_consumed_at = None;
        pool.last_consumed_at = None;
        pool.fully_consumed_at = None;

        let held = self.by_id.get(&pool.id).copied();
        let index = match held {
            Some(index) => {
                self.active.retain(|e| e.index != index);
                self.pools[index] = pool;
                self.insert_active(index);
                index
            }
            None => self.open(pool),
        };
        &self.pools[index]
    }

    /// Applies a consumption recorded by an earlier run to the pool it drew
    /// from. Nothing is added to [`MoneyAgeCalculator::consumptions`].
    ///
    /// # Errors
    ///
    /// Returns [`CalculationError::UnknownPool`] if the pool is not held and
    /// [`CalculationError::Overdrawn`] if it has less left than the record
    /// took.
    pub fn replay_consumption(
        &mut self,
        consumption: &ResourceConsumption,
    ) -> Result<(), CalculationError> {
        let Some(&index) = self.by_id.get(&consumption.pool_id) else {
            return Err(CalculationError::UnknownPool(consumption.pool_id));
        };
        let pool = &mut self.pools[index];
        if consumption.amount_consumed > pool.remaining_amount {
            return Err(CalculationError::Overdrawn {
                pool: pool.id,
                amount: consumption.amount_consumed,
                remaining: pool.remaining_amount,
            });
        }
        if !consumption.amount_consumed.is_positive() {
            return Ok(());
        }

        pool.draw(consumption.amount_consumed, consumption.consumed_at);
        if pool.is_exhausted() {
            self.active.retain(|e| e.index != index);
        }
        Ok(())
    }

    /// Whether a pool with this id is held
    #[must_use]
    pub fn holds_pool(&self, id: PoolId) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Pool with this id, if held
    #[must_use]
    pub fn pool(&self, id: PoolId) -> Option<&ResourcePool> {
        self.by_id.get(&id).map(|&index| &self.pools[index])
    }

    fn open(&mut self, pool: ResourcePool) -> usize {
        let index = self.pools.len();
        self.by_id.insert(pool.id, index);
        self.pools.push(pool);
        self.insert_active(index);
        index
    }

    fn insert_active(&mut self, index: usize) {
        let pool = &self.pools[index];
        if pool.is_exhausted() {
            return;
        }
        let key = (pool.created_at, pool.source_sequence);
        let at = self.active.partition_point(|e| e.key <= key);
        self.active.insert(at, ActiveEntry { key, index });
    }

    /// Spends an expense against the open pools and returns its money age.
    ///
    /// # Errors
    ///
    /// Returns [`CalculationError`] if the transaction is not an expense or
    /// its amount is negative.
    pub fn process_expense(&mut self, tx: &Transaction) -> Result<MoneyAgeResult, CalculationError> {
        if tx.kind != TransactionKind::Expense {
            return Err(CalculationError::UnsupportedKind {
                id: tx.id,
                kind: tx.kind,
                expected: TransactionKind::Expense,
            });
        }
        if tx.amount.is_negative() {
            return Err(CalculationError::NegativeAmount(tx.id));
        }

        let mut weighted_age: i128 = 0;
        let mut covered = Money::ZERO;
        let mut pools_used = 0;
        let mut exhausted_any = false;
        for (index, amount) in self.plan(tx.amount) {
            let pool = &mut self.pools[index];
            let age = pool.age_in_days_at(tx.date);
            pool.draw(amount, tx.date);
            exhausted_any |= pool.is_exhausted();

            self.consumptions.push(ResourceConsumption {
                id: ConsumptionId::for_slice(pool.id, tx.id),
                pool_id: pool.id,
                consuming_transaction_id: tx.id,
                ledger_id: tx.ledger_id,
                account_id: tx.account_id,
                consumed_at: tx.date,
                amount_consumed: amount,
                age_in_days_at_consumption: age,
            });

            weighted_age += i128::from(amount.cents()) * i128::from(age);
            covered += amount;
            pools_used += 1;
        }

        if exhausted_any {
            let pools = &self.pools;
            self.active.retain(|e| !pools[e.index].is_exhausted());
        }

        Ok(MoneyAgeResult {
            transaction_id: tx.id,
            amount: tx.amount,
            money_age: weighted_average(weighted_age, tx.amount),
            shortfall: tx.amount - covered,
            pools_used,
        })
    }

    /// Pool indices and amounts an expense of `amount` draws.
    ///
    /// FIFO and LIFO walk the open pools from one end and stop once the
    /// expense is covered; only the proportional split reads every balance.
    fn plan(&self, amount: Money) -> Vec<(usize, Money)> {
        if !amount.is_positive() {
            return Vec::new();
        }
        match self.strategy {
            ConsumptionStrategy::Fifo => self.drain(self.active.iter(), amount),
            ConsumptionStrategy::Lifo => self.drain(self.active.iter().rev(), amount),
            ConsumptionStrategy::Proportional => {
                let remaining: Vec<Money> = self
                    .active
                    .iter()
                    .map(|e| self.pools[e.index].remaining_amount)
                    .collect();
                self.active
                    .iter()
                    .zip(self.strategy.allocate(&remaining, amount))
                    .filter(|(_, share)| share.is_positive())
                    .map(|(e, share)| (e.index, share))
                    .collect()
            }
        }
    }

    fn drain<'a>(
        &self,
        order: impl Iterator<Item = &'a ActiveEntry>,
        amount: Money,
    ) -> Vec<(usize, Money)> {
        let mut left = amount;
        let mut draws = Vec::new();
        for entry in order {
            if left.is_zero() {
                break;
            }
            let take = left.min(self.pools[entry.index].remaining_amount);
            if take.is_positive() {
                draws.push((entry.index, take));
                left -= take;
            }
        }
        draws
    }

    /// Remaining-weighted average age of the open pools at `now`:
    /// `Σ(remaining_i × age_i) / Σ(remaining_i)`.
    #[must_use]
    pub fn statistics(&self, now: DateTime<Utc>) -> PoolStatistics {
        let mut weighted: i128 = 0;
        let mut total_remaining = Money::ZERO;
        for entry in &self.active {
            let pool = &self.pools[entry.index];
            weighted += i128::from(pool.remaining_amount.cents()) * i128::from(pool.age_in_days_at(now));
            total_remaining += pool.remaining_amount;
        }

        PoolStatistics {
            total_pools: self.pools.len(),
            open_pools: self.active.len(),
            total_remaining,
            average_age_days: weighted_average(weighted, total_remaining),
        }
    }

    /// Every pool created this run, exhausted ones included
    #[must_use]
    pub fn pools(&self) -> &[ResourcePool] {
        &self.pools
    }

    /// Consumption records in the order they were produced
    #[must_use]
    pub fn consumptions(&self) -> &[ResourceConsumption] {
        &self.consumptions
    }

    /// Pools that still hold money, oldest first
    pub fn open_pools(&self) -> impl Iterator<Item = &ResourcePool> {
        self.active.iter().map(|e| &self.pools[e.index])
    }

    /// Hands the run's pools and consumptions over for persistence
    #[must_use]
    pub fn into_parts(self) -> (Vec<ResourcePool>, Vec<ResourceConsumption>) {
        (self.pools, self.consumptions)
    }
}

#[allow(clippy::cast_precision_loss)]
fn weighted_average(weighted: i128, total: Money) -> f64 {
    if total.is_positive() {
        weighted as f64 / total.cents() as f64
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AccountId, LedgerId, PoolId};
    use chrono::{Duration, TimeZone};

    struct Book {
        ledger: LedgerId,
        account: AccountId,
        origin: DateTime<Utc>,
        seq: u64,
    }

    impl Book {
        fn new() -> Self {
            Self {
                ledger: LedgerId::new(),
                account: AccountId::new(),
                origin: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single().unwrap_or_default(),
                seq: 0,
            }
        }

        fn tx(&mut self, kind: TransactionKind, major: i64, day: i64) -> Transaction {
            self.seq += 1;
            Transaction::new(
                kind,
                Money::from_major(major),
                self.origin + Duration::days(day),
                self.ledger,
                self.account,
                self.seq,
            )
        }
    }

    #[test]
    fn expense_spans_pools_oldest_first() -> Result<(), CalculationError> {
        let mut book = Book::new();
        let mut calc = MoneyAgeCalculator::default();
        let p1 = book.tx(TransactionKind::Income, 50, 0);
        let p2 = book.tx(TransactionKind::Income, 50, 5);
        calc.process_income(&p1)?;
        calc.process_income(&p2)?;

        let result = calc.process_expense(&book.tx(TransactionKind::Expense, 70, 10))?;

        let consumptions = calc.consumptions();
        assert_eq!(consumptions.len(), 2);
        assert_eq!(consumptions[0].pool_id, PoolId::for_income(p1.id));
        assert_eq!(consumptions[0].amount_consumed, Money::from_major(50));
        assert_eq!(consumptions[0].age_in_days_at_consumption, 10);
        assert_eq!(consumptions[1].pool_id, PoolId::for_income(p2.id));
        assert_eq!(consumptions[1].amount_consumed, Money::from_major(20));
        assert_eq!(consumptions[1].age_in_days_at_consumption, 5);
        assert!((result.money_age - 600.0 / 70.0).abs() < 1e-9);
        assert_eq!(result.pools_used, 2);
        assert!(result.shortfall.is_zero());
        Ok(())
    }

    #[test]
    fn exhausted_pool_leaves_active_scan() -> Result<(), CalculationError> {
        let mut book = Book::new();
        let mut calc = MoneyAgeCalculator::default();
        calc.process_income(&book.tx(TransactionKind::Income, 40, 0))?;
        calc.process_income(&book.tx(TransactionKind::Income, 60, 1))?;

        calc.process_expense(&book.tx(TransactionKind::Expense, 40, 3))?;
        assert_eq!(calc.open_pools().count(), 1);
        assert_eq!(calc.pools().len(), 2);
        assert!(calc.pools()[0].is_exhausted());

        let next = calc.process_expense(&book.tx(TransactionKind::Expense, 10, 4))?;
        assert_eq!(next.pools_used, 1);
        assert_eq!(next.money_age, 3.0);
        Ok(())
    }

    #[test]
    fn shortfall_counts_at_age_zero() -> Result<(), CalculationError> {
        let mut book = Book::new();
        let mut calc = MoneyAgeCalculator::default();
        calc.process_income(&book.tx(TransactionKind::Income, 30, 0))?;

        let result = calc.process_expense(&book.tx(TransactionKind::Expense, 100, 8))?;

        assert_eq!(result.shortfall, Money::from_major(70));
        assert!((result.money_age - 30.0 * 8.0 / 100.0).abs() < 1e-9);
        assert!(result.money_age < 8.0);
        assert_eq!(calc.consumptions().len(), 1);
        Ok(())
    }

    #[test]
    fn zero_expense_has_zero_age() -> Result<(), CalculationError> {
        let mut book = Book::new();
        let mut calc = MoneyAgeCalculator::default();
        calc.process_income(&book.tx(TransactionKind::Income, 30, 0))?;
        let result = calc.process_expense(&book.tx(TransactionKind::Expense, 0, 5))?;
        assert_eq!(result.money_age, 0.0);
        assert!(calc.consumptions().is_empty());
        Ok(())
    }

    #[test]
    fn rejects_invalid_input() {
        let mut book = Book::new();
        let mut calc = MoneyAgeCalculator::default();

        let zero_income = book.tx(TransactionKind::Income, 0, 0);
        assert_eq!(
            calc.process_income(&zero_income).err(),
            Some(CalculationError::NonPositiveIncome(zero_income.id))
        );

        let mut refund = book.tx(TransactionKind::Expense, 0, 0);
        refund.amount = Money::from_cents(-500);
        assert_eq!(
            calc.process_expense(&refund).err(),
            Some(CalculationError::NegativeAmount(refund.id))
        );

        let transfer = book.tx(TransactionKind::Transfer, 10, 0);
        assert!(matches!(
            calc.process_expense(&transfer),
            Err(CalculationError::UnsupportedKind { .. })
        ));
    }

    #[test]
    fn statistics_weight_open_pools_by_remaining() -> Result<(), CalculationError> {
        let mut book = Book::new();
        let mut calc = MoneyAgeCalculator::default();
        calc.process_income(&book.tx(TransactionKind::Income, 100, 0))?;
        calc.process_income(&book.tx(TransactionKind::Income, 300, 10))?;
        calc.process_expense(&book.tx(TransactionKind::Expense, 100, 12))?;

        let stats = calc.statistics(book.origin + Duration::days(20));
        assert_eq!(stats.total_pools, 2);
        assert_eq!(stats.open_pools, 1);
        assert_eq!(stats.total_remaining, Money::from_major(300));
        assert_eq!(stats.average_age_days, 10.0);
        Ok(())
    }

    #[test]
    fn late_recorded_income_is_ordered_by_date() -> Result<(), CalculationError> {
        let mut book = Book::new();
        let mut calc = MoneyAgeCalculator::default();
        let newer = book.tx(TransactionKind::Income, 10, 9);
        let older = book.tx(TransactionKind::Income, 10, 2);
        calc.process_income(&newer)?;
        calc.process_income(&older)?;

        calc.process_expense(&book.tx(TransactionKind::Expense, 5, 10))?;
        assert_eq!(calc.consumptions()[0].pool_id, PoolId::for_income(older.id));
        Ok(())
    }

    #[test]
    fn reopened_pools_resume_after_replayed_draws() -> Result<(), CalculationError> {
        let mut book = Book::new();
        let mut first_run = MoneyAgeCalculator::default();
        let income = book.tx(TransactionKind::Income, 100, 0);
        first_run.process_income(&income)?;
        first_run.process_expense(&book.tx(TransactionKind::Expense, 40, 5))?;
        let (pools, consumptions) = first_run.into_parts();

        let mut resumed = MoneyAgeCalculator::default();
        let reopened = resumed.reopen_pool(pools[0].clone());
        assert_eq!(reopened.remaining_amount, Money::from_major(100));
        assert_eq!(reopened.consumption_count, 0);
        resumed.replay_consumption(&consumptions[0])?;
        assert_eq!(resumed.pools()[0], pools[0]);
        assert!(resumed.consumptions().is_empty());

        let result = resumed.process_expense(&book.tx(TransactionKind::Expense, 60, 10))?;
        assert_eq!(result.money_age, 10.0);
        assert!(result.shortfall.is_zero());
        assert_eq!(resumed.open_pools().count(), 0);
        Ok(())
    }

    #[test]
    fn replay_rejects_unknown_and_overdrawn_pools() -> Result<(), CalculationError> {
        let mut book = Book::new();
        let mut source = MoneyAgeCalculator::default();
        source.process_income(&book.tx(TransactionKind::Income, 50, 0))?;
        source.process_expense(&book.tx(TransactionKind::Expense, 50, 1))?;
        let (pools, consumptions) = source.into_parts();

        let mut calc = MoneyAgeCalculator::default();
        assert_eq!(
            calc.replay_consumption(&consumptions[0]),
            Err(CalculationError::UnknownPool(pools[0].id))
        );

        calc.reopen_pool(pools[0].clone());
        calc.replay_consumption(&consumptions[0])?;
        assert!(matches!(
            calc.replay_consumption(&consumptions[0]),
            Err(CalculationError::Overdrawn { remaining, .. }) if remaining.is_zero()
        ));
        Ok(())
    }

    #[test]
    fn fifo_touches_only_the_pools_it_needs() -> Result<(), CalculationError> {
        let mut book = Book::new();
        let mut calc = MoneyAgeCalculator::default();
        for day in 0..50 {
            calc.process_income(&book.tx(TransactionKind::Income, 10, day))?;
        }

        let result = calc.process_expense(&book.tx(TransactionKind::Expense, 15, 60))?;

        assert_eq!(result.pools_used, 2);
        assert_eq!(calc.open_pools().count(), 49);
        assert_eq!(calc.consumptions().len(), 2);
        Ok(())
    }
}
