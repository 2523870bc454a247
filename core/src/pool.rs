//! Resource pools, consumption records and per-expense results.

use crate::transaction::uuid_id;
use crate::{AccountId, LedgerId, Money, Transaction, TransactionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const POOL_NAMESPACE: Uuid = Uuid::from_u128(0x6d6f_6e65_7941_6765_506f_6f6c_4e53_0001);
const CONSUMPTION_NAMESPACE: Uuid = Uuid::from_u128(0x6d6f_6e65_7941_6765_436f_6e73_4e53_0002);

uuid_id!(
    /// Unique identifier for a resource pool
    PoolId
);
uuid_id!(
    /// Unique identifier for a consumption record
    ConsumptionId
);

impl PoolId {
    /// Deterministic pool id for the income transaction that created it.
    ///
    /// Rebuilding the same history yields the same ids, so store upserts
    /// replace rows instead of duplicating them.
    #[must_use]
    pub fn for_income(income: TransactionId) -> Self {
        Self(Uuid::new_v5(&POOL_NAMESPACE, income.as_uuid().as_bytes()))
    }
}

impl ConsumptionId {
    /// Deterministic id for the slice of `pool` consumed by `expense`.
    #[must_use]
    pub fn for_slice(pool: PoolId, expense: TransactionId) -> Self {
        let mut name = [0_u8; 32];
        name[..16].copy_from_slice(pool.as_uuid().as_bytes());
        name[16..].copy_from_slice(expense.as_uuid().as_bytes());
        Self(Uuid::new_v5(&CONSUMPTION_NAMESPACE, &name))
    }
}

/// Remaining balance of one income transaction.
///
/// Invariant: `0 ≤ remaining_amount ≤ original_amount`. Created once per
/// income, mutated only by consumption.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePool {
    /// Pool identifier, derived from the source transaction
    pub id: PoolId,
    /// Income transaction that created this pool
    pub source_transaction_id: TransactionId,
    /// Ledger of the source income
    pub ledger_id: LedgerId,
    /// Account holding the income
    pub account_id: AccountId,
    /// When the income was received
    pub created_at: DateTime<Utc>,
    /// Insertion order of the income; breaks ties between same-date pools
    #[serde(default)]
    pub source_sequence: u64,
    /// Income amount
    pub original_amount: Money,
    /// Unspent part of the income
    pub remaining_amount: Money,
    /// Number of consumption records drawn from this pool
    pub consumption_count: u32,
    /// Date of the first consumption
    pub first_consumed_at: Option<DateTime<Utc>>,
    /// Date of the most recent consumption
    pub last_consumed_at: Option<DateTime<Utc>>,
    /// Date the pool reached zero
    pub fully_consumed_at: Option<DateTime<Utc>>,
}

impl ResourcePool {
    /// Opens a pool holding the full amount of an income transaction.
    #[must_use]
    pub fn from_income(income: &Transaction) -> Self {
        Self {
            id: PoolId::for_income(income.id),
            source_transaction_id: income.id,
            ledger_id: income.ledger_id,
            account_id: income.account_id,
            created_at: income.date,
            source_sequence: income.sequence,
            original_amount: income.amount,
            remaining_amount: income.amount,
            consumption_count: 0,
            first_consumed_at: None,
            last_consumed_at: None,
            fully_consumed_at: None,
        }
    }

    /// Amount consumed so far
    #[must_use]
    pub fn consumed_amount(&self) -> Money {
        self.original_amount - self.remaining_amount
    }

    /// Whether nothing is left in the pool
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.remaining_amount.cents() <= 0
    }

    /// Whole days between pool creation and `at`, clamped at zero.
    #[must_use]
    pub fn age_in_days_at(&self, at: DateTime<Utc>) -> i64 {
        (at - self.created_at).num_days().max(0)
    }

    /// Draws `amount` out of the pool at `at` and updates the bookkeeping
    /// dates. Callers never draw more than `remaining_amount`.
    pub(crate) fn draw(&mut self, amount: Money, at: DateTime<Utc>) {
        self.remaining_amount -= amount;
        self.consumption_count += 1;
        self.first_consumed_at.get_or_insert(at);
        self.last_consumed_at = Some(at);
        if self.is_exhausted() {
            self.fully_consumed_at = Some(at);
        }
    }
}

/// Record of part of a pool being spent by one expense. Immutable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConsumption {
    /// Record identifier
    pub id: ConsumptionId,
    /// Pool the money came from
    pub pool_id: PoolId,
    /// Expense that spent it
    pub consuming_transaction_id: TransactionId,
    /// Ledger of the expense
    pub ledger_id: LedgerId,
    /// Account of the expense
    pub account_id: AccountId,
    /// Expense date
    pub consumed_at: DateTime<Utc>,
    /// Amount taken from the pool
    pub amount_consumed: Money,
    /// `consumed_at − pool.created_at` in whole days
    pub age_in_days_at_consumption: i64,
}

/// Money age of one processed expense.
///
/// Derived and ephemeral: used to update the transaction's stored age.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MoneyAgeResult {
    /// Expense transaction
    pub transaction_id: TransactionId,
    /// Expense amount
    pub amount: Money,
    /// Amount-weighted average age in days of the money spent
    pub money_age: f64,
    /// Part of the expense not covered by any pool, counted at age zero
    pub shortfall: Money,
    /// Number of pools the expense drew from
    pub pools_used: usize,
}

/// Snapshot of the pools held by a calculator.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolStatistics {
    /// Pools created during the run, including exhausted ones
    pub total_pools: usize,
    /// Pools with money left
    pub open_pools: usize,
    /// Sum of remaining balances
    pub total_remaining: Money,
    /// Remaining-weighted age of open pools, in days
    pub average_age_days: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TransactionKind;
    use chrono::{Duration, TimeZone};

    fn income(amount: i64) -> Transaction {
        Transaction::new(
            TransactionKind::Income,
            Money::from_major(amount),
            Utc.with_ymd_and_hms(2025, 3, 1, 9, 30, 0).single().unwrap_or_default(),
            LedgerId::new(),
            AccountId::new(),
            0,
        )
    }

    #[test]
    fn ids_are_derived_deterministically() {
        let tx = income(10);
        assert_eq!(PoolId::for_income(tx.id), PoolId::for_income(tx.id));

        let pool = PoolId::for_income(tx.id);
        let expense = TransactionId::new();
        assert_eq!(
            ConsumptionId::for_slice(pool, expense),
            ConsumptionId::for_slice(pool, expense)
        );
        assert_ne!(
            ConsumptionId::for_slice(pool, expense),
            ConsumptionId::for_slice(pool, TransactionId::new())
        );
    }

    #[test]
    fn draw_tracks_consumption_dates() {
        let tx = income(50);
        let mut pool = ResourcePool::from_income(&tx);
        let first = tx.date + Duration::days(2);
        let second = tx.date + Duration::days(4);

        pool.draw(Money::from_major(20), first);
        assert_eq!(pool.remaining_amount, Money::from_major(30));
        assert_eq!(pool.first_consumed_at, Some(first));
        assert!(pool.fully_consumed_at.is_none());

        pool.draw(Money::from_major(30), second);
        assert!(pool.is_exhausted());
        assert_eq!(pool.consumed_amount(), Money::from_major(50));
        assert_eq!(pool.consumption_count, 2);
        assert_eq!(pool.first_consumed_at, Some(first));
        assert_eq!(pool.fully_consumed_at, Some(second));
    }

    #[test]
    fn age_is_whole_days_and_never_negative() {
        let pool = ResourcePool::from_income(&income(1));
        assert_eq!(pool.age_in_days_at(pool.created_at + Duration::hours(47)), 1);
        assert_eq!(pool.age_in_days_at(pool.created_at - Duration::days(3)), 0);
    }
}
