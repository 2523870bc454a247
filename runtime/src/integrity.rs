//! Read-only integrity validation of stored money age data.
//!
//! Compares what the pool store holds against the transaction source and
//! reports every inconsistency found. Never writes; a report only
//! *recommends* a full rebuild.

use money_age_core::{
    ConsumptionId, DateTime, Money, PoolId, PoolStore, ResourceConsumption, ResourcePool,
    StoreError, TransactionFilter, TransactionKind, TransactionSource, Utc,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// One inconsistency between stored pools, consumptions and transactions.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegrityViolation {
    /// Stored pools do not match the number of positive incomes
    #[error("{pools} pools stored for {incomes} income transactions")]
    PoolCountMismatch {
        /// Stored pools
        pools: usize,
        /// Income transactions with a positive amount
        incomes: usize,
    },

    /// A pool holds a negative remaining amount
    #[error("Pool {pool} has negative remaining amount {remaining}")]
    NegativeRemaining {
        /// Offending pool
        pool: PoolId,
        /// Its remaining amount
        remaining: Money,
    },

    /// A pool holds more than it started with
    #[error("Pool {pool} remaining {remaining} exceeds original {original}")]
    RemainingExceedsOriginal {
        /// Offending pool
        pool: PoolId,
        /// Its remaining amount
        remaining: Money,
        /// Its original amount
        original: Money,
    },

    /// Consumptions of a pool do not add up to what it lost
    #[error("Pool {pool} consumptions total {consumed}, expected {expected}")]
    ConservationBroken {
        /// Offending pool
        pool: PoolId,
        /// Sum of stored consumptions
        consumed: Money,
        /// `original - remaining`
        expected: Money,
    },

    /// A consumption points at a pool that is not stored
    #[error("Consumption {consumption} references missing pool {pool}")]
    OrphanConsumption {
        /// Offending consumption
        consumption: ConsumptionId,
        /// Pool it references
        pool: PoolId,
    },
}

/// Outcome of an integrity check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    /// Income transactions with a positive amount
    pub income_count: usize,
    /// Stored pools
    pub pool_count: usize,
    /// Stored consumptions
    pub consumption_count: usize,
    /// Every inconsistency found
    pub violations: Vec<IntegrityViolation>,
    /// Whether a full rebuild is recommended
    pub rebuild_recommended: bool,
    /// When the check ran
    pub checked_at: DateTime<Utc>,
}

impl IntegrityReport {
    /// Whether no violation was found
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Checks stored pools and consumptions against the transaction source.
#[derive(Clone)]
pub struct IntegrityValidator {
    source: Arc<dyn TransactionSource>,
    store: Arc<dyn PoolStore>,
}

impl IntegrityValidator {
    /// Create a validator over the given collaborators
    #[must_use]
    pub fn new(source: Arc<dyn TransactionSource>, store: Arc<dyn PoolStore>) -> Self {
        Self { source, store }
    }

    /// Run every check over the whole store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if transactions, pools or consumptions cannot
    /// be loaded.
    pub async fn validate(&self, checked_at: DateTime<Utc>) -> Result<IntegrityReport, StoreError> {
        let scope = TransactionFilter::all();
        let transactions = self.source.load_transactions(scope).await?;
        let pools = self.store.load_pools(scope).await?;
        let consumptions = self.store.load_consumptions(scope).await?;

        let income_count = transactions
            .iter()
            .filter(|t| t.kind == TransactionKind::Income && t.amount.is_positive())
            .count();
        let violations = check(income_count, &pools, &consumptions);

        for violation in &violations {
            tracing::warn!(%violation, "Money age integrity violation");
        }

        Ok(IntegrityReport {
            income_count,
            pool_count: pools.len(),
            consumption_count: consumptions.len(),
            rebuild_recommended: !violations.is_empty(),
            violations,
            checked_at,
        })
    }
}

fn check(
    income_count: usize,
    pools: &[ResourcePool],
    consumptions: &[ResourceConsumption],
) -> Vec<IntegrityViolation> {
    let mut violations = Vec::new();

    if pools.len() != income_count {
        violations.push(IntegrityViolation::PoolCountMismatch {
            pools: pools.len(),
            incomes: income_count,
        });
    }

    let mut consumed: HashMap<PoolId, Money> = pools.iter().map(|p| (p.id, Money::ZERO)).collect();
    for consumption in consumptions {
        match consumed.get_mut(&consumption.pool_id) {
            Some(total) => *total += consumption.amount_consumed,
            None => violations.push(IntegrityViolation::OrphanConsumption {
                consumption: consumption.id,
                pool: consumption.pool_id,
            }),
        }
    }

    for pool in pools {
        if pool.remaining_amount.is_negative() {
            violations.push(IntegrityViolation::NegativeRemaining {
                pool: pool.id,
                remaining: pool.remaining_amount,
            });
        }
        if pool.remaining_amount > pool.original_amount {
            violations.push(IntegrityViolation::RemainingExceedsOriginal {
                pool: pool.id,
                remaining: pool.remaining_amount,
                original: pool.original_amount,
            });
        }
        let total = consumed.get(&pool.id).copied().unwrap_or_default();
        if total != pool.consumed_amount() {
            violations.push(IntegrityViolation::ConservationBroken {
                pool: pool.id,
                consumed: total,
                expected: pool.consumed_amount(),
            });
        }
    }

    violations
}
