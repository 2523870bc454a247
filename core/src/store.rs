//! Collaborator traits for the transaction source and the pool store.
//!
//! Both traits return `Pin<Box<dyn Future>>` so they can be held as
//! `Arc<dyn TransactionSource>` / `Arc<dyn PoolStore>` and injected into
//! the rebuild orchestrator.
//!
//! # Implementations
//!
//! - `InMemoryTransactionSource` / `InMemoryPoolStore` in the
//!   `money-age-testing` crate
//! - Database-backed stores live with the host application; they must keep
//!   millisecond timestamps and minor-unit amounts.

use crate::{ResourceConsumption, ResourcePool, Transaction, TransactionFilter, TransactionId};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors from the transaction source or pool store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Reading from the backend failed
    #[error("Load failed: {0}")]
    Load(String),

    /// Writing to the backend failed
    #[error("Save failed: {0}")]
    Save(String),

    /// A referenced row does not exist
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Boxed future returned by the collaborator traits.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Source of ledger transactions.
pub trait TransactionSource: Send + Sync {
    /// Loads the transactions matching `filter`, ordered ascending by
    /// `(date, insertion order)`. All kinds are returned; callers drop
    /// transfers.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Load`] if the backend cannot be read.
    fn load_transactions(&self, filter: TransactionFilter) -> StoreFuture<'_, Vec<Transaction>>;
}

/// Everything a rebuild persists, applied as one logical unit.
#[derive(Clone, Debug, Default)]
pub struct SaveBatch {
    /// Scope to wipe before inserting, if the run replaces existing data
    pub replace_scope: Option<TransactionFilter>,
    /// Pools to upsert
    pub pools: Vec<ResourcePool>,
    /// Consumption records to upsert
    pub consumptions: Vec<ResourceConsumption>,
    /// Per-expense money ages to write back to the transactions
    pub transaction_ages: Vec<(TransactionId, f64)>,
}

/// Persistence for resource pools, consumption records and the money age
/// field of each expense.
pub trait PoolStore: Send + Sync {
    /// Deletes the pools whose income matches `scope`, the consumptions
    /// drawn from them, and the consumptions whose expense matches `scope`.
    /// Returns the number of pools removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Save`] if the delete fails.
    fn delete_all(&self, scope: TransactionFilter) -> StoreFuture<'_, usize>;

    /// Inserts or replaces pools by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Save`] if the write fails.
    fn upsert_pools(&self, pools: Vec<ResourcePool>) -> StoreFuture<'_, ()>;

    /// Inserts or replaces consumption records by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Save`] if the write fails.
    fn upsert_consumptions(&self, consumptions: Vec<ResourceConsumption>) -> StoreFuture<'_, ()>;

    /// Stores the money age of one expense transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Save`] if the write fails.
    fn update_transaction_age(&self, id: TransactionId, money_age: f64) -> StoreFuture<'_, ()>;

    /// Loads pools whose income matches `scope`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Load`] if the read fails.
    fn load_pools(&self, scope: TransactionFilter) -> StoreFuture<'_, Vec<ResourcePool>>;

    /// Loads consumptions whose expense matches `scope`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Load`] if the read fails.
    fn load_consumptions(
        &self,
        scope: TransactionFilter,
    ) -> StoreFuture<'_, Vec<ResourceConsumption>>;

    /// Stored money ages for the given transactions. Transactions never
    /// processed by a rebuild are absent from the map.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Load`] if the read fails.
    fn transaction_ages(&self, ids: Vec<TransactionId>)
    -> StoreFuture<'_, HashMap<TransactionId, f64>>;

    /// Applies a [`SaveBatch`].
    ///
    /// The default runs delete, upserts and age updates in sequence; stores
    /// with transactions should override it to make the batch atomic.
    ///
    /// # Errors
    ///
    /// Returns the first [`StoreError`] encountered. Earlier writes may
    /// have landed; callers treat the store as needing a fresh rebuild.
    fn save_batch(&self, batch: SaveBatch) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            if let Some(scope) = batch.replace_scope {
                self.delete_all(scope).await?;
            }
            self.upsert_pools(batch.pools).await?;
            self.upsert_consumptions(batch.consumptions).await?;
            for (id, age) in batch.transaction_ages {
                self.update_transaction_age(id, age).await?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records the calls the default `save_batch` makes.
    #[derive(Default)]
    struct CallLog {
        calls: Mutex<Vec<&'static str>>,
        fail_on: Option<&'static str>,
    }

    impl CallLog {
        fn hit(&self, call: &'static str) -> Result<()> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(call);
            }
            if self.fail_on == Some(call) {
                return Err(StoreError::Save(call.to_string()));
            }
            Ok(())
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().map(|c| c.clone()).unwrap_or_default()
        }
    }

    impl PoolStore for CallLog {
        fn delete_all(&self, _scope: TransactionFilter) -> StoreFuture<'_, usize> {
            Box::pin(async move { self.hit("delete").map(|()| 0) })
        }

        fn upsert_pools(&self, _pools: Vec<ResourcePool>) -> StoreFuture<'_, ()> {
            Box::pin(async move { self.hit("pools") })
        }

        fn upsert_consumptions(&self, _c: Vec<ResourceConsumption>) -> StoreFuture<'_, ()> {
            Box::pin(async move { self.hit("consumptions") })
        }

        fn update_transaction_age(&self, _id: TransactionId, _age: f64) -> StoreFuture<'_, ()> {
            Box::pin(async move { self.hit("age") })
        }

        fn load_pools(&self, _scope: TransactionFilter) -> StoreFuture<'_, Vec<ResourcePool>> {
            Box::pin(async { Ok(Vec::new()) })
        }

        fn load_consumptions(
            &self,
            _scope: TransactionFilter,
        ) -> StoreFuture<'_, Vec<ResourceConsumption>> {
            Box::pin(async { Ok(Vec::new()) })
        }

        fn transaction_ages(
            &self,
            _ids: Vec<TransactionId>,
        ) -> StoreFuture<'_, HashMap<TransactionId, f64>> {
            Box::pin(async { Ok(HashMap::new()) })
        }
    }

    fn batch(replace: bool) -> SaveBatch {
        SaveBatch {
            replace_scope: replace.then(TransactionFilter::all),
            transaction_ages: vec![(TransactionId::new(), 1.0), (TransactionId::new(), 2.0)],
            ..SaveBatch::default()
        }
    }

    #[test]
    fn default_save_batch_deletes_before_writing() {
        let store = CallLog::default();
        let outcome = tokio_test::block_on(store.save_batch(batch(true)));
        assert!(outcome.is_ok());
        assert_eq!(store.calls(), vec!["delete", "pools", "consumptions", "age", "age"]);
    }

    #[test]
    fn default_save_batch_skips_delete_without_scope() {
        let store = CallLog::default();
        let outcome = tokio_test::block_on(store.save_batch(batch(false)));
        assert!(outcome.is_ok());
        assert_eq!(store.calls(), vec!["pools", "consumptions", "age", "age"]);
    }

    #[test]
    fn default_save_batch_stops_at_first_error() {
        let store = CallLog {
            fail_on: Some("pools"),
            ..CallLog::default()
        };
        let outcome = tokio_test::block_on(store.save_batch(batch(true)));
        assert_eq!(outcome, Err(StoreError::Save("pools".to_string())));
        assert_eq!(store.calls(), vec!["delete", "pools"]);
    }
}
