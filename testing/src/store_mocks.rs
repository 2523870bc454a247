//! In-memory collaborators for fast, deterministic rebuild tests
//!
//! - [`InMemoryTransactionSource`]: Vec-backed transaction history
//! - [`InMemoryPoolStore`]: HashMap-backed pools, consumptions and ages
//! - [`GatedTransactionSource`]: holds loads until a test opens the gate
//! - [`FailPoint`]: fault injection for load and save paths

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use money_age_core::store::Result;
use money_age_core::{
    ConsumptionId, Money, PoolId, PoolStore, ResourceConsumption, ResourcePool, SaveBatch,
    StoreError, StoreFuture, Transaction, TransactionFilter, TransactionId, TransactionSource,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{Notify, watch};

/// Where an injected failure fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailPoint {
    /// Loading transactions, pools or consumptions
    Load,
    /// Deleting pools and consumptions
    Delete,
    /// Upserting pools or consumptions
    Upsert,
    /// Writing a transaction's money age
    AgeUpdate,
}

/// In-memory transaction history.
///
/// Sequences are assigned on insertion when `push` is used; `insert` keeps
/// the transaction as given.
///
/// # Example
///
/// ```
/// use money_age_testing::{InMemoryTransactionSource, LedgerFixture};
/// use money_age_core::{TransactionFilter, TransactionSource};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let mut ledger = LedgerFixture::new();
/// let source = InMemoryTransactionSource::with_transactions(vec![
///     ledger.expense(10, 5),
///     ledger.income(100, 1),
/// ]);
///
/// let loaded = source.load_transactions(TransactionFilter::all()).await?;
/// assert!(loaded[0].is_income());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryTransactionSource {
    transactions: Arc<RwLock<Vec<Transaction>>>,
    next_sequence: Arc<AtomicU64>,
    failing: Arc<RwLock<bool>>,
}

impl InMemoryTransactionSource {
    /// Create an empty source
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a source holding `transactions`
    #[must_use]
    pub fn with_transactions(transactions: Vec<Transaction>) -> Self {
        let source = Self::new();
        source.extend(transactions);
        source
    }

    /// Add a transaction as-is
    pub fn insert(&self, transaction: Transaction) {
        self.next_sequence
            .fetch_max(transaction.sequence + 1, Ordering::Relaxed);
        self.transactions.write().unwrap().push(transaction);
    }

    /// Add several transactions as-is
    pub fn extend(&self, transactions: impl IntoIterator<Item = Transaction>) {
        for transaction in transactions {
            self.insert(transaction);
        }
    }

    /// Add a transaction, assigning it the next insertion sequence
    pub fn push(&self, mut transaction: Transaction) -> Transaction {
        transaction.sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        self.transactions.write().unwrap().push(transaction.clone());
        transaction
    }

    /// Remove a transaction by id
    pub fn remove(&self, id: TransactionId) {
        self.transactions.write().unwrap().retain(|t| t.id != id);
    }

    /// Make every subsequent load fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        *self.failing.write().unwrap() = failing;
    }

    /// Number of stored transactions
    #[must_use]
    pub fn len(&self) -> usize {
        self.transactions.read().unwrap().len()
    }

    /// Whether the source is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transactions.read().unwrap().is_empty()
    }
}

impl TransactionSource for InMemoryTransactionSource {
    fn load_transactions(&self, filter: TransactionFilter) -> StoreFuture<'_, Vec<Transaction>> {
        Box::pin(async move {
            if *self.failing.read().unwrap() {
                return Err(StoreError::Load("transaction source unavailable".to_string()));
            }
            let mut matching: Vec<Transaction> = self
                .transactions
                .read()
                .unwrap()
                .iter()
                .filter(|t| filter.matches(t))
                .cloned()
                .collect();
            matching.sort_by_key(Transaction::ordering_key);
            Ok(matching)
        })
    }
}

/// Handle that releases a [`GatedTransactionSource`].
#[derive(Debug)]
pub struct SourceGate {
    open: watch::Sender<bool>,
    entered: Arc<Notify>,
}

impl SourceGate {
    /// Let pending and future loads through
    pub fn open(&self) {
        let _ = self.open.send(true);
    }

    /// Wait until some caller is blocked inside `load_transactions`
    pub async fn loading_started(&self) {
        self.entered.notified().await;
    }
}

/// Transaction source whose loads block until the paired [`SourceGate`]
/// is opened. Lets tests act while a rebuild is known to be in flight.
#[derive(Debug)]
pub struct GatedTransactionSource<S> {
    inner: S,
    open: watch::Receiver<bool>,
    entered: Arc<Notify>,
}

impl<S: TransactionSource> GatedTransactionSource<S> {
    /// Wrap `inner`; loads wait for the returned gate
    #[must_use]
    pub fn new(inner: S) -> (Self, SourceGate) {
        let (open_tx, open_rx) = watch::channel(false);
        let entered = Arc::new(Notify::new());
        (
            Self {
                inner,
                open: open_rx,
                entered: Arc::clone(&entered),
            },
            SourceGate {
                open: open_tx,
                entered,
            },
        )
    }
}

impl<S: TransactionSource> TransactionSource for GatedTransactionSource<S> {
    fn load_transactions(&self, filter: TransactionFilter) -> StoreFuture<'_, Vec<Transaction>> {
        Box::pin(async move {
            self.entered.notify_one();
            let mut open = self.open.clone();
            open.wait_for(|is_open| *is_open)
                .await
                .map_err(|e| StoreError::Load(format!("gate dropped: {e}")))?;
            self.inner.load_transactions(filter).await
        })
    }
}

#[derive(Debug, Default)]
struct PoolTables {
    pools: HashMap<PoolId, ResourcePool>,
    consumptions: HashMap<ConsumptionId, ResourceConsumption>,
    ages: HashMap<TransactionId, f64>,
}

impl PoolTables {
    fn delete_scope(&mut self, scope: &TransactionFilter) -> usize {
        let doomed: HashSet<PoolId> = self
            .pools
            .values()
            .filter(|p| scope.matches_parts(p.ledger_id, p.account_id, p.created_at))
            .map(|p| p.id)
            .collect();
        self.pools.retain(|id, _| !doomed.contains(id));
        self.consumptions.retain(|_, c| {
            !doomed.contains(&c.pool_id)
                && !scope.matches_parts(c.ledger_id, c.account_id, c.consumed_at)
        });
        doomed.len()
    }
}

/// In-memory pool store for fast, deterministic testing.
///
/// `save_batch` is applied under a single write lock, so a batch either
/// lands completely or (on an injected failure) not at all.
///
/// # Example
///
/// ```
/// use money_age_testing::InMemoryPoolStore;
/// use money_age_core::{PoolStore, TransactionId};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryPoolStore::new();
/// let expense = TransactionId::new();
/// store.update_transaction_age(expense, 12.5).await?;
/// assert_eq!(store.age_of(expense), Some(12.5));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryPoolStore {
    tables: Arc<RwLock<PoolTables>>,
    fail_points: Arc<RwLock<HashSet<FailPoint>>>,
    saves: Arc<AtomicU64>,
}

impl InMemoryPoolStore {
    /// Create a new empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm an injected failure
    pub fn fail_on(&self, point: FailPoint) {
        self.fail_points.write().unwrap().insert(point);
    }

    /// Disarm all injected failures
    pub fn clear_failures(&self) {
        self.fail_points.write().unwrap().clear();
    }

    fn check(&self, point: FailPoint) -> Result<()> {
        if self.fail_points.read().unwrap().contains(&point) {
            let message = format!("injected {point:?} failure");
            return Err(match point {
                FailPoint::Load => StoreError::Load(message),
                FailPoint::Delete | FailPoint::Upsert | FailPoint::AgeUpdate => {
                    StoreError::Save(message)
                }
            });
        }
        Ok(())
    }

    /// Insert rows directly, bypassing validation (for corrupt-data tests)
    pub fn seed(&self, pools: Vec<ResourcePool>, consumptions: Vec<ResourceConsumption>) {
        let mut tables = self.tables.write().unwrap();
        tables.pools.extend(pools.into_iter().map(|p| (p.id, p)));
        tables
            .consumptions
            .extend(consumptions.into_iter().map(|c| (c.id, c)));
    }

    /// Overwrite the remaining amount of a stored pool
    pub fn set_remaining(&self, id: PoolId, remaining: Money) {
        if let Some(pool) = self.tables.write().unwrap().pools.get_mut(&id) {
            pool.remaining_amount = remaining;
        }
    }

    /// All stored pools, oldest first
    #[must_use]
    pub fn pools(&self) -> Vec<ResourcePool> {
        let mut pools: Vec<_> = self.tables.read().unwrap().pools.values().cloned().collect();
        pools.sort_by_key(|p| (p.created_at, p.id));
        pools
    }

    /// All stored consumptions, by date
    #[must_use]
    pub fn consumptions(&self) -> Vec<ResourceConsumption> {
        let mut consumptions: Vec<_> = self
            .tables
            .read()
            .unwrap()
            .consumptions
            .values()
            .cloned()
            .collect();
        consumptions.sort_by_key(|c| (c.consumed_at, c.id));
        consumptions
    }

    /// Stored money age of a transaction
    #[must_use]
    pub fn age_of(&self, id: TransactionId) -> Option<f64> {
        self.tables.read().unwrap().ages.get(&id).copied()
    }

    /// Number of stored pools
    #[must_use]
    pub fn pool_count(&self) -> usize {
        self.tables.read().unwrap().pools.len()
    }

    /// Number of stored consumptions
    #[must_use]
    pub fn consumption_count(&self) -> usize {
        self.tables.read().unwrap().consumptions.len()
    }

    /// Number of successful `save_batch` calls
    #[must_use]
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::Relaxed)
    }
}

impl PoolStore for InMemoryPoolStore {
    fn delete_all(&self, scope: TransactionFilter) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            self.check(FailPoint::Delete)?;
            Ok(self.tables.write().unwrap().delete_scope(&scope))
        })
    }

    fn upsert_pools(&self, pools: Vec<ResourcePool>) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.check(FailPoint::Upsert)?;
            let mut tables = self.tables.write().unwrap();
            tables.pools.extend(pools.into_iter().map(|p| (p.id, p)));
            Ok(())
        })
    }

    fn upsert_consumptions(&self, consumptions: Vec<ResourceConsumption>) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.check(FailPoint::Upsert)?;
            let mut tables = self.tables.write().unwrap();
            tables
                .consumptions
                .extend(consumptions.into_iter().map(|c| (c.id, c)));
            Ok(())
        })
    }

    fn update_transaction_age(&self, id: TransactionId, money_age: f64) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.check(FailPoint::AgeUpdate)?;
            self.tables.write().unwrap().ages.insert(id, money_age);
            Ok(())
        })
    }

    fn load_pools(&self, scope: TransactionFilter) -> StoreFuture<'_, Vec<ResourcePool>> {
        Box::pin(async move {
            self.check(FailPoint::Load)?;
            Ok(self
                .pools()
                .into_iter()
                .filter(|p| scope.matches_parts(p.ledger_id, p.account_id, p.created_at))
                .collect())
        })
    }

    fn load_consumptions(
        &self,
        scope: TransactionFilter,
    ) -> StoreFuture<'_, Vec<ResourceConsumption>> {
        Box::pin(async move {
            self.check(FailPoint::Load)?;
            Ok(self
                .consumptions()
                .into_iter()
                .filter(|c| scope.matches_parts(c.ledger_id, c.account_id, c.consumed_at))
                .collect())
        })
    }

    fn transaction_ages(
        &self,
        ids: Vec<TransactionId>,
    ) -> StoreFuture<'_, HashMap<TransactionId, f64>> {
        Box::pin(async move {
            self.check(FailPoint::Load)?;
            let tables = self.tables.read().unwrap();
            Ok(ids
                .into_iter()
                .filter_map(|id| tables.ages.get(&id).map(|age| (id, *age)))
                .collect())
        })
    }

    fn save_batch(&self, batch: SaveBatch) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            if batch.replace_scope.is_some() {
                self.check(FailPoint::Delete)?;
            }
            self.check(FailPoint::Upsert)?;
            if !batch.transaction_ages.is_empty() {
                self.check(FailPoint::AgeUpdate)?;
            }

            let mut tables = self.tables.write().unwrap();
            if let Some(scope) = batch.replace_scope {
                tables.delete_scope(&scope);
            }
            tables.pools.extend(batch.pools.into_iter().map(|p| (p.id, p)));
            tables
                .consumptions
                .extend(batch.consumptions.into_iter().map(|c| (c.id, c)));
            tables.ages.extend(batch.transaction_ages);
            drop(tables);

            self.saves.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    }
}
