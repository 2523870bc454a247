//! The rebuild orchestrator.
//!
//! # Pipeline
//!
//! ```text
//! Preparing ─► [Cleaning] ─► Loading ─► ProcessingIncomes ─► ProcessingExpenses
//!                                                                    │
//!                      Completed ◄── Saving ◄── Calculating ◄────────┘
//!
//! any stage ─► Failed   (error or cancellation)
//! ```
//!
//! Every income in scope is turned into a pool before any
//! expense is processed, so expenses are aged against the full income
//! history known at rebuild time. Expenses then run in `(date, sequence)`
//! order.
//!
//! A run with `clean_before_rebuild == false` resumes from the store
//! instead: pools dated before the range are re-opened, the stored draws of
//! expenses outside the scope are replayed onto every pool, and only then
//! are the expenses in scope recomputed. The pools it saves balance against
//! the consumptions left in the store.
//!
//! Every `batch_size` transactions the orchestrator publishes progress,
//! yields to the runtime and checks the cancellation flag. Nothing is
//! written until the save stage, which hands the whole result to
//! [`PoolStore::save_batch`] as one unit.
//!
//! # Concurrency
//!
//! One run at a time per orchestrator. A second request fails fast with
//! [`RebuildError::RebuildInProgress`]; it is never queued. A cancellation
//! request is tied to the run holding the busy flag when it is made, so it
//! can neither be lost at the start of a run nor leak into the next one.

use crate::config::{MoneyAgeConfig, RebuildConfig};
use crate::error::RebuildError;
use crate::integrity::{IntegrityReport, IntegrityValidator};
use crate::metrics::RebuildMetrics;
use crate::progress::ProgressBroadcaster;
use crate::queries::{MoneyAgeQueries, weighted_mean};
use money_age_core::{
    CalculationError, Clock, DateRange, DateTime, Money, MoneyAgeCalculator, MoneyAgeResult,
    PoolStatistics, PoolStore, RebuildProgress, RebuildStage, ResourceConsumption, ResourcePool,
    SaveBatch, StoreError, SystemClock, Transaction, TransactionFilter, TransactionKind,
    TransactionSource, Utc,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Outcome of a rebuild run.
///
/// Rebuild operations always return one of these; failures are reported
/// through `success == false` and [`RebuildResult::error`].
#[derive(Debug, Clone, PartialEq)]
pub struct RebuildResult {
    /// Whether results were saved
    pub success: bool,
    /// Incomes turned into pools
    pub income_count: usize,
    /// Expenses processed
    pub expense_count: usize,
    /// Pools saved
    pub pool_count: usize,
    /// Consumptions saved
    pub consumption_count: usize,
    /// Amount-weighted mean money age of this run's expenses, in days
    pub average_money_age: f64,
    /// Open-pool statistics at the end of the run
    pub statistics: PoolStatistics,
    /// Expenses that exceeded the pooled funds
    pub uncovered_expenses: usize,
    /// Wall-clock duration
    pub duration_ms: u64,
    /// When the run finished
    pub rebuilt_at: DateTime<Utc>,
    /// `Completed`, or the stage the run stopped in
    pub stage: RebuildStage,
    /// Whether an eager wipe removed stored data before the run stopped
    pub store_cleared: bool,
    /// Why the run failed
    pub error: Option<RebuildError>,
}

impl RebuildResult {
    fn failed(error: RebuildError, run: &RunState<'_>, elapsed: Duration, at: DateTime<Utc>) -> Self {
        Self {
            success: false,
            income_count: run.income_count,
            expense_count: run.expense_count,
            pool_count: 0,
            consumption_count: 0,
            average_money_age: 0.0,
            statistics: PoolStatistics::default(),
            uncovered_expenses: 0,
            duration_ms: millis(elapsed),
            rebuilt_at: at,
            stage: run.stage,
            store_cleared: run.store_cleared,
            error: Some(error),
        }
    }

    fn rejected(elapsed: Duration, at: DateTime<Utc>) -> Self {
        Self {
            success: false,
            income_count: 0,
            expense_count: 0,
            pool_count: 0,
            consumption_count: 0,
            average_money_age: 0.0,
            statistics: PoolStatistics::default(),
            uncovered_expenses: 0,
            duration_ms: millis(elapsed),
            rebuilt_at: at,
            stage: RebuildStage::Preparing,
            store_cleared: false,
            error: Some(RebuildError::RebuildInProgress),
        }
    }

    /// Whether the run stopped because cancellation was requested
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.error, Some(RebuildError::Cancelled { .. }))
    }

    /// One-line, user-facing description of the outcome
    #[must_use]
    pub fn summary(&self) -> String {
        match &self.error {
            None => format!(
                "rebuild completed: {} pools, {} consumptions, average money age {:.1} days",
                self.pool_count, self.consumption_count, self.average_money_age
            ),
            Some(error) if self.store_cleared => format!(
                "rebuild failed: {error}, existing money age data in scope was removed; run a full rebuild"
            ),
            Some(error @ RebuildError::Save(_)) => format!(
                "rebuild failed: {error}, stored data may be incomplete; run a full rebuild"
            ),
            Some(error) => format!("rebuild failed: {error}, data unchanged"),
        }
    }
}

/// Mutable bookkeeping of one run: stage, counters and progress output.
struct RunState<'a> {
    progress: &'a ProgressBroadcaster,
    generation: u64,
    stage: RebuildStage,
    total: usize,
    income_count: usize,
    expense_count: usize,
    processed_incomes: usize,
    processed_expenses: usize,
    store_cleared: bool,
}

impl<'a> RunState<'a> {
    fn start(progress: &'a ProgressBroadcaster, generation: u64) -> Self {
        let run = Self {
            progress,
            generation,
            stage: RebuildStage::Preparing,
            total: 0,
            income_count: 0,
            expense_count: 0,
            processed_incomes: 0,
            processed_expenses: 0,
            store_cleared: false,
        };
        run.report();
        run
    }

    /// Moves to `next` and publishes progress. Backward moves are refused.
    fn advance(&mut self, next: RebuildStage) {
        if !self.stage.can_advance_to(next) {
            tracing::error!(from = ?self.stage, to = ?next, "Refused rebuild stage transition");
            return;
        }
        tracing::info!(stage = ?next, "{}", next.description());
        self.stage = next;
        self.report();
    }

    fn report(&self) {
        self.progress.report(
            self.stage,
            self.total,
            self.processed_incomes,
            self.processed_expenses,
        );
    }
}

/// Busy flag and cancellation target of an orchestrator.
///
/// `state` packs `generation << 1 | busy`, so a cancel reads the busy bit
/// and the generation of the run it targets in one load.
#[derive(Debug, Default)]
struct RunControl {
    state: AtomicU64,
    cancelled: AtomicU64,
}

impl RunControl {
    /// Takes the busy flag for a new generation, or `None` if a run holds it
    fn acquire(&self) -> Option<RunGuard<'_>> {
        let current = self.state.load(Ordering::Acquire);
        if current & 1 == 1 {
            return None;
        }
        let next = current + 3;
        self.state
            .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard {
                control: self,
                generation: next >> 1,
            })
    }

    fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) & 1 == 1
    }

    /// Marks the running generation as cancelled. Returns false when idle.
    fn request_cancel(&self) -> bool {
        let current = self.state.load(Ordering::Acquire);
        if current & 1 == 0 {
            return false;
        }
        self.cancelled.store(current >> 1, Ordering::Release);
        true
    }

    fn is_cancelled(&self, generation: u64) -> bool {
        self.cancelled.load(Ordering::Acquire) == generation
    }
}

/// Clears the busy flag when a run ends, however it ends.
struct RunGuard<'a> {
    control: &'a RunControl,
    generation: u64,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.control.state.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Stored data a resumed run starts from.
#[derive(Debug, Default)]
struct PriorState {
    /// Pools dated before the run's range
    pools: Vec<ResourcePool>,
    /// Draws of expenses outside the run's scope, oldest first
    consumptions: Vec<ResourceConsumption>,
}

/// What a successful pipeline produced.
struct Outcome {
    pool_count: usize,
    consumption_count: usize,
    average_money_age: f64,
    statistics: PoolStatistics,
    uncovered_expenses: usize,
}

/// Rebuilds stored money age data from transaction history.
///
/// # Example
///
/// ```ignore
/// let orchestrator = RebuildOrchestrator::new(source, store)
///     .with_config(MoneyAgeConfig::from_env()?);
///
/// let mut progress = orchestrator.subscribe_progress();
/// tokio::spawn(async move {
///     while let Ok(p) = progress.recv().await {
///         println!("{}: {}/{}", p.stage_description, p.current, p.total);
///     }
/// });
///
/// let result = orchestrator.rebuild_all(orchestrator.default_rebuild_config()).await;
/// println!("{}", result.summary());
/// ```
pub struct RebuildOrchestrator {
    source: Arc<dyn TransactionSource>,
    store: Arc<dyn PoolStore>,
    clock: Arc<dyn Clock>,
    config: MoneyAgeConfig,
    progress: ProgressBroadcaster,
    control: RunControl,
}

impl RebuildOrchestrator {
    /// Create an orchestrator over the given collaborators with default
    /// configuration and the system clock.
    #[must_use]
    pub fn new(source: Arc<dyn TransactionSource>, store: Arc<dyn PoolStore>) -> Self {
        let config = MoneyAgeConfig::default();
        Self {
            source,
            store,
            clock: Arc::new(SystemClock),
            progress: ProgressBroadcaster::new(config.progress_capacity),
            config,
            control: RunControl::default(),
        }
    }

    /// Use a specific clock for timestamps and pool ages
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use service configuration.
    ///
    /// Replaces the progress channel, so subscribe afterwards.
    #[must_use]
    pub fn with_config(mut self, config: MoneyAgeConfig) -> Self {
        self.progress = ProgressBroadcaster::new(config.progress_capacity);
        self.config = config;
        self
    }

    /// Service configuration in use
    #[must_use]
    pub const fn config(&self) -> &MoneyAgeConfig {
        &self.config
    }

    /// Full-rebuild configuration built from the service defaults
    #[must_use]
    pub fn default_rebuild_config(&self) -> RebuildConfig {
        self.config.rebuild_config()
    }

    /// Subscribe to progress of runs started from now on
    #[must_use]
    pub fn subscribe_progress(&self) -> broadcast::Receiver<RebuildProgress> {
        self.progress.subscribe()
    }

    /// Whether a run currently holds the busy flag
    #[must_use]
    pub fn is_rebuilding(&self) -> bool {
        self.control.is_running()
    }

    /// Queries sharing this orchestrator's collaborators, clock and thresholds
    #[must_use]
    pub fn queries(&self) -> MoneyAgeQueries {
        MoneyAgeQueries::new(Arc::clone(&self.source), Arc::clone(&self.store))
            .with_clock(Arc::clone(&self.clock))
            .with_thresholds(self.config.thresholds)
    }

    /// Rebuild pools, consumptions and expense ages for the scope of `config`.
    ///
    /// Never returns an error directly: failures, cancellation and a busy
    /// orchestrator all produce a result with `success == false`.
    #[tracing::instrument(
        skip(self, config),
        fields(
            strategy = %config.strategy,
            batch_size = config.batch_size,
            ledger = ?config.ledger_id,
            account = ?config.account_id,
        )
    )]
    pub async fn rebuild_all(&self, config: RebuildConfig) -> RebuildResult {
        let started = Instant::now();

        let Some(guard) = self.control.acquire() else {
            tracing::warn!("Rebuild rejected: another rebuild is in progress");
            RebuildMetrics::record_rejected();
            return RebuildResult::rejected(started.elapsed(), self.clock.now());
        };
        RebuildMetrics::record_started();
        tracing::info!(generation = guard.generation, "Starting money age rebuild");

        let mut run = RunState::start(&self.progress, guard.generation);
        match self.execute(&config, &mut run).await {
            Ok(outcome) => {
                let elapsed = started.elapsed();
                run.advance(RebuildStage::Completed);
                RebuildMetrics::record_completed(
                    elapsed,
                    outcome.average_money_age,
                    &outcome.statistics,
                );
                tracing::info!(
                    incomes = run.income_count,
                    expenses = run.expense_count,
                    pools = outcome.pool_count,
                    consumptions = outcome.consumption_count,
                    average_money_age = outcome.average_money_age,
                    duration_ms = millis(elapsed),
                    "Money age rebuild completed"
                );
                RebuildResult {
                    success: true,
                    income_count: run.income_count,
                    expense_count: run.expense_count,
                    pool_count: outcome.pool_count,
                    consumption_count: outcome.consumption_count,
                    average_money_age: outcome.average_money_age,
                    statistics: outcome.statistics,
                    uncovered_expenses: outcome.uncovered_expenses,
                    duration_ms: millis(elapsed),
                    rebuilt_at: self.clock.now(),
                    stage: RebuildStage::Completed,
                    store_cleared: false,
                    error: None,
                }
            }
            Err(error) => {
                let elapsed = started.elapsed();
                let result = RebuildResult::failed(error.clone(), &run, elapsed, self.clock.now());
                run.advance(RebuildStage::Failed);
                RebuildMetrics::record_failed(error.reason(), elapsed);

                if matches!(error, RebuildError::Cancelled { .. }) {
                    tracing::warn!(stage = ?result.stage, "Money age rebuild cancelled");
                } else {
                    tracing::error!(error = %error, stage = ?result.stage, "Money age rebuild failed");
                }
                if run.store_cleared {
                    tracing::warn!(
                        "Existing money age data was removed before the failure; \
                         the scope stays empty until a rebuild succeeds"
                    );
                }
                result
            }
        }
    }

    /// Recompute expenses dated `since` or later on top of stored data.
    ///
    /// Stored pools are re-opened with the draws of earlier expenses
    /// replayed, so the new ages match a full rebuild as long as the
    /// history before `since` has not changed. The caller vouches for that.
    #[tracing::instrument(skip(self))]
    pub async fn rebuild_incremental(&self, since: DateTime<Utc>) -> RebuildResult {
        let config = RebuildConfig::incremental_since(since)
            .with_batch_size(self.config.batch_size)
            .with_strategy(self.config.strategy);
        self.rebuild_all(config).await
    }

    /// Ask the running rebuild to stop at its next batch boundary.
    ///
    /// No-op if nothing is running.
    pub fn cancel_rebuild(&self) {
        if self.control.request_cancel() {
            tracing::info!("Money age rebuild cancellation requested");
        } else {
            tracing::debug!("Cancellation requested with no rebuild running");
        }
    }

    /// Check stored data against the transaction source. Never writes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if transactions, pools or consumptions cannot
    /// be loaded.
    #[tracing::instrument(skip(self))]
    pub async fn validate_integrity(&self) -> Result<IntegrityReport, StoreError> {
        let report = IntegrityValidator::new(Arc::clone(&self.source), Arc::clone(&self.store))
            .validate(self.clock.now())
            .await?;
        tracing::info!(
            incomes = report.income_count,
            pools = report.pool_count,
            violations = report.violations.len(),
            rebuild_recommended = report.rebuild_recommended,
            "Money age integrity check finished"
        );
        Ok(report)
    }

    async fn execute(
        &self,
        config: &RebuildConfig,
        run: &mut RunState<'_>,
    ) -> Result<Outcome, RebuildError> {
        config.validate()?;
        let scope = config.scope();

        if config.cleans_eagerly() {
            run.advance(RebuildStage::Cleaning);
            let removed = self.store.delete_all(scope).await.map_err(RebuildError::Save)?;
            run.store_cleared = true;
            tracing::info!(removed, "Removed existing pools before rebuild");
        }

        run.advance(RebuildStage::Loading);
        let transactions = self
            .source
            .load_transactions(scope)
            .await
            .map_err(RebuildError::Load)?;
        let (incomes, expenses) = partition(transactions);
        run.income_count = incomes.len();
        run.expense_count = expenses.len();
        run.total = incomes.len() + expenses.len();
        tracing::info!(
            incomes = run.income_count,
            expenses = run.expense_count,
            "Loaded transactions"
        );
        let prior = if config.resumes_from_store() {
            self.load_prior_state(scope).await?
        } else {
            PriorState::default()
        };
        run.report();
        self.checkpoint(run)?;

        let mut calculator = MoneyAgeCalculator::new(config.strategy);
        for pool in prior.pools {
            calculator.reopen_pool(pool);
        }

        run.advance(RebuildStage::ProcessingIncomes);
        for batch in incomes.chunks(config.batch_size) {
            for income in batch {
                calculator.process_income(income)?;
                run.processed_incomes += 1;
            }
            self.end_batch(run).await?;
        }
        let carried = replay_prior_draws(&mut calculator, prior.consumptions, &scope)?;

        run.advance(RebuildStage::ProcessingExpenses);
        let mut results: Vec<MoneyAgeResult> = Vec::with_capacity(expenses.len());
        for batch in expenses.chunks(config.batch_size) {
            for expense in batch {
                let result = calculator.process_expense(expense)?;
                if result.shortfall.is_positive() {
                    tracing::debug!(
                        transaction = %result.transaction_id,
                        shortfall = %result.shortfall,
                        "Expense exceeded pooled funds"
                    );
                }
                results.push(result);
                run.processed_expenses += 1;
            }
            self.end_batch(run).await?;
        }

        run.advance(RebuildStage::Calculating);
        let uncovered: Vec<&MoneyAgeResult> =
            results.iter().filter(|r| r.shortfall.is_positive()).collect();
        if !uncovered.is_empty() {
            let shortfall: Money = uncovered.iter().map(|r| r.shortfall).sum();
            tracing::warn!(
                expenses = uncovered.len(),
                shortfall = %shortfall,
                "Expenses exceeded pooled funds; the shortfall was aged at 0 days"
            );
        }
        let uncovered_expenses = uncovered.len();
        let weighted: Vec<(Money, f64)> = results.iter().map(|r| (r.amount, r.money_age)).collect();
        let average_money_age = weighted_mean(&weighted);
        let statistics = calculator.statistics(self.clock.now());
        self.checkpoint(run)?;

        run.advance(RebuildStage::Saving);
        let (pools, mut consumptions) = calculator.into_parts();
        let pool_count = pools.len();
        let consumption_count = consumptions.len();
        if !carried.is_empty() {
            tracing::debug!(
                carried = carried.len(),
                "Re-saving earlier draws from pools in scope"
            );
            consumptions.extend(carried);
        }
        let batch = SaveBatch {
            replace_scope: (!config.cleans_eagerly()).then_some(scope),
            pools,
            consumptions,
            transaction_ages: results
                .iter()
                .map(|r| (r.transaction_id, r.money_age))
                .collect(),
        };
        self.store
            .save_batch(batch)
            .await
            .map_err(RebuildError::Save)?;

        Ok(Outcome {
            pool_count,
            consumption_count,
            average_money_age,
            statistics,
            uncovered_expenses,
        })
    }

    async fn end_batch(&self, run: &RunState<'_>) -> Result<(), RebuildError> {
        run.report();
        tracing::debug!(
            stage = ?run.stage,
            processed = run.processed_incomes + run.processed_expenses,
            total = run.total,
            "Batch processed"
        );
        tokio::task::yield_now().await;
        self.checkpoint(run)
    }

    /// Loads the pools dated before the scope and the draws of every
    /// expense outside it.
    async fn load_prior_state(&self, scope: TransactionFilter) -> Result<PriorState, RebuildError> {
        let mut pools = self
            .store
            .load_pools(scope.with_date_range(DateRange::all()))
            .await
            .map_err(RebuildError::Load)?;
        pools.retain(|p| !scope.date_range.contains(p.created_at));

        let mut consumptions = self
            .store
            .load_consumptions(TransactionFilter::all())
            .await
            .map_err(RebuildError::Load)?;
        consumptions.retain(|c| !scope.matches_parts(c.ledger_id, c.account_id, c.consumed_at));
        consumptions.sort_by_key(|c| (c.consumed_at, c.id));

        tracing::info!(
            pools = pools.len(),
            consumptions = consumptions.len(),
            "Loaded stored pools to resume from"
        );
        Ok(PriorState {
            pools,
            consumptions,
        })
    }

    fn checkpoint(&self, run: &RunState<'_>) -> Result<(), RebuildError> {
        if self.control.is_cancelled(run.generation) {
            return Err(RebuildError::Cancelled { stage: run.stage });
        }
        Ok(())
    }
}

/// Replays stored draws onto the pools the calculator holds.
///
/// Draws from pools outside the run are skipped; those rows are not
/// touched by the save. Returns the draws from pools inside `scope`, which
/// the save's scope replacement removes and must write back.
fn replay_prior_draws(
    calculator: &mut MoneyAgeCalculator,
    consumptions: Vec<ResourceConsumption>,
    scope: &TransactionFilter,
) -> Result<Vec<ResourceConsumption>, CalculationError> {
    let mut carried = Vec::new();
    for consumption in consumptions {
        let Some(pool) = calculator.pool(consumption.pool_id) else {
            continue;
        };
        let in_scope = scope.matches_parts(pool.ledger_id, pool.account_id, pool.created_at);
        calculator.replay_consumption(&consumption)?;
        if in_scope {
            carried.push(consumption);
        }
    }
    Ok(carried)
}

/// Splits loaded transactions into incomes and expenses, each in
/// `(date, sequence)` order. Transfers and zero-amount incomes are dropped.
fn partition(transactions: Vec<Transaction>) -> (Vec<Transaction>, Vec<Transaction>) {
    let mut incomes = Vec::new();
    let mut expenses = Vec::new();
    for tx in transactions {
        match tx.kind {
            TransactionKind::Income if tx.amount.is_zero() => {
                tracing::debug!(transaction = %tx.id, "Skipping zero-amount income");
            }
            TransactionKind::Income => incomes.push(tx),
            TransactionKind::Expense => expenses.push(tx),
            TransactionKind::Transfer => {}
        }
    }
    incomes.sort_by_key(Transaction::ordering_key);
    expenses.sort_by_key(Transaction::ordering_key);
    (incomes, expenses)
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
