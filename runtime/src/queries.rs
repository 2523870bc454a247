//! Read-side queries over stored money ages.
//!
//! Everything here reads what the last rebuilds persisted; nothing is
//! recomputed. An expense that no rebuild has processed yet has no age and
//! is left out of averages, trends and the dashboard.
//!
//! Averages over expenses are plain means of their stored ages. The
//! amount-weighted variant is available separately.

use money_age_core::{
    Clock, DateRange, DateTime, HealthDistribution, HealthLevel, HealthThresholds, LedgerId,
    Money, NaiveDate, PoolStore, StoreError, SystemClock, TimeDelta, TransactionFilter,
    TransactionId, TransactionKind, TransactionSource, Utc,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Days of history covered by the dashboard trend
pub const DASHBOARD_TREND_DAYS: i64 = 30;

/// Relative change between the first and last trend points below which
/// the trend counts as stable.
const STABLE_BAND: f64 = 0.1;

/// Summary of money age health for one ledger (or all ledgers).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoneyAgeDashboard {
    /// Mean money age of processed expenses, in days
    pub average_money_age: f64,
    /// Amount-weighted mean money age of processed expenses, in days
    pub weighted_average_money_age: f64,
    /// Median money age, in days
    pub median_money_age: f64,
    /// Youngest money spent, in days
    pub min_money_age: f64,
    /// Oldest money spent, in days
    pub max_money_age: f64,
    /// Expenses with a stored money age
    pub expense_count: usize,
    /// Expenses per health band
    pub distribution: HealthDistribution,
    /// Overall health verdict
    pub overall_level: HealthLevel,
    /// Stored pools
    pub total_pools: usize,
    /// Stored pools that still hold money
    pub active_pools: usize,
    /// Money left across all pools
    pub total_remaining: Money,
    /// Remaining-weighted age of open pools at generation time, in days
    pub average_pool_age_days: f64,
    /// Daily averages over the last [`DASHBOARD_TREND_DAYS`] days
    pub trend: Vec<TrendPoint>,
    /// When the dashboard was computed
    pub generated_at: DateTime<Utc>,
}

/// Mean money age of the expenses dated on one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    /// Calendar day (UTC)
    pub date: NaiveDate,
    /// Mean money age of that day's expenses, in days
    pub average_money_age: f64,
    /// Expenses with a stored age on that day
    pub expense_count: usize,
}

/// Direction of money age over a period, judged on the relative change
/// from the first to the last daily average.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    /// Average fell by more than 10%
    Improving,
    /// Average moved by 10% or less
    Stable,
    /// Average rose by more than 10%
    Declining,
}

impl TrendDirection {
    /// Compares the first and last averages of a period.
    #[must_use]
    pub fn between(first: f64, last: f64) -> Self {
        if last < first * (1.0 - STABLE_BAND) {
            Self::Improving
        } else if last > first * (1.0 + STABLE_BAND) {
            Self::Declining
        } else {
            Self::Stable
        }
    }

    /// Direction of a series of points; stable with fewer than two.
    #[must_use]
    pub fn of(points: &[TrendPoint]) -> Self {
        match (points.first(), points.last()) {
            (Some(first), Some(last)) if points.len() >= 2 => {
                Self::between(first.average_money_age, last.average_money_age)
            }
            _ => Self::Stable,
        }
    }
}

/// Money age over a date range, one point per day with processed expenses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoneyAgeTrend {
    /// Range the trend covers
    pub range: DateRange,
    /// Daily points, oldest first
    pub points: Vec<TrendPoint>,
    /// Mean of the daily averages, in days
    pub average_money_age: f64,
    /// Change from the first to the last point
    pub direction: TrendDirection,
}

/// Stored age of one processed expense.
#[derive(Clone, Copy)]
struct ExpenseAge {
    date: DateTime<Utc>,
    amount: Money,
    money_age: f64,
}

/// Queries over persisted money age results.
#[derive(Clone)]
pub struct MoneyAgeQueries {
    source: Arc<dyn TransactionSource>,
    store: Arc<dyn PoolStore>,
    clock: Arc<dyn Clock>,
    thresholds: HealthThresholds,
}

impl MoneyAgeQueries {
    /// Create queries over the given collaborators
    #[must_use]
    pub fn new(source: Arc<dyn TransactionSource>, store: Arc<dyn PoolStore>) -> Self {
        Self {
            source,
            store,
            clock: Arc::new(SystemClock),
            thresholds: HealthThresholds::default(),
        }
    }

    /// Use a specific clock for pool ages and timestamps
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use specific health thresholds
    #[must_use]
    pub const fn with_thresholds(mut self, thresholds: HealthThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Mean money age over processed expenses, in days.
    ///
    /// Returns 0 when no expense in scope has a stored age.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if transactions or ages cannot be loaded.
    pub async fn average_money_age(&self, ledger: Option<LedgerId>) -> Result<f64, StoreError> {
        let ages = self.expense_ages(scope(ledger)).await?;
        Ok(mean(ages.iter().map(|e| e.money_age)))
    }

    /// Amount-weighted mean money age over processed expenses, in days.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if transactions or ages cannot be loaded.
    pub async fn weighted_average_money_age(
        &self,
        ledger: Option<LedgerId>,
    ) -> Result<f64, StoreError> {
        let ages = self.expense_ages(scope(ledger)).await?;
        Ok(weighted_mean(&amount_weighted(&ages)))
    }

    /// Stored money age of one expense, in days.
    ///
    /// `None` until a rebuild has processed the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the age cannot be loaded.
    pub async fn money_age(&self, transaction_id: TransactionId) -> Result<Option<f64>, StoreError> {
        let ages = self.store.transaction_ages(vec![transaction_id]).await?;
        Ok(ages.get(&transaction_id).copied())
    }

    /// Health band of one expense's stored money age.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the age cannot be loaded.
    pub async fn health_level(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Option<HealthLevel>, StoreError> {
        Ok(self
            .money_age(transaction_id)
            .await?
            .map(|age| self.thresholds.classify(age)))
    }

    /// Daily money age of expenses dated inside `range`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if transactions or ages cannot be loaded.
    pub async fn trend(
        &self,
        ledger: Option<LedgerId>,
        range: DateRange,
    ) -> Result<MoneyAgeTrend, StoreError> {
        let ages = self.expense_ages(scope(ledger).with_date_range(range)).await?;
        let points = daily_points(&ages);
        let direction = TrendDirection::of(&points);
        tracing::debug!(points = points.len(), ?direction, "Computed money age trend");

        Ok(MoneyAgeTrend {
            range,
            average_money_age: mean(points.iter().map(|p| p.average_money_age)),
            direction,
            points,
        })
    }

    /// Health dashboard for one ledger, or every ledger with `None`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if transactions, ages or pools cannot be loaded.
    pub async fn dashboard(&self, ledger: Option<LedgerId>) -> Result<MoneyAgeDashboard, StoreError> {
        let ages = self.expense_ages(scope(ledger)).await?;
        let pools = self.store.load_pools(scope(ledger)).await?;
        let now = self.clock.now();

        let mut sorted: Vec<f64> = ages.iter().map(|e| e.money_age).collect();
        sorted.sort_by(f64::total_cmp);

        let distribution: HealthDistribution = ages
            .iter()
            .map(|e| (self.thresholds.classify(e.money_age), e.amount, e.money_age))
            .collect();

        let window = DateRange::between(now - TimeDelta::days(DASHBOARD_TREND_DAYS), now);
        let recent: Vec<ExpenseAge> = ages
            .iter()
            .filter(|e| window.contains(e.date))
            .copied()
            .collect();

        let open: Vec<_> = pools.iter().filter(|p| !p.is_exhausted()).collect();
        let total_remaining: Money = open.iter().map(|p| p.remaining_amount).sum();
        let pool_ages: Vec<(Money, f64)> = open
            .iter()
            .map(|p| (p.remaining_amount, day_count(p.age_in_days_at(now))))
            .collect();

        Ok(MoneyAgeDashboard {
            average_money_age: mean(sorted.iter().copied()),
            weighted_average_money_age: weighted_mean(&amount_weighted(&ages)),
            median_money_age: median(&sorted),
            min_money_age: sorted.first().copied().unwrap_or_default(),
            max_money_age: sorted.last().copied().unwrap_or_default(),
            expense_count: sorted.len(),
            overall_level: distribution.overall(),
            distribution,
            total_pools: pools.len(),
            active_pools: open.len(),
            total_remaining,
            average_pool_age_days: weighted_mean(&pool_ages),
            trend: daily_points(&recent),
            generated_at: now,
        })
    }

    async fn expense_ages(&self, filter: TransactionFilter) -> Result<Vec<ExpenseAge>, StoreError> {
        let expenses: Vec<_> = self
            .source
            .load_transactions(filter)
            .await?
            .into_iter()
            .filter(|t| t.kind == TransactionKind::Expense)
            .collect();
        let ages = self
            .store
            .transaction_ages(expenses.iter().map(|t| t.id).collect())
            .await?;

        Ok(expenses
            .iter()
            .filter_map(|t| {
                ages.get(&t.id).map(|age| ExpenseAge {
                    date: t.date,
                    amount: t.amount,
                    money_age: *age,
                })
            })
            .collect())
    }
}

fn scope(ledger: Option<LedgerId>) -> TransactionFilter {
    ledger.map_or_else(TransactionFilter::all, |id| {
        TransactionFilter::all().with_ledger(id)
    })
}

fn daily_points(ages: &[ExpenseAge]) -> Vec<TrendPoint> {
    let mut days: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
    for age in ages {
        days.entry(age.date.date_naive()).or_default().push(age.money_age);
    }
    days.into_iter()
        .map(|(date, values)| TrendPoint {
            date,
            average_money_age: mean(values.iter().copied()),
            expense_count: values.len(),
        })
        .collect()
}

fn amount_weighted(ages: &[ExpenseAge]) -> Vec<(Money, f64)> {
    ages.iter().map(|e| (e.amount, e.money_age)).collect()
}

#[allow(clippy::cast_precision_loss)]
fn day_count(days: i64) -> f64 {
    days as f64
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0_usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

#[allow(clippy::cast_precision_loss)]
pub(crate) fn weighted_mean(values: &[(Money, f64)]) -> f64 {
    let total: i64 = values.iter().map(|(amount, _)| amount.cents()).sum();
    if total <= 0 {
        return 0.0;
    }
    let weighted: f64 = values
        .iter()
        .map(|(amount, age)| amount.cents() as f64 * age)
        .sum();
    weighted / total as f64
}

fn median(sorted: &[f64]) -> f64 {
    match sorted.len() {
        0 => 0.0,
        n if n % 2 == 1 => sorted[n / 2],
        n => (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0,
    }
}
