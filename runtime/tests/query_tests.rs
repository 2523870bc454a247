//! Read-side queries over rebuilt money ages

#![allow(clippy::unwrap_used)] // Tests can unwrap

use money_age_core::{DateRange, HealthLevel, HealthThresholds, Money, NaiveDate, TransactionId};
use money_age_runtime::{
    MoneyAgeConfig, MoneyAgeQueries, RebuildConfig, RebuildOrchestrator, TrendDirection,
};
use money_age_testing::{InMemoryPoolStore, InMemoryTransactionSource, LedgerFixture, test_clock};
use std::sync::Arc;

#[tokio::test]
async fn test_money_age_of_processed_and_unprocessed_expenses() {
    let mut ledger = LedgerFixture::new();
    let expense = ledger.expense(150, 19);
    let source = InMemoryTransactionSource::with_transactions(vec![
        ledger.income(100, 0),
        ledger.income(200, 9),
        expense.clone(),
    ]);
    let store = InMemoryPoolStore::new();
    let orchestrator = RebuildOrchestrator::new(Arc::new(source.clone()), Arc::new(store));
    let queries = orchestrator.queries();

    assert_eq!(queries.money_age(expense.id).await.unwrap(), None);
    assert!(orchestrator.rebuild_all(RebuildConfig::default()).await.success);

    assert_eq!(queries.money_age(expense.id).await.unwrap(), Some(16.0));
    assert_eq!(
        queries.health_level(expense.id).await.unwrap(),
        Some(HealthLevel::Health)
    );
    assert_eq!(queries.money_age(TransactionId::new()).await.unwrap(), None);
}

#[tokio::test]
async fn test_average_money_age_by_ledger() {
    let mut household = LedgerFixture::new();
    let mut business = LedgerFixture::new();
    let source = InMemoryTransactionSource::with_transactions(vec![
        household.income(100, 0),
        household.expense(100, 10),
        business.income(300, 0),
        business.expense(100, 40),
        business.expense(200, 70),
    ]);
    let store = InMemoryPoolStore::new();
    let orchestrator = RebuildOrchestrator::new(Arc::new(source), Arc::new(store));
    assert!(orchestrator.rebuild_all(RebuildConfig::default()).await.success);
    let queries = orchestrator.queries();

    let household_avg = queries.average_money_age(Some(household.ledger_id)).await.unwrap();
    let business_avg = queries.average_money_age(Some(business.ledger_id)).await.unwrap();
    let overall = queries.average_money_age(None).await.unwrap();

    assert!((household_avg - 10.0).abs() < 1e-9);
    // (40 + 70) / 2, amounts do not weigh in
    assert!((business_avg - 55.0).abs() < 1e-9);
    assert!((overall - 40.0).abs() < 1e-9);

    // (100 x 40 + 200 x 70) / 300
    let business_weighted = queries
        .weighted_average_money_age(Some(business.ledger_id))
        .await
        .unwrap();
    let overall_weighted = queries.weighted_average_money_age(None).await.unwrap();
    assert!((business_weighted - 60.0).abs() < 1e-9);
    assert!((overall_weighted - 47.5).abs() < 1e-9);
}

#[tokio::test]
async fn test_average_is_zero_without_processed_expenses() {
    let mut ledger = LedgerFixture::new();
    let source = InMemoryTransactionSource::with_transactions(vec![
        ledger.income(100, 0),
        ledger.expense(40, 3),
    ]);
    let queries = MoneyAgeQueries::new(Arc::new(source), Arc::new(InMemoryPoolStore::new()));

    assert!(queries.average_money_age(None).await.unwrap().abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_dashboard_summarises_health() {
    let mut ledger = LedgerFixture::new();
    let source = InMemoryTransactionSource::with_transactions(vec![
        ledger.income(100, 0),
        ledger.income(100, 1),
        ledger.income(100, 2),
        ledger.income(100, 3),
        ledger.income(50, 100),
        // ages 10, 40, 70, 90
        ledger.expense(100, 10),
        ledger.expense(100, 41),
        ledger.expense(100, 72),
        ledger.expense(100, 93),
    ]);
    let store = InMemoryPoolStore::new();
    let orchestrator = RebuildOrchestrator::new(Arc::new(source), Arc::new(store))
        .with_clock(Arc::new(test_clock()));
    assert!(orchestrator.rebuild_all(RebuildConfig::default()).await.success);

    let dashboard = orchestrator.queries().dashboard(Some(ledger.ledger_id)).await.unwrap();

    assert_eq!(dashboard.expense_count, 4);
    assert!((dashboard.average_money_age - 52.5).abs() < 1e-9);
    assert!((dashboard.median_money_age - 55.0).abs() < 1e-9);
    assert!((dashboard.min_money_age - 10.0).abs() < 1e-9);
    assert!((dashboard.max_money_age - 90.0).abs() < 1e-9);
    assert!((dashboard.weighted_average_money_age - 52.5).abs() < 1e-9);
    assert_eq!(dashboard.distribution.health.count, 1);
    assert_eq!(dashboard.distribution.warning.count, 1);
    assert_eq!(dashboard.distribution.danger.count, 2);
    assert_eq!(dashboard.distribution.danger.total_amount, Money::from_major(200));
    assert!((dashboard.distribution.danger.average_money_age - 80.0).abs() < 1e-9);
    assert!((dashboard.distribution.warning.average_money_age - 40.0).abs() < 1e-9);
    assert_eq!(dashboard.overall_level, HealthLevel::Danger);
    // All expenses are older than the trend window
    assert!(dashboard.trend.is_empty());

    assert_eq!(dashboard.total_pools, 5);
    assert_eq!(dashboard.active_pools, 1);
    assert_eq!(dashboard.total_remaining, Money::from_major(50));
    // Pool opened 2025-04-11, clock at 2025-06-01
    assert!((dashboard.average_pool_age_days - 51.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_dashboard_uses_configured_thresholds() {
    let mut ledger = LedgerFixture::new();
    let source = InMemoryTransactionSource::with_transactions(vec![
        ledger.income(100, 0),
        ledger.expense(100, 10),
    ]);
    let store = InMemoryPoolStore::new();
    let config = MoneyAgeConfig {
        thresholds: HealthThresholds::new(5, 8),
        ..MoneyAgeConfig::default()
    };
    let orchestrator =
        RebuildOrchestrator::new(Arc::new(source), Arc::new(store)).with_config(config);
    assert!(orchestrator.rebuild_all(orchestrator.default_rebuild_config()).await.success);

    let dashboard = orchestrator.queries().dashboard(None).await.unwrap();

    assert_eq!(dashboard.distribution.danger.count, 1);
    assert_eq!(dashboard.overall_level, HealthLevel::Danger);
}

#[tokio::test]
async fn test_empty_dashboard() {
    let queries = MoneyAgeQueries::new(
        Arc::new(InMemoryTransactionSource::new()),
        Arc::new(InMemoryPoolStore::new()),
    )
    .with_clock(Arc::new(test_clock()));

    let dashboard = queries.dashboard(None).await.unwrap();

    assert_eq!(dashboard.expense_count, 0);
    assert_eq!(dashboard.total_pools, 0);
    assert_eq!(dashboard.overall_level, HealthLevel::Health);
    assert!(dashboard.median_money_age.abs() < f64::EPSILON);
    assert_eq!(dashboard.total_remaining, Money::ZERO);
}

#[tokio::test]
async fn test_trend_groups_expenses_by_day() {
    let mut ledger = LedgerFixture::new();
    let source = InMemoryTransactionSource::with_transactions(vec![
        ledger.income(100, 0),
        ledger.expense(30, 10),
        ledger.expense(30, 10),
        ledger.expense(40, 50),
    ]);
    let store = InMemoryPoolStore::new();
    let orchestrator = RebuildOrchestrator::new(Arc::new(source), Arc::new(store));
    assert!(orchestrator.rebuild_all(RebuildConfig::default()).await.success);
    let queries = orchestrator.queries();

    let trend = queries.trend(Some(ledger.ledger_id), DateRange::all()).await.unwrap();

    assert_eq!(trend.points.len(), 2);
    assert_eq!(trend.points[0].date, NaiveDate::from_ymd_opt(2025, 1, 11).unwrap());
    assert_eq!(trend.points[0].expense_count, 2);
    assert!((trend.points[0].average_money_age - 10.0).abs() < 1e-9);
    assert!((trend.points[1].average_money_age - 50.0).abs() < 1e-9);
    assert!((trend.average_money_age - 30.0).abs() < 1e-9);
    assert_eq!(trend.direction, TrendDirection::Declining);

    let late = queries
        .trend(None, DateRange::between(ledger.day(40), ledger.day(60)))
        .await
        .unwrap();
    assert_eq!(late.points.len(), 1);
    assert_eq!(late.direction, TrendDirection::Stable);
}

#[tokio::test]
async fn test_dashboard_trend_covers_last_thirty_days() {
    let mut ledger = LedgerFixture::new();
    // Clock sits on day 151 (2025-06-01)
    let source = InMemoryTransactionSource::with_transactions(vec![
        ledger.income(100, 100),
        ledger.expense(50, 110),
        ledger.expense(50, 140),
    ]);
    let store = InMemoryPoolStore::new();
    let orchestrator = RebuildOrchestrator::new(Arc::new(source), Arc::new(store))
        .with_clock(Arc::new(test_clock()));
    assert!(orchestrator.rebuild_all(RebuildConfig::default()).await.success);

    let dashboard = orchestrator.queries().dashboard(None).await.unwrap();

    assert_eq!(dashboard.expense_count, 2);
    assert_eq!(dashboard.trend.len(), 1);
    assert_eq!(dashboard.trend[0].date, NaiveDate::from_ymd_opt(2025, 5, 21).unwrap());
    assert!((dashboard.trend[0].average_money_age - 40.0).abs() < 1e-9);
}
