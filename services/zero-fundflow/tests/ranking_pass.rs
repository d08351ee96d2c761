//! Integration tests for full ranking passes.
//!
//! Covers the funnel over a large synthetic universe, leaderboard snapshot
//! replacement, tracked-universe growth, and the data-unavailable outcome.

mod common;

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tempfile::tempdir;

use common::{cache_over, row, storage_in, MockFlowProvider};
use zero_fundflow::data::enrichment::BatchOutcome;
use zero_fundflow::data::{current_trading_date, Dataset, FlowPeriod, FundFlowRecord, RatioBasis};
use zero_fundflow::history::{HistoryRecorder, HistoryStore, HistoryStoreConfig};
use zero_fundflow::screener::{FunnelConfig, SelectionFunnel, VolumeRatioSource};
use zero_fundflow::{FlowError, FundFlowService, RankingOutcome};

// ============================================================================
// Fixtures
// ============================================================================

/// Deterministic pseudo-random numbers for synthetic universes.
struct Lcg(u64);

impl Lcg {
    fn next_f64(&mut self) -> f64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (self.0 >> 11) as f64 / (1u64 << 53) as f64
    }

    fn range(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next_f64()
    }
}

fn synthetic_universe(size: usize, seed: u64) -> Vec<FundFlowRecord> {
    let mut rng = Lcg(seed);
    (0..size)
        .map(|i| {
            let prefix = ["00", "30", "60"][i % 3];
            let mut r = FundFlowRecord::new(format!("{}{:04}", prefix, i / 3), format!("合成{}", i));
            r.position_ratio = Some(rng.range(-15.0, 35.0));
            r.ratio_basis = RatioBasis::PrimaryCapital;
            r.change_pct = Some(rng.range(-10.0, 10.0));
            r.turnover_rate = Some(rng.range(0.1, 40.0));
            r.amount = Some(rng.range(1.0e7, 5.0e9));
            r.derive_float_market_cap();
            r
        })
        .collect()
}

/// Volume ratios derived from the code, counting requested codes.
struct CodeRatios {
    requested: AtomicUsize,
}

#[async_trait]
impl VolumeRatioSource for CodeRatios {
    async fn volume_ratios(&self, codes: &[String], _lookback: usize) -> BatchOutcome<f64> {
        self.requested.fetch_add(codes.len(), Ordering::Relaxed);
        let mut outcome = BatchOutcome::default();
        for code in codes {
            let n: u64 = code.parse().unwrap_or(0);
            outcome.values.insert(code.clone(), (n % 60) as f64 / 10.0);
        }
        outcome
    }
}

fn service_with(
    provider: Arc<MockFlowProvider>,
    top_n: usize,
) -> (tempfile::TempDir, FundFlowService, HistoryStore) {
    let dir = tempdir().unwrap();
    let cache = cache_over(storage_in(&dir), provider);
    let history = HistoryStore::new(HistoryStoreConfig::with_path(dir.path().join("history.db"))).unwrap();
    let config = FunnelConfig {
        top_n,
        candidate_pool: 10,
        ..FunnelConfig::default()
    };
    let service = FundFlowService::new(cache, config, Some(HistoryRecorder::new(history.clone())));
    (dir, service, history)
}

fn small_universe() -> Vec<zero_fundflow::data::ProviderRow> {
    vec![
        row("000001", 9.95, 6.0, 2.5e9),
        row("000002", 7.2, 4.0, 1.2e9),
        row("600000", 3.1, 2.5, 6.0e8),
        row("300001", 1.5, 12.0, 3.0e8),
        row("600519", -2.5, 0.8, 8.0e9),
        row("000063", 0.2, 18.0, 1.5e8),
    ]
}

// ============================================================================
// Funnel
// ============================================================================

#[tokio::test]
async fn test_funnel_over_5000_records() {
    let dataset = Dataset::new(
        FlowPeriod::Instant,
        NaiveDate::from_ymd_opt(2024, 6, 7).unwrap(),
        synthetic_universe(5000, 42),
    );
    let source = CodeRatios {
        requested: AtomicUsize::new(0),
    };
    let funnel = SelectionFunnel::new(FunnelConfig {
        top_n: 50,
        candidate_pool: 500,
        ..FunnelConfig::default()
    });

    let board = funnel.rank(&dataset, Some(&source)).await;

    assert_eq!(board.leaderboard.len(), 50);
    assert_eq!(board.full.len(), 5000);
    assert!(source.requested.load(Ordering::Relaxed) <= 500);

    for pair in board.leaderboard.windows(2) {
        assert!(pair[0].composite() >= pair[1].composite());
    }

    for entry in &board.leaderboard {
        let b = &entry.breakdown;
        for v in [b.position, b.momentum, b.activity, b.liquidity, b.composite] {
            assert!((0.0..=100.0).contains(&v));
        }
        assert!(entry.eligible);
        assert!(entry.record.float_market_cap.map_or(true, |c| c < 1.0e11));

        if let Some(vr_score) = b.volume_ratio {
            if vr_score >= entry.base_composite {
                assert!(
                    b.composite >= entry.base_composite,
                    "{}: {} < {}",
                    entry.record.code,
                    b.composite,
                    entry.base_composite
                );
            }
        }
    }
}

#[tokio::test]
async fn test_funnel_is_deterministic() {
    let dataset = Dataset::new(
        FlowPeriod::Instant,
        NaiveDate::from_ymd_opt(2024, 6, 7).unwrap(),
        synthetic_universe(2000, 7),
    );
    let funnel = SelectionFunnel::with_defaults();

    let first = funnel.rank(&dataset, None).await;
    let second = funnel.rank(&dataset, None).await;
    assert_eq!(first.codes(), second.codes());
}

// ============================================================================
// Ranking Pass
// ============================================================================

#[tokio::test]
async fn test_two_passes_keep_exactly_top_n_snapshot_rows() {
    let provider = Arc::new(MockFlowProvider::new(small_universe()));
    let (_dir, service, history) = service_with(Arc::clone(&provider), 3);

    for _ in 0..2 {
        let outcome = service.run_pass(FlowPeriod::Instant, None).await;
        assert!(outcome.is_ranked());
    }

    let rows = history
        .load_snapshot(current_trading_date(), FlowPeriod::Instant)
        .unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows.iter().map(|r| r.rank).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(history.stats().unwrap().snapshot_rows, 3);
    assert_eq!(provider.universe_calls(), 1);
}

#[tokio::test]
async fn test_pass_enriches_candidates_with_volume_ratio() {
    let provider = Arc::new(MockFlowProvider::new(small_universe()).with_volume_ratio(2.5));
    let (_dir, service, _history) = service_with(Arc::clone(&provider), 3);

    let outcome = service.run_pass(FlowPeriod::Instant, Some(2)).await;
    let board = outcome.board().unwrap();

    assert_eq!(board.leaderboard.len(), 2);
    assert!(board
        .leaderboard
        .iter()
        .all(|e| e.volume_ratio == Some(2.5) && e.breakdown.uses_volume_ratio()));
    // 600519's float cap is 1e12, so it is never enriched
    assert_eq!(provider.volume_calls.load(Ordering::Relaxed), 5);
}

#[tokio::test]
async fn test_history_recorded_for_instant_only() {
    let provider = Arc::new(MockFlowProvider::new(small_universe()));
    let (_dir, service, history) = service_with(provider, 3);

    match service.run_pass(FlowPeriod::Rank3Day, None).await {
        RankingOutcome::Ranked { history: report, .. } => assert!(report.is_none()),
        RankingOutcome::DataUnavailable { reason, .. } => panic!("unexpected: {reason}"),
    }
    assert_eq!(history.stats().unwrap().tracked_stocks, 0);

    match service.run_pass(FlowPeriod::Instant, None).await {
        RankingOutcome::Ranked { history: report, .. } => {
            let report = report.unwrap();
            assert!(report.is_ok());
            assert_eq!(report.newly_tracked, 3);
        }
        RankingOutcome::DataUnavailable { reason, .. } => panic!("unexpected: {reason}"),
    }
}

#[tokio::test]
async fn test_provider_outage_yields_data_unavailable() {
    let provider = Arc::new(MockFlowProvider::failing());
    let (_dir, service, history) = service_with(provider, 3);

    let outcome = service.run_pass(FlowPeriod::Instant, None).await;

    match outcome {
        RankingOutcome::DataUnavailable { period, reason } => {
            assert_eq!(period, FlowPeriod::Instant);
            assert!(matches!(reason, FlowError::ProviderUnavailable { .. }));
        }
        RankingOutcome::Ranked { .. } => panic!("expected no data"),
    }
    assert_eq!(history.stats().unwrap().snapshot_rows, 0);
}

#[tokio::test]
async fn test_integrity_violation_yields_data_unavailable() {
    let provider = Arc::new(MockFlowProvider::new(small_universe()).without_splits());
    let (_dir, service, _history) = service_with(provider, 3);

    let outcome = service.run_pass(FlowPeriod::Instant, None).await;
    assert!(outcome.board().is_none());
    assert!(matches!(
        outcome,
        RankingOutcome::DataUnavailable {
            reason: FlowError::DataIntegrity(_),
            ..
        }
    ));
}

// ============================================================================
// Tracked Universe
// ============================================================================

#[tokio::test]
async fn test_tracked_universe_never_shrinks() {
    let dir = tempdir().unwrap();
    let store = HistoryStore::new(HistoryStoreConfig::with_path(dir.path().join("history.db"))).unwrap();
    let recorder = HistoryRecorder::new(store.clone());
    let funnel = SelectionFunnel::new(FunnelConfig {
        top_n: 10,
        candidate_pool: 50,
        ..FunnelConfig::default()
    });

    let mut previous: HashSet<String> = HashSet::new();
    for day in 3..=7 {
        let dataset = Dataset::new(
            FlowPeriod::Instant,
            NaiveDate::from_ymd_opt(2024, 6, day).unwrap(),
            synthetic_universe(300, u64::from(day)),
        );
        let board = funnel.rank(&dataset, None).await;
        let report = recorder.record_pass(&board);
        assert!(report.is_ok());

        let tracked: HashSet<String> = store.tracked_codes().unwrap().into_iter().collect();
        assert!(tracked.is_superset(&previous));
        assert!(board.codes().iter().all(|c| tracked.contains(c)));
        assert_eq!(report.backtest_rows, tracked.len());
        previous = tracked;
    }
}
