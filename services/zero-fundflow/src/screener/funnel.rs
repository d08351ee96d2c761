//! Two-phase selection funnel.
//!
//! ```text
//!   universe (N) ──► phase 1: 4-dim score, O(N), no network
//!        │
//!        ▼ top `candidate_pool` by composite
//!   candidates ──► float-cap screen ──► volume ratios ──► 5-dim rescore
//!        │
//!        ▼
//!   full order = rescored candidates ++ unpromoted (4-dim)
//!   leaderboard = first `top_n` eligible entries
//! ```
//!
//! Ties are broken by provider order.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::config::FunnelConfig;
use crate::data::enrichment::{BatchOutcome, EnrichmentFetcher};
use crate::data::{Dataset, FlowPeriod, FundFlowRecord, RatioBasis};
use crate::scoring::{self, classify_volume_level, ScoreBreakdown, VolumeLevel};

// ============================================================================
// Volume Ratio Source
// ============================================================================

/// Supplies volume ratios for a candidate set.
#[async_trait]
pub trait VolumeRatioSource: Send + Sync {
    async fn volume_ratios(&self, codes: &[String], lookback: usize) -> BatchOutcome<f64>;
}

#[async_trait]
impl VolumeRatioSource for EnrichmentFetcher {
    async fn volume_ratios(&self, codes: &[String], lookback: usize) -> BatchOutcome<f64> {
        self.fetch_volume_ratios(codes, lookback).await
    }
}

// ============================================================================
// Funnel Stage
// ============================================================================

/// Funnel stage identifier for tracking where records drop out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FunnelStage {
    /// Whole universe, phase-1 scored
    Universe,
    /// Promoted to phase 2
    Candidates,
    /// Passed the float market cap screen
    MarketCap,
    /// Volume ratio obtained
    VolumeRatio,
    /// Leaderboard
    Leaderboard,
}

impl std::fmt::Display for FunnelStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Universe => write!(f, "全市场"),
            Self::Candidates => write!(f, "候选池"),
            Self::MarketCap => write!(f, "市值筛选"),
            Self::VolumeRatio => write!(f, "量比增强"),
            Self::Leaderboard => write!(f, "排行榜"),
        }
    }
}

/// Counts for one funnel stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: FunnelStage,
    pub passed: usize,
    pub eliminated: usize,
    /// Elimination rate (%)
    pub elimination_rate: f64,
}

impl StageResult {
    pub fn new(stage: FunnelStage, input_count: usize, passed_count: usize) -> Self {
        let eliminated = input_count.saturating_sub(passed_count);
        let elimination_rate = if input_count > 0 {
            (eliminated as f64 / input_count as f64) * 100.0
        } else {
            0.0
        };

        Self {
            stage,
            passed: passed_count,
            eliminated,
            elimination_rate,
        }
    }
}

// ============================================================================
// Ranked Entry
// ============================================================================

/// One scored record with its funnel state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedEntry {
    pub record: FundFlowRecord,
    /// Final breakdown (5-dim when `volume_ratio` is present)
    pub breakdown: ScoreBreakdown,
    /// Phase-1 (4-dim) composite
    pub base_composite: f64,
    /// Raw volume ratio
    pub volume_ratio: Option<f64>,
    pub volume_level: VolumeLevel,
    /// Passed the float market cap screen
    pub eligible: bool,
    /// Promoted to phase 2
    pub promoted: bool,
    /// Position in provider order
    pub seq: usize,
}

impl RankedEntry {
    fn phase_one(seq: usize, record: FundFlowRecord) -> Self {
        let breakdown = scoring::score(&record, None);
        let volume_level = classify_volume_level(record.amount, record.turnover_rate);
        Self {
            base_composite: breakdown.composite,
            breakdown,
            volume_ratio: None,
            volume_level,
            eligible: true,
            promoted: false,
            seq,
            record,
        }
    }

    pub fn composite(&self) -> f64 {
        self.breakdown.composite
    }

    fn apply_volume_ratio(&mut self, ratio: f64) {
        self.volume_ratio = Some(ratio);
        self.breakdown = scoring::score(&self.record, Some(ratio));
    }
}

/// Descending composite, then provider order.
fn by_composite(a: &RankedEntry, b: &RankedEntry) -> Ordering {
    b.composite()
        .total_cmp(&a.composite())
        .then_with(|| a.seq.cmp(&b.seq))
}

// ============================================================================
// Ranked Board
// ============================================================================

/// Flat leaderboard row handed to downstream consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardRow {
    pub rank: usize,
    pub code: String,
    pub name: String,
    pub float_market_cap: Option<f64>,
    pub composite: f64,
    pub position_ratio: Option<f64>,
    pub ratio_basis: RatioBasis,
    pub change_pct: Option<f64>,
    pub turnover_rate: Option<f64>,
    pub amount: Option<f64>,
    pub volume_ratio: Option<f64>,
    pub volume_level: VolumeLevel,
    pub position_score: f64,
    pub momentum_score: f64,
    pub activity_score: f64,
    pub liquidity_score: f64,
    pub volume_ratio_score: Option<f64>,
}

/// Output of one funnel pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedBoard {
    pub period: FlowPeriod,
    pub trading_date: NaiveDate,
    /// Top-N eligible entries, rank order
    pub leaderboard: Vec<RankedEntry>,
    /// Every record: rescored candidates, then unpromoted records
    pub full: Vec<RankedEntry>,
    pub stages: Vec<StageResult>,
    pub config_summary: String,
    pub duration_secs: f64,
}

impl RankedBoard {
    /// Leaderboard as flat rows, ranked from 1.
    pub fn rows(&self) -> Vec<LeaderboardRow> {
        self.leaderboard
            .iter()
            .enumerate()
            .map(|(i, e)| LeaderboardRow {
                rank: i + 1,
                code: e.record.code.clone(),
                name: e.record.name.clone(),
                float_market_cap: e.record.float_market_cap,
                composite: e.breakdown.composite,
                position_ratio: e.record.position_ratio,
                ratio_basis: e.record.ratio_basis,
                change_pct: e.record.change_pct,
                turnover_rate: e.record.turnover_rate,
                amount: e.record.amount,
                volume_ratio: e.volume_ratio,
                volume_level: e.volume_level,
                position_score: e.breakdown.position,
                momentum_score: e.breakdown.momentum,
                activity_score: e.breakdown.activity,
                liquidity_score: e.breakdown.liquidity,
                volume_ratio_score: e.breakdown.volume_ratio,
            })
            .collect()
    }

    /// Leaderboard codes in rank order.
    pub fn codes(&self) -> Vec<String> {
        self.leaderboard.iter().map(|e| e.record.code.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.leaderboard.is_empty()
    }
}

// ============================================================================
// Selection Funnel
// ============================================================================

/// Two-phase ranking over a resolved dataset.
pub struct SelectionFunnel {
    config: FunnelConfig,
}

impl SelectionFunnel {
    pub fn new(config: FunnelConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(FunnelConfig::default())
    }

    pub fn config(&self) -> &FunnelConfig {
        &self.config
    }

    /// Phase 1 only: 4-dim scores for every record, sorted.
    pub fn score_universe(&self, records: &[FundFlowRecord]) -> Vec<RankedEntry> {
        let mut entries: Vec<RankedEntry> = records
            .iter()
            .cloned()
            .enumerate()
            .map(|(seq, record)| RankedEntry::phase_one(seq, record))
            .collect();
        entries.sort_by(by_composite);
        entries
    }

    /// Rank a dataset. `volume` is consulted only for eligible candidates.
    pub async fn rank(
        &self,
        dataset: &Dataset,
        volume: Option<&dyn VolumeRatioSource>,
    ) -> RankedBoard {
        let started = Instant::now();
        let total = dataset.len();

        // Phase 1
        let mut entries = self.score_universe(&dataset.records);
        let mut stages = vec![StageResult::new(FunnelStage::Universe, total, total)];

        let pool = self.config.candidate_pool.min(entries.len());
        let rest = entries.split_off(pool);
        let mut candidates = entries;
        stages.push(StageResult::new(FunnelStage::Candidates, total, pool));

        // Float cap screen, candidates first so screened names are never enriched
        for entry in candidates.iter_mut() {
            entry.promoted = true;
            entry.eligible = self.passes_cap_screen(&entry.record);
        }
        let eligible_codes: Vec<String> = candidates
            .iter()
            .filter(|e| e.eligible)
            .map(|e| e.record.code.clone())
            .collect();
        stages.push(StageResult::new(FunnelStage::MarketCap, pool, eligible_codes.len()));

        // Phase 2
        let enriched = match volume {
            Some(source) if self.config.volume_ratio_enabled && !eligible_codes.is_empty() => {
                let outcome = source
                    .volume_ratios(&eligible_codes, self.config.volume_lookback_days)
                    .await;
                if !outcome.failed.is_empty() {
                    warn!(
                        period = %dataset.period,
                        failed = outcome.failed.len(),
                        succeeded = outcome.succeeded(),
                        "Volume ratio missing for some candidates, keeping 4-dim scores"
                    );
                }
                apply_volume_ratios(&mut candidates, &outcome.values)
            }
            _ => 0,
        };
        stages.push(StageResult::new(FunnelStage::VolumeRatio, eligible_codes.len(), enriched));

        candidates.sort_by(by_composite);

        let mut full = candidates;
        full.extend(rest.into_iter().map(|mut e| {
            e.eligible = self.passes_cap_screen(&e.record);
            e
        }));

        let leaderboard: Vec<RankedEntry> = full
            .iter()
            .filter(|e| e.eligible)
            .take(self.config.top_n)
            .cloned()
            .collect();
        stages.push(StageResult::new(FunnelStage::Leaderboard, total, leaderboard.len()));

        let duration_secs = started.elapsed().as_secs_f64();
        info!(
            period = %dataset.period,
            universe = total,
            candidates = pool,
            enriched,
            leaderboard = leaderboard.len(),
            duration_secs = %format!("{:.2}", duration_secs),
            "Selection funnel complete"
        );

        RankedBoard {
            period: dataset.period,
            trading_date: dataset.trading_date,
            leaderboard,
            full,
            stages,
            config_summary: self.config.summary(),
            duration_secs,
        }
    }

    /// Unknown float cap stays eligible.
    fn passes_cap_screen(&self, record: &FundFlowRecord) -> bool {
        record
            .float_market_cap
            .map_or(true, |cap| cap < self.config.float_cap_ceiling)
    }
}

fn apply_volume_ratios(candidates: &mut [RankedEntry], ratios: &HashMap<String, f64>) -> usize {
    let mut applied = 0;
    for entry in candidates.iter_mut() {
        if let Some(&ratio) = ratios.get(&entry.record.code) {
            entry.apply_volume_ratio(ratio);
            applied += 1;
        }
    }
    debug!(applied, "Applied volume ratios");
    applied
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::normalize::YI;
    use crate::data::provider::ProviderError;
    use std::sync::Mutex;

    struct FixedRatios {
        ratios: HashMap<String, f64>,
        requested: Mutex<Vec<String>>,
    }

    impl FixedRatios {
        fn new(pairs: &[(&str, f64)]) -> Self {
            Self {
                ratios: pairs.iter().map(|(c, r)| (c.to_string(), *r)).collect(),
                requested: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl VolumeRatioSource for FixedRatios {
        async fn volume_ratios(&self, codes: &[String], _lookback: usize) -> BatchOutcome<f64> {
            self.requested.lock().unwrap().extend(codes.iter().cloned());
            let mut outcome = BatchOutcome::default();
            for code in codes {
                match self.ratios.get(code) {
                    Some(r) => {
                        outcome.values.insert(code.clone(), *r);
                    }
                    None => outcome
                        .failed
                        .push((code.clone(), ProviderError::DataNotAvailable(code.clone()))),
                }
            }
            outcome
        }
    }

    fn record(code: &str, ratio: f64, change: f64, cap: Option<f64>) -> FundFlowRecord {
        let mut r = FundFlowRecord::new(code, format!("股票{}", code));
        r.position_ratio = Some(ratio);
        r.ratio_basis = RatioBasis::PrimaryCapital;
        r.change_pct = Some(change);
        r.turnover_rate = Some(6.0);
        r.amount = Some(3.0 * YI);
        r.float_market_cap = cap;
        r
    }

    fn dataset(records: Vec<FundFlowRecord>) -> Dataset {
        Dataset::new(
            FlowPeriod::Instant,
            NaiveDate::from_ymd_opt(2024, 6, 7).unwrap(),
            records,
        )
    }

    fn funnel(top_n: usize, pool: usize) -> SelectionFunnel {
        SelectionFunnel::new(FunnelConfig {
            top_n,
            candidate_pool: pool,
            ..FunnelConfig::default()
        })
    }

    #[tokio::test]
    async fn test_rank_without_volume_source() {
        let ds = dataset(vec![
            record("000001", 3.0, 1.0, None),
            record("000002", 26.0, 10.0, None),
            record("000003", 12.0, 4.0, None),
        ]);

        let board = funnel(2, 10).rank(&ds, None).await;
        assert_eq!(board.codes(), vec!["000002", "000003"]);
        assert_eq!(board.full.len(), 3);
        assert!(board.leaderboard.iter().all(|e| e.volume_ratio.is_none()));
        assert_eq!(board.rows()[0].rank, 1);
    }

    #[tokio::test]
    async fn test_ties_keep_provider_order() {
        let ds = dataset(vec![
            record("600001", 10.0, 2.0, None),
            record("000009", 10.0, 2.0, None),
            record("300005", 10.0, 2.0, None),
        ]);

        let board = funnel(3, 10).rank(&ds, None).await;
        assert_eq!(board.codes(), vec!["600001", "000009", "300005"]);
    }

    #[tokio::test]
    async fn test_cap_screen_excludes_from_leaderboard_only() {
        let ds = dataset(vec![
            record("600519", 26.0, 10.0, Some(2.0e12)),
            record("000001", 12.0, 4.0, Some(5.0e10)),
            record("000002", 5.0, 1.0, None),
        ]);
        let source = FixedRatios::new(&[("600519", 2.5), ("000001", 2.5), ("000002", 2.5)]);

        let board = funnel(5, 10).rank(&ds, Some(&source)).await;

        assert_eq!(board.codes(), vec!["000001", "000002"]);
        assert_eq!(board.full.len(), 3);
        let screened = board.full.iter().find(|e| e.record.code == "600519").unwrap();
        assert!(!screened.eligible);
        assert!(screened.volume_ratio.is_none());
        // screened names are never sent for enrichment
        let requested = source.requested.lock().unwrap();
        assert!(!requested.contains(&"600519".to_string()));
    }

    #[tokio::test]
    async fn test_only_candidates_are_enriched() {
        let ds = dataset(vec![
            record("000001", 26.0, 10.0, None),
            record("000002", 20.0, 7.0, None),
            record("000003", 1.0, 0.5, None),
        ]);
        let source = FixedRatios::new(&[("000001", 2.5), ("000002", 2.5), ("000003", 2.5)]);

        let board = funnel(3, 2).rank(&ds, Some(&source)).await;

        assert_eq!(source.requested.lock().unwrap().len(), 2);
        let last = board.full.last().unwrap();
        assert_eq!(last.record.code, "000003");
        assert!(!last.promoted);
        assert!(last.volume_ratio.is_none());
        assert_eq!(last.breakdown.composite, last.base_composite);
    }

    #[tokio::test]
    async fn test_volume_ratio_can_reorder_candidates() {
        // identical phase-1 scores; a 2.5x volume ratio lifts the second
        let ds = dataset(vec![
            record("000001", 12.0, 4.0, None),
            record("000002", 12.0, 4.0, None),
        ]);
        let source = FixedRatios::new(&[("000001", 0.5), ("000002", 2.5)]);

        let board = funnel(2, 10).rank(&ds, Some(&source)).await;
        assert_eq!(board.codes(), vec!["000002", "000001"]);
        assert!(board.leaderboard[0].breakdown.uses_volume_ratio());
    }

    #[tokio::test]
    async fn test_failed_volume_ratio_keeps_base_score() {
        let ds = dataset(vec![record("000001", 12.0, 4.0, None)]);
        let source = FixedRatios::new(&[]);

        let board = funnel(1, 10).rank(&ds, Some(&source)).await;
        let entry = &board.leaderboard[0];
        assert!(entry.promoted);
        assert!(entry.volume_ratio.is_none());
        assert_eq!(entry.composite(), entry.base_composite);
    }

    #[tokio::test]
    async fn test_stage_counts() {
        let ds = dataset(vec![
            record("000001", 26.0, 10.0, Some(2.0e12)),
            record("000002", 12.0, 4.0, None),
            record("000003", 1.0, 0.5, None),
        ]);

        let board = funnel(1, 2).rank(&ds, None).await;
        let passed: Vec<usize> = board.stages.iter().map(|s| s.passed).collect();
        assert_eq!(passed, vec![3, 2, 1, 0, 1]);
        assert_eq!(board.stages[2].stage, FunnelStage::MarketCap);
        assert_eq!(board.stages[2].elimination_rate, 50.0);
    }

    #[tokio::test]
    async fn test_empty_dataset() {
        let board = funnel(20, 500).rank(&dataset(vec![]), None).await;
        assert!(board.is_empty());
        assert!(board.full.is_empty());
    }
}
