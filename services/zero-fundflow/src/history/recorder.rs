//! Leaderboard and backtest recording.
//!
//! Every step is independent: a failing step is logged and reported, and
//! the remaining steps still run.

use std::collections::HashMap;
use tracing::{info, warn};

use super::store::{BacktestRow, HistoryStore, SnapshotRow};
use crate::screener::{RankedBoard, RankedEntry};

/// What one recording call did.
#[derive(Debug, Clone, Default)]
pub struct RecordReport {
    pub snapshot_rows: usize,
    pub newly_tracked: usize,
    pub tracked_total: usize,
    pub backtest_rows: usize,
    /// Tracked codes absent from today's universe
    pub missing_tracked: usize,
    pub errors: Vec<String>,
}

impl RecordReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    fn merge(&mut self, other: RecordReport) {
        self.snapshot_rows += other.snapshot_rows;
        self.newly_tracked += other.newly_tracked;
        self.tracked_total = self.tracked_total.max(other.tracked_total);
        self.backtest_rows += other.backtest_rows;
        self.missing_tracked += other.missing_tracked;
        self.errors.extend(other.errors);
    }
}

impl std::fmt::Display for RecordReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} snapshot rows, {} newly tracked ({} total), {} backtest rows, {} errors",
            self.snapshot_rows,
            self.newly_tracked,
            self.tracked_total,
            self.backtest_rows,
            self.errors.len()
        )
    }
}

/// Writes ranking passes into the history store.
#[derive(Debug, Clone)]
pub struct HistoryRecorder {
    store: HistoryStore,
}

impl HistoryRecorder {
    pub fn new(store: HistoryStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &HistoryStore {
        &self.store
    }

    /// Leaderboard snapshot plus backtest rows for the whole tracked universe.
    pub fn record_pass(&self, board: &RankedBoard) -> RecordReport {
        let mut report = self.record_leaderboard(board);
        report.merge(self.record_backtest_day(board));

        if report.is_ok() {
            info!(period = %board.period, date = %board.trading_date, "Recorded history: {}", report);
        } else {
            warn!(period = %board.period, date = %board.trading_date, "Recorded history with errors: {}", report);
        }
        report
    }

    /// Replace today's snapshot for the board's period and track its codes.
    pub fn record_leaderboard(&self, board: &RankedBoard) -> RecordReport {
        let mut report = RecordReport::default();

        let rows: Vec<SnapshotRow> = board
            .leaderboard
            .iter()
            .enumerate()
            .map(|(i, e)| SnapshotRow {
                rank: i + 1,
                code: e.record.code.clone(),
                name: e.record.name.clone(),
                composite: e.composite(),
            })
            .collect();

        match self.store.replace_snapshot(board.trading_date, board.period, &rows) {
            Ok(n) => report.snapshot_rows = n,
            Err(e) => {
                warn!(error = %e, "Failed to save daily snapshot");
                report.errors.push(format!("snapshot: {:#}", e));
            }
        }

        let stocks: Vec<(String, String)> = rows.into_iter().map(|r| (r.code, r.name)).collect();
        match self.store.track(&stocks, board.trading_date, board.period) {
            Ok(n) => report.newly_tracked = n,
            Err(e) => {
                warn!(error = %e, "Failed to update tracked stocks");
                report.errors.push(format!("tracking: {:#}", e));
            }
        }

        report
    }

    /// One detail row per tracked code found in today's universe.
    pub fn record_backtest_day(&self, board: &RankedBoard) -> RecordReport {
        let mut report = RecordReport::default();

        let tracked = match self.store.tracked_codes() {
            Ok(codes) => codes,
            Err(e) => {
                warn!(error = %e, "Failed to read tracked universe");
                report.errors.push(format!("tracked universe: {:#}", e));
                return report;
            }
        };
        report.tracked_total = tracked.len();

        let by_code: HashMap<&str, &RankedEntry> =
            board.full.iter().map(|e| (e.record.code.as_str(), e)).collect();
        let ranks: HashMap<&str, usize> = board
            .leaderboard
            .iter()
            .enumerate()
            .map(|(i, e)| (e.record.code.as_str(), i + 1))
            .collect();

        let rows: Vec<BacktestRow> = tracked
            .iter()
            .filter_map(|code| by_code.get(code.as_str()))
            .map(|e| BacktestRow {
                code: e.record.code.clone(),
                name: e.record.name.clone(),
                price: e.record.price,
                change_pct: e.record.change_pct,
                turnover_rate: e.record.turnover_rate,
                amount: e.record.amount,
                primary_net: e.record.primary_net,
                position_ratio: e.record.position_ratio,
                composite: Some(e.composite()),
                leaderboard_rank: ranks.get(e.record.code.as_str()).copied(),
            })
            .collect();
        report.missing_tracked = tracked.len() - rows.len();

        match self.store.upsert_backtest(board.trading_date, &rows) {
            Ok(n) => report.backtest_rows = n,
            Err(e) => {
                warn!(error = %e, "Failed to save backtest details");
                report.errors.push(format!("backtest: {:#}", e));
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Dataset, FlowPeriod, FundFlowRecord};
    use crate::history::HistoryStoreConfig;
    use crate::screener::{FunnelConfig, SelectionFunnel};
    use chrono::NaiveDate;
    use tempfile::tempdir;

    async fn board(day: u32, ratios: &[(&str, f64)], top_n: usize) -> RankedBoard {
        let records = ratios
            .iter()
            .map(|(code, ratio)| {
                let mut r = FundFlowRecord::new(*code, format!("股票{}", code));
                r.position_ratio = Some(*ratio);
                r.price = Some(10.0);
                r
            })
            .collect();
        let dataset = Dataset::new(
            FlowPeriod::Instant,
            NaiveDate::from_ymd_opt(2024, 6, day).unwrap(),
            records,
        );
        SelectionFunnel::new(FunnelConfig::default().with_top_n(top_n))
            .rank(&dataset, None)
            .await
    }

    #[tokio::test]
    async fn test_record_pass() {
        let dir = tempdir().unwrap();
        let store = HistoryStore::new(HistoryStoreConfig::with_path(dir.path().join("h.db"))).unwrap();
        let recorder = HistoryRecorder::new(store);

        let day1 = board(6, &[("000001", 26.0), ("000002", 12.0), ("000003", 1.0)], 2).await;
        let report = recorder.record_pass(&day1);
        assert!(report.is_ok());
        assert_eq!(report.snapshot_rows, 2);
        assert_eq!(report.newly_tracked, 2);
        assert_eq!(report.backtest_rows, 2);

        // 000001 drops out of the universe, 000003 enters the leaderboard
        let day2 = board(7, &[("000003", 26.0), ("000002", 12.0)], 1).await;
        let report = recorder.record_pass(&day2);
        assert_eq!(report.newly_tracked, 1);
        assert_eq!(report.tracked_total, 3);
        assert_eq!(report.backtest_rows, 2);
        assert_eq!(report.missing_tracked, 1);

        let details = recorder
            .store()
            .load_backtest(NaiveDate::from_ymd_opt(2024, 6, 7).unwrap())
            .unwrap();
        let ranks: Vec<(String, Option<usize>)> =
            details.into_iter().map(|d| (d.code, d.leaderboard_rank)).collect();
        assert_eq!(
            ranks,
            vec![("000002".to_string(), None), ("000003".to_string(), Some(1))]
        );
    }

    #[tokio::test]
    async fn test_store_failure_is_reported_not_raised() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("h.db");
        let store = HistoryStore::new(HistoryStoreConfig::with_path(&path)).unwrap();
        let recorder = HistoryRecorder::new(store);

        // replace the database with a directory so every open fails
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        let day = board(7, &[("000001", 26.0)], 1).await;
        let report = recorder.record_pass(&day);
        assert!(!report.is_ok());
        assert_eq!(report.snapshot_rows, 0);
        assert_eq!(report.errors.len(), 3);
    }
}
