//! SQLite store for leaderboard history and the backtest universe.
//!
//! Tables:
//! - `tracked_stocks`: every code that ever reached a leaderboard (append-only)
//! - `daily_snapshots`: leaderboard ranks, replaced per (date, period)
//! - `backtest_details`: one row per tracked code per trading date
//!
//! Unlike the cache store, nothing here is pruned.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::data::{normalize_code, FlowPeriod};

// ============================================================================
// Database Schema
// ============================================================================

const CREATE_TABLES_SQL: &str = r#"
-- Append-only tracked universe
CREATE TABLE IF NOT EXISTS tracked_stocks (
    code TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    first_seen TEXT NOT NULL,
    first_period TEXT NOT NULL,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);

-- Leaderboard ranks
CREATE TABLE IF NOT EXISTS daily_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    trading_date TEXT NOT NULL,
    period TEXT NOT NULL,
    rank INTEGER NOT NULL,
    code TEXT NOT NULL,
    name TEXT NOT NULL,
    composite REAL NOT NULL,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(trading_date, code, period)
);

CREATE INDEX IF NOT EXISTS idx_daily_snapshots_date
ON daily_snapshots(trading_date, period);

-- Backtest detail rows
CREATE TABLE IF NOT EXISTS backtest_details (
    trading_date TEXT NOT NULL,
    code TEXT NOT NULL,
    name TEXT NOT NULL,
    price REAL,
    change_pct REAL,
    turnover_rate REAL,
    amount REAL,
    primary_net REAL,
    position_ratio REAL,
    composite REAL,
    leaderboard_rank INTEGER,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (trading_date, code)
);
"#;

const DATE_FORMAT: &str = "%Y-%m-%d";

fn date_key(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn parse_date(raw: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

// ============================================================================
// Row Types
// ============================================================================

/// One leaderboard rank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub rank: usize,
    pub code: String,
    pub name: String,
    pub composite: f64,
}

/// A tracked instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedStock {
    pub code: String,
    pub name: String,
    pub first_seen: NaiveDate,
    pub first_period: String,
}

/// One day of detail for a tracked instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestRow {
    pub code: String,
    pub name: String,
    pub price: Option<f64>,
    pub change_pct: Option<f64>,
    pub turnover_rate: Option<f64>,
    pub amount: Option<f64>,
    pub primary_net: Option<f64>,
    pub position_ratio: Option<f64>,
    pub composite: Option<f64>,
    /// Rank on that day's leaderboard, if it made it
    pub leaderboard_rank: Option<usize>,
}

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the history store
#[derive(Debug, Clone)]
pub struct HistoryStoreConfig {
    pub db_path: PathBuf,
    pub busy_timeout_ms: u64,
}

impl Default for HistoryStoreConfig {
    fn default() -> Self {
        Self {
            db_path: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".codecoder")
                .join("fundflow_history.db"),
            busy_timeout_ms: 5_000,
        }
    }
}

impl HistoryStoreConfig {
    pub fn with_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Default::default()
        }
    }
}

// ============================================================================
// History Store
// ============================================================================

/// SQLite store for leaderboard history
#[derive(Debug, Clone)]
pub struct HistoryStore {
    config: HistoryStoreConfig,
}

impl HistoryStore {
    pub fn new(config: HistoryStoreConfig) -> Result<Self> {
        if let Some(parent) = config.db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let store = Self { config };
        let conn = store.open()?;
        conn.execute_batch(CREATE_TABLES_SQL)
            .context("Failed to create history tables")?;

        info!(db_path = %store.config.db_path.display(), "Initialized history store");
        Ok(store)
    }

    pub fn db_path(&self) -> &PathBuf {
        &self.config.db_path
    }

    fn open(&self) -> Result<Connection> {
        let conn = Connection::open(&self.config.db_path)
            .context("Failed to open history database")?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .context("Failed to set database pragmas")?;
        conn.busy_timeout(std::time::Duration::from_millis(self.config.busy_timeout_ms))
            .context("Failed to set busy timeout")?;

        Ok(conn)
    }

    // ========================================================================
    // Daily Snapshots
    // ========================================================================

    /// Replace all ranks for `(date, period)` with `rows`.
    pub fn replace_snapshot(
        &self,
        trading_date: NaiveDate,
        period: FlowPeriod,
        rows: &[SnapshotRow],
    ) -> Result<usize> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let date = date_key(trading_date);

        tx.execute(
            "DELETE FROM daily_snapshots WHERE trading_date = ?1 AND period = ?2",
            params![date, period.as_str()],
        )
        .context("Failed to clear daily snapshot")?;

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR REPLACE INTO daily_snapshots
                (trading_date, period, rank, code, name, composite)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )?;
            for row in rows {
                stmt.execute(params![
                    date,
                    period.as_str(),
                    row.rank as i64,
                    row.code,
                    row.name,
                    row.composite,
                ])?;
            }
        }

        tx.commit().context("Failed to commit daily snapshot")?;

        debug!(date = %date, period = %period, count = rows.len(), "Replaced daily snapshot");
        Ok(rows.len())
    }

    /// Ranks for `(date, period)`, rank order.
    pub fn load_snapshot(&self, trading_date: NaiveDate, period: FlowPeriod) -> Result<Vec<SnapshotRow>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT rank, code, name, composite FROM daily_snapshots
            WHERE trading_date = ?1 AND period = ?2
            ORDER BY rank ASC
            "#,
        )?;

        let rows = stmt
            .query_map(params![date_key(trading_date), period.as_str()], |row| {
                let code: String = row.get(1)?;
                Ok(SnapshotRow {
                    rank: row.get::<_, i64>(0)? as usize,
                    code: normalize_code(&code).unwrap_or(code),
                    name: row.get(2)?,
                    composite: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read daily snapshot")?;

        Ok(rows)
    }

    // ========================================================================
    // Tracked Universe
    // ========================================================================

    /// Add codes to the tracked universe. Existing codes are left untouched.
    ///
    /// Returns the number of newly tracked codes.
    pub fn track(
        &self,
        stocks: &[(String, String)],
        trading_date: NaiveDate,
        period: FlowPeriod,
    ) -> Result<usize> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let date = date_key(trading_date);

        let mut added = 0;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR IGNORE INTO tracked_stocks (code, name, first_seen, first_period)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )?;
            for (code, name) in stocks {
                added += stmt.execute(params![code, name, date, period.as_str()])?;
            }
        }

        tx.commit().context("Failed to commit tracked stocks")?;
        Ok(added)
    }

    /// Tracked codes, oldest first.
    pub fn tracked_codes(&self) -> Result<Vec<String>> {
        Ok(self.tracked_stocks()?.into_iter().map(|s| s.code).collect())
    }

    pub fn tracked_stocks(&self) -> Result<Vec<TrackedStock>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT code, name, first_seen, first_period FROM tracked_stocks ORDER BY first_seen, code",
        )?;

        let stocks = stmt
            .query_map([], |row| {
                let first_seen: String = row.get(2)?;
                Ok(TrackedStock {
                    code: row.get(0)?,
                    name: row.get(1)?,
                    first_seen: parse_date(&first_seen)?,
                    first_period: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read tracked stocks")?;

        Ok(stocks)
    }

    // ========================================================================
    // Backtest Details
    // ========================================================================

    /// Upsert detail rows for a trading date, keyed by (date, code).
    pub fn upsert_backtest(&self, trading_date: NaiveDate, rows: &[BacktestRow]) -> Result<usize> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let date = date_key(trading_date);

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR REPLACE INTO backtest_details
                (trading_date, code, name, price, change_pct, turnover_rate, amount,
                 primary_net, position_ratio, composite, leaderboard_rank)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                "#,
            )?;
            for row in rows {
                stmt.execute(params![
                    date,
                    row.code,
                    row.name,
                    row.price,
                    row.change_pct,
                    row.turnover_rate,
                    row.amount,
                    row.primary_net,
                    row.position_ratio,
                    row.composite,
                    row.leaderboard_rank.map(|r| r as i64),
                ])?;
            }
        }

        tx.commit().context("Failed to commit backtest details")?;

        debug!(date = %date, count = rows.len(), "Upserted backtest details");
        Ok(rows.len())
    }

    pub fn load_backtest(&self, trading_date: NaiveDate) -> Result<Vec<BacktestRow>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT code, name, price, change_pct, turnover_rate, amount,
                   primary_net, position_ratio, composite, leaderboard_rank
            FROM backtest_details WHERE trading_date = ?1 ORDER BY code
            "#,
        )?;

        let rows = stmt
            .query_map(params![date_key(trading_date)], |row| {
                Ok(BacktestRow {
                    code: row.get(0)?,
                    name: row.get(1)?,
                    price: row.get(2)?,
                    change_pct: row.get(3)?,
                    turnover_rate: row.get(4)?,
                    amount: row.get(5)?,
                    primary_net: row.get(6)?,
                    position_ratio: row.get(7)?,
                    composite: row.get(8)?,
                    leaderboard_rank: row.get::<_, Option<i64>>(9)?.map(|r| r as usize),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read backtest details")?;

        Ok(rows)
    }

    /// Get row counts per table
    pub fn stats(&self) -> Result<HistoryStats> {
        let conn = self.open()?;
        let count = |table: &str| -> Result<u64> {
            let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get(0)
            })?;
            Ok(n as u64)
        };

        Ok(HistoryStats {
            tracked_stocks: count("tracked_stocks")?,
            snapshot_rows: count("daily_snapshots")?,
            backtest_rows: count("backtest_details")?,
        })
    }
}

/// Statistics about the history store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryStats {
    pub tracked_stocks: u64,
    pub snapshot_rows: u64,
    pub backtest_rows: u64,
}

impl std::fmt::Display for HistoryStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "History: {} tracked, {} snapshot rows, {} backtest rows",
            self.tracked_stocks, self.snapshot_rows, self.backtest_rows
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
