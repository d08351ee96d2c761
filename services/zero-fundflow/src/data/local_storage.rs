//! Persistent tier of the fund-flow cache using SQLite.
//!
//! Provides date-scoped storage for:
//! - Raw provider columns per (signal kind, period)
//! - Derived/scored datasets per (signal kind, period)
//! - Primary-capital enrichment results
//!
//! A connection is opened per operation. Every save replaces all earlier
//! rows for its key inside one transaction, so readers never observe an
//! empty interval and a new trading date supersedes the previous one.

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, Row};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info};

use super::provider::CapitalSplit;
use super::{
    current_trading_date, normalize_code, Dataset, FlowPeriod, FundFlowRecord, RatioBasis,
    SignalKind,
};

// ============================================================================
// Database Schema
// ============================================================================

const CREATE_TABLES_SQL: &str = r#"
-- Raw provider columns
CREATE TABLE IF NOT EXISTS fund_flow_raw (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    trading_date TEXT NOT NULL,
    signal_kind TEXT NOT NULL,
    period TEXT NOT NULL,
    seq INTEGER NOT NULL,
    code TEXT NOT NULL,
    name TEXT NOT NULL,
    price REAL,
    change_pct REAL,
    turnover_rate REAL,
    amount REAL,
    net_inflow REAL,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(trading_date, signal_kind, period, code)
);

CREATE INDEX IF NOT EXISTS idx_fund_flow_raw_key
ON fund_flow_raw(signal_kind, period, trading_date);

-- Derived/scored datasets
CREATE TABLE IF NOT EXISTS fund_flow_scored (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    trading_date TEXT NOT NULL,
    signal_kind TEXT NOT NULL,
    period TEXT NOT NULL,
    seq INTEGER NOT NULL,
    code TEXT NOT NULL,
    name TEXT NOT NULL,
    price REAL,
    change_pct REAL,
    turnover_rate REAL,
    amount REAL,
    net_inflow REAL,
    super_large_net REAL,
    large_net REAL,
    primary_net REAL,
    position_ratio REAL,
    ratio_basis TEXT NOT NULL,
    float_market_cap REAL,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(trading_date, signal_kind, period, code)
);

CREATE INDEX IF NOT EXISTS idx_fund_flow_scored_key
ON fund_flow_scored(signal_kind, period, trading_date);

-- Primary-capital enrichment results
CREATE TABLE IF NOT EXISTS capital_flow_cache (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    trading_date TEXT NOT NULL,
    code TEXT NOT NULL,
    super_large_net REAL NOT NULL,
    large_net REAL NOT NULL,
    primary_net REAL NOT NULL,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(trading_date, code)
);
"#;

/// Date-scoped tables pruned by retention
const DATED_TABLES: [&str; 3] = ["fund_flow_raw", "fund_flow_scored", "capital_flow_cache"];

const DATE_FORMAT: &str = "%Y-%m-%d";

fn date_key(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Read a code column, re-padding to 6 digits whatever type it was stored as.
fn read_code(row: &Row<'_>, idx: usize) -> rusqlite::Result<String> {
    let raw = match row.get_ref(idx)? {
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => format!("{}", f),
        ValueRef::Text(t) | ValueRef::Blob(t) => String::from_utf8_lossy(t).into_owned(),
        ValueRef::Null => String::new(),
    };
    Ok(normalize_code(&raw).unwrap_or(raw))
}

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for local storage
#[derive(Debug, Clone)]
pub struct LocalStorageConfig {
    /// Path to SQLite database
    pub db_path: PathBuf,
    /// Busy timeout for concurrent writers
    pub busy_timeout_ms: u64,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            db_path: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".codecoder")
                .join("fundflow.db"),
            busy_timeout_ms: 5_000,
        }
    }
}

impl LocalStorageConfig {
    pub fn with_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Default::default()
        }
    }
}

// ============================================================================
// Local Storage
// ============================================================================

/// SQLite store for date-scoped fund-flow caches
#[derive(Debug, Clone)]
pub struct LocalStorage {
    config: LocalStorageConfig,
}

impl LocalStorage {
    /// Create the store, ensuring the directory and schema exist.
    pub fn new(config: LocalStorageConfig) -> Result<Self> {
        if let Some(parent) = config.db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let storage = Self { config };
        let conn = storage.open()?;
        conn.execute_batch(CREATE_TABLES_SQL)
            .context("Failed to create database tables")?;

        info!(db_path = %storage.config.db_path.display(), "Initialized fund-flow storage");
        Ok(storage)
    }

    /// Get the database path
    pub fn db_path(&self) -> &PathBuf {
        &self.config.db_path
    }

    /// Open a short-lived connection.
    fn open(&self) -> Result<Connection> {
        let conn = Connection::open(&self.config.db_path)
            .context("Failed to open fund-flow database")?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .context("Failed to set database pragmas")?;
        conn.busy_timeout(std::time::Duration::from_millis(self.config.busy_timeout_ms))
            .context("Failed to set busy timeout")?;

        Ok(conn)
    }

    // ========================================================================
    // Dataset Operations
    // ========================================================================

    /// Save a dataset as both a raw copy and a derived copy.
    ///
    /// All earlier rows for `(kind, period)` are deleted in the same transaction.
    pub fn save_dataset(&self, kind: SignalKind, dataset: &Dataset) -> Result<usize> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let date = date_key(dataset.trading_date);
        let period = dataset.period.as_str();

        for table in ["fund_flow_raw", "fund_flow_scored"] {
            tx.execute(
                &format!("DELETE FROM {} WHERE signal_kind = ?1 AND period = ?2", table),
                params![kind.as_str(), period],
            )
            .with_context(|| format!("Failed to clear {}", table))?;
        }

        {
            let mut raw_stmt = tx.prepare(
                r#"
                INSERT OR REPLACE INTO fund_flow_raw
                (trading_date, signal_kind, period, seq, code, name,
                 price, change_pct, turnover_rate, amount, net_inflow)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                "#,
            )?;
            let mut scored_stmt = tx.prepare(
                r#"
                INSERT OR REPLACE INTO fund_flow_scored
                (trading_date, signal_kind, period, seq, code, name,
                 price, change_pct, turnover_rate, amount, net_inflow,
                 super_large_net, large_net, primary_net, position_ratio,
                 ratio_basis, float_market_cap)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
                "#,
            )?;

            for (seq, r) in dataset.records.iter().enumerate() {
                raw_stmt.execute(params![
                    date,
                    kind.as_str(),
                    period,
                    seq as i64,
                    r.code,
                    r.name,
                    r.price,
                    r.change_pct,
                    r.turnover_rate,
                    r.amount,
                    r.net_inflow,
                ])?;
                scored_stmt.execute(params![
                    date,
                    kind.as_str(),
                    period,
                    seq as i64,
                    r.code,
                    r.name,
                    r.price,
                    r.change_pct,
                    r.turnover_rate,
                    r.amount,
                    r.net_inflow,
                    r.super_large_net,
                    r.large_net,
                    r.primary_net,
                    r.position_ratio,
                    r.ratio_basis.as_str(),
                    r.float_market_cap,
                ])?;
            }
        }

        tx.commit().context("Failed to commit dataset")?;

        debug!(kind = %kind, period = %period, date = %date, count = dataset.len(), "Saved dataset");
        Ok(dataset.len())
    }

    /// Load the derived dataset for a trading date, in provider order.
    pub fn load_dataset(
        &self,
        kind: SignalKind,
        period: FlowPeriod,
        trading_date: NaiveDate,
    ) -> Result<Option<Dataset>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT code, name, price, change_pct, turnover_rate, amount, net_inflow,
                   super_large_net, large_net, primary_net, position_ratio,
                   ratio_basis, float_market_cap
            FROM fund_flow_scored
            WHERE signal_kind = ?1 AND period = ?2 AND trading_date = ?3
            ORDER BY seq ASC
            "#,
        )?;

        let records = stmt
            .query_map(
                params![kind.as_str(), period.as_str(), date_key(trading_date)],
                |row| {
                    let basis: String = row.get(11)?;
                    Ok(FundFlowRecord {
                        code: read_code(row, 0)?,
                        name: row.get(1)?,
                        price: row.get(2)?,
                        change_pct: row.get(3)?,
                        turnover_rate: row.get(4)?,
                        amount: row.get(5)?,
                        net_inflow: row.get(6)?,
                        super_large_net: row.get(7)?,
                        large_net: row.get(8)?,
                        primary_net: row.get(9)?,
                        position_ratio: row.get(10)?,
                        ratio_basis: RatioBasis::parse(&basis),
                        float_market_cap: row.get(12)?,
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read cached dataset")?;

        if records.is_empty() {
            return Ok(None);
        }

        Ok(Some(Dataset::new(period, trading_date, records)))
    }

    // ========================================================================
    // Enrichment Operations
    // ========================================================================

    /// Replace the enrichment cache with `flows` for a trading date.
    pub fn save_capital_flows(
        &self,
        trading_date: NaiveDate,
        flows: &HashMap<String, CapitalSplit>,
    ) -> Result<usize> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let date = date_key(trading_date);

        tx.execute("DELETE FROM capital_flow_cache", [])
            .context("Failed to clear capital_flow_cache")?;

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR REPLACE INTO capital_flow_cache
                (trading_date, code, super_large_net, large_net, primary_net)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )?;
            for (code, split) in flows {
                stmt.execute(params![
                    date,
                    code,
                    split.super_large_net,
                    split.large_net,
                    split.primary_net,
                ])?;
            }
        }

        tx.commit().context("Failed to commit capital flows")?;

        debug!(date = %date, count = flows.len(), "Saved capital flows");
        Ok(flows.len())
    }

    /// Load cached enrichment results for a trading date.
    pub fn load_capital_flows(&self, trading_date: NaiveDate) -> Result<HashMap<String, CapitalSplit>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT code, super_large_net, large_net, primary_net
            FROM capital_flow_cache
            WHERE trading_date = ?1
            "#,
        )?;

        let flows = stmt
            .query_map(params![date_key(trading_date)], |row| {
                Ok((
                    read_code(row, 0)?,
                    CapitalSplit {
                        super_large_net: row.get(1)?,
                        large_net: row.get(2)?,
                        primary_net: row.get(3)?,
                    },
                ))
            })?
            .collect::<rusqlite::Result<HashMap<_, _>>>()
            .context("Failed to read capital flows")?;

        Ok(flows)
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Delete date-scoped rows older than `keep_days` before today's trading date.
    pub fn clean_old_data(&self, keep_days: u32) -> Result<usize> {
        let cutoff = current_trading_date() - Duration::days(i64::from(keep_days));
        self.prune_before(cutoff)
    }

    /// Delete date-scoped rows with a trading date strictly before `cutoff`.
    pub fn prune_before(&self, cutoff: NaiveDate) -> Result<usize> {
        let conn = self.open()?;
        let cutoff_key = date_key(cutoff);

        let mut deleted = 0;
        for table in DATED_TABLES {
            deleted += conn
                .execute(
                    &format!("DELETE FROM {} WHERE trading_date < ?1", table),
                    params![cutoff_key],
                )
                .with_context(|| format!("Failed to prune {}", table))?;
        }

        info!(cutoff = %cutoff_key, deleted, "Cleaned up old fund-flow data");
        Ok(deleted)
    }

    /// Get row counts per table
    pub fn stats(&self) -> Result<LocalStorageStats> {
        let conn = self.open()?;
        let count = |table: &str| -> Result<u64> {
            let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get(0)
            })?;
            Ok(n as u64)
        };

        let db_size_bytes = std::fs::metadata(&self.config.db_path)
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(LocalStorageStats {
            raw_rows: count("fund_flow_raw")?,
            scored_rows: count("fund_flow_scored")?,
            capital_flow_rows: count("capital_flow_cache")?,
            db_size_bytes,
        })
    }
}

/// Statistics about local storage
#[derive(Debug, Clone)]
pub struct LocalStorageStats {
    pub raw_rows: u64,
    pub scored_rows: u64,
    pub capital_flow_rows: u64,
    pub db_size_bytes: u64,
}

impl std::fmt::Display for LocalStorageStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "LocalStorage: {} raw, {} scored, {} capital flows ({:.2} MB)",
            self.raw_rows,
            self.scored_rows,
            self.capital_flow_rows,
            self.db_size_bytes as f64 / 1_048_576.0
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
