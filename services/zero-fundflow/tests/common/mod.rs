//! Shared mock provider for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use zero_fundflow::data::{
    CapitalSplit, DailyBar, FetchPolicy, FlowPeriod, FundFlowProvider, LocalStorage, LocalStorageConfig,
    MemoryCache, ProviderError, ProviderRow, RawValue, TieredCache,
};

// ============================================================================
// Mock Provider
// ============================================================================

/// Provider serving a fixed universe with per-code behaviour.
pub struct MockFlowProvider {
    rows: Mutex<Vec<ProviderRow>>,
    /// Rows served for N-day periods instead of `rows`
    ranking_rows: Option<Vec<ProviderRow>>,
    splits: HashMap<String, CapitalSplit>,
    /// Codes whose capital split never returns in time
    slow: HashSet<String>,
    volume_ratio: f64,
    /// Turnover rate reported on every daily bar
    session_turnover: Option<f64>,
    fail_universe: bool,
    pub universe_calls: AtomicU32,
    pub split_calls: AtomicU32,
    pub volume_calls: AtomicU32,
}

impl MockFlowProvider {
    pub fn new(rows: Vec<ProviderRow>) -> Self {
        let splits = rows
            .iter()
            .map(|r| (pad(&r.code), CapitalSplit::new(3.0e7, 2.0e7)))
            .collect();
        Self {
            rows: Mutex::new(rows),
            ranking_rows: None,
            splits,
            slow: HashSet::new(),
            volume_ratio: 2.5,
            session_turnover: Some(1.0),
            fail_universe: false,
            universe_calls: AtomicU32::new(0),
            split_calls: AtomicU32::new(0),
            volume_calls: AtomicU32::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_universe: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn with_split(mut self, code: &str, split: CapitalSplit) -> Self {
        self.splits.insert(code.to_string(), split);
        self
    }

    pub fn without_splits(mut self) -> Self {
        self.splits.clear();
        self
    }

    pub fn with_slow(mut self, code: &str) -> Self {
        self.slow.insert(code.to_string());
        self
    }

    pub fn with_ranking_rows(mut self, rows: Vec<ProviderRow>) -> Self {
        self.ranking_rows = Some(rows);
        self
    }

    pub fn with_session_turnover(mut self, turnover: Option<f64>) -> Self {
        self.session_turnover = turnover;
        self
    }

    pub fn with_volume_ratio(mut self, ratio: f64) -> Self {
        self.volume_ratio = ratio;
        self
    }

    pub fn set_rows(&self, rows: Vec<ProviderRow>) {
        if let Ok(mut current) = self.rows.lock() {
            *current = rows;
        }
    }

    pub fn universe_calls(&self) -> u32 {
        self.universe_calls.load(Ordering::Relaxed)
    }

    pub fn split_calls(&self) -> u32 {
        self.split_calls.load(Ordering::Relaxed)
    }
}

fn pad(code: &str) -> String {
    format!("{:0>6}", code)
}

#[async_trait]
impl FundFlowProvider for MockFlowProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn fetch_universe(&self, period: FlowPeriod) -> Result<Vec<ProviderRow>, ProviderError> {
        self.universe_calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_universe {
            return Err(ProviderError::Network("mock network failure".into()));
        }
        match (&self.ranking_rows, period) {
            (Some(rows), p) if p != FlowPeriod::Instant => Ok(rows.clone()),
            _ => Ok(self.rows.lock().map(|r| r.clone()).unwrap_or_default()),
        }
    }

    async fn fetch_capital_split(&self, code: &str) -> Result<CapitalSplit, ProviderError> {
        self.split_calls.fetch_add(1, Ordering::Relaxed);
        if self.slow.contains(code) {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        self.splits
            .get(code)
            .copied()
            .ok_or_else(|| ProviderError::DataNotAvailable(format!("no split for {}", code)))
    }

    async fn fetch_daily_bars(&self, _code: &str, sessions: usize) -> Result<Vec<DailyBar>, ProviderError> {
        self.volume_calls.fetch_add(1, Ordering::Relaxed);
        let mut bars = vec![DailyBar::new(100.0 * self.volume_ratio, self.session_turnover)];
        bars.extend(std::iter::repeat(DailyBar::new(100.0, self.session_turnover)).take(sessions.saturating_sub(1)));
        Ok(bars)
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// An instant-universe row with raw provider encodings.
pub fn row(code: &str, change: f64, turnover: f64, amount: f64) -> ProviderRow {
    ProviderRow {
        code: code.to_string(),
        name: format!("股票{}", code),
        price: RawValue::Number(10.0),
        change_pct: RawValue::Number(change),
        turnover_rate: RawValue::Number(turnover),
        amount: RawValue::Number(amount),
        net_inflow: RawValue::Text("1.5亿".into()),
    }
}

/// An N-day ranking row: stage net inflow, no turnover or amount.
pub fn ranking_row(code: &str, change: f64, net_inflow: &str) -> ProviderRow {
    ProviderRow {
        code: code.to_string(),
        name: format!("股票{}", code),
        price: RawValue::Number(10.0),
        change_pct: RawValue::Number(change),
        net_inflow: RawValue::Text(net_inflow.into()),
        ..ProviderRow::default()
    }
}

pub fn fast_policy() -> FetchPolicy {
    FetchPolicy {
        workers: 4,
        per_call_delay: Duration::from_millis(1),
        call_timeout: Duration::from_millis(200),
        max_attempts: 1,
        progress_interval: Duration::from_secs(5),
    }
}

pub fn storage_in(dir: &TempDir) -> LocalStorage {
    LocalStorage::new(LocalStorageConfig::with_path(dir.path().join("fundflow.db"))).unwrap()
}

/// A cache with a fresh memory tier over `storage`.
pub fn cache_over(storage: LocalStorage, provider: Arc<MockFlowProvider>) -> TieredCache {
    TieredCache::new(Arc::new(MemoryCache::new()), storage, provider, fast_policy())
}
