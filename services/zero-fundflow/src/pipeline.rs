//! The ranking pass.
//!
//! ```text
//! run_pass(period)
//!   ├─► TieredCache::resolve        memory → SQLite → provider (+ enrichment)
//!   ├─► SelectionFunnel::rank       phase 1 → candidates → phase 2
//!   └─► HistoryRecorder::record_pass   (instant period only)
//! ```
//!
//! A pass either yields a best-effort leaderboard or an explicit
//! data-unavailable outcome.

use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info};

use crate::data::{
    FetchPolicy, FlowPeriod, FundFlowProvider, LocalStorage, LocalStorageConfig, MemoryCache,
    TieredCache,
};
use crate::error::FlowError;
use crate::history::{HistoryRecorder, HistoryStore, HistoryStoreConfig, RecordReport};
use crate::screener::{FunnelConfig, RankedBoard, SelectionFunnel};
use zero_common::config::FundFlowConfig;

/// Result of one ranking pass.
#[derive(Debug)]
pub enum RankingOutcome {
    /// Best-effort leaderboard; optional columns may be absent
    Ranked {
        board: RankedBoard,
        /// Present when the pass was recorded
        history: Option<RecordReport>,
    },
    /// No dataset could be produced
    DataUnavailable { period: FlowPeriod, reason: FlowError },
}

impl RankingOutcome {
    pub fn board(&self) -> Option<&RankedBoard> {
        match self {
            Self::Ranked { board, .. } => Some(board),
            Self::DataUnavailable { .. } => None,
        }
    }

    pub fn is_ranked(&self) -> bool {
        matches!(self, Self::Ranked { .. })
    }
}

/// Wires the cache, funnel, and history recorder together.
pub struct FundFlowService {
    cache: TieredCache,
    funnel_config: FunnelConfig,
    recorder: Option<HistoryRecorder>,
}

impl FundFlowService {
    pub fn new(cache: TieredCache, funnel_config: FunnelConfig, recorder: Option<HistoryRecorder>) -> Self {
        Self {
            cache,
            funnel_config,
            recorder,
        }
    }

    /// Build every component from application config.
    pub fn from_config(config: &FundFlowConfig, provider: Arc<dyn FundFlowProvider>) -> Result<Self> {
        let storage = LocalStorage::new(LocalStorageConfig::with_path(&config.db_path))?;
        let history = HistoryStore::new(HistoryStoreConfig::with_path(&config.history_db_path))?;

        let cache = TieredCache::new(
            Arc::new(MemoryCache::new()),
            storage,
            provider,
            FetchPolicy::from_config(config),
        );

        Ok(Self::new(
            cache,
            FunnelConfig::from_config(config),
            Some(HistoryRecorder::new(history)),
        ))
    }

    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    pub fn recorder(&self) -> Option<&HistoryRecorder> {
        self.recorder.as_ref()
    }

    /// Run one pass for `period`. `top_n` overrides the configured size.
    pub async fn run_pass(&self, period: FlowPeriod, top_n: Option<usize>) -> RankingOutcome {
        info!(period = %period, "Starting ranking pass");

        let dataset = match self.cache.resolve(period).await {
            Ok(dataset) => dataset,
            Err(reason) => {
                error!(period = %period, kind = reason.kind(), error = %reason, "Ranking pass has no data");
                return RankingOutcome::DataUnavailable { period, reason };
            }
        };

        let mut funnel_config = self.funnel_config.clone();
        if let Some(n) = top_n {
            funnel_config = funnel_config.with_top_n(n);
        }
        let funnel = SelectionFunnel::new(funnel_config);
        let board = funnel.rank(&dataset, Some(self.cache.enrichment())).await;

        let history = match (&self.recorder, period) {
            (Some(recorder), FlowPeriod::Instant) => Some(recorder.record_pass(&board)),
            _ => None,
        };

        info!(
            period = %period,
            date = %board.trading_date,
            leaderboard = board.leaderboard.len(),
            "Ranking pass complete"
        );

        RankingOutcome::Ranked { board, history }
    }
}
