//! Tiered resolution of fund-flow datasets.
//!
//! `resolve(period)` walks memory → SQLite → provider. A provider-sourced
//! dataset is normalized, enriched, written back to both tiers, then
//! returned. The signal kind is always derived from the period.

use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::enrichment::{EnrichmentFetcher, FetchPolicy};
use super::local_storage::LocalStorage;
use super::memory_cache::MemoryCache;
use super::provider::{FundFlowProvider, ProviderError, ProviderRow};
use super::{
    current_trading_date, is_supported_code, normalize_code, Dataset, FlowPeriod, FundFlowRecord,
    RatioBasis,
};
use crate::error::FlowError;

/// Memory → persistent store → provider resolver.
pub struct TieredCache {
    memory: Arc<MemoryCache>,
    storage: LocalStorage,
    provider: Arc<dyn FundFlowProvider>,
    enrichment: EnrichmentFetcher,
}

impl TieredCache {
    pub fn new(
        memory: Arc<MemoryCache>,
        storage: LocalStorage,
        provider: Arc<dyn FundFlowProvider>,
        policy: FetchPolicy,
    ) -> Self {
        let enrichment = EnrichmentFetcher::new(Arc::clone(&provider), storage.clone(), policy);
        Self {
            memory,
            storage,
            provider,
            enrichment,
        }
    }

    pub fn memory(&self) -> &MemoryCache {
        &self.memory
    }

    pub fn storage(&self) -> &LocalStorage {
        &self.storage
    }

    pub fn enrichment(&self) -> &EnrichmentFetcher {
        &self.enrichment
    }

    /// Resolve a period for the current trading date.
    pub async fn resolve(&self, period: FlowPeriod) -> Result<Arc<Dataset>, FlowError> {
        self.resolve_on(period, current_trading_date()).await
    }

    /// Resolve a period for an explicit trading date.
    ///
    /// A memory hit is served regardless of date: one fetch per key per process.
    pub async fn resolve_on(
        &self,
        period: FlowPeriod,
        trading_date: NaiveDate,
    ) -> Result<Arc<Dataset>, FlowError> {
        if let Some(dataset) = self.lookup(period, trading_date) {
            return Ok(dataset);
        }

        let records = match period {
            FlowPeriod::Instant => self.fetch_instant(trading_date).await?,
            _ => self.fetch_ranking(period, trading_date).await?,
        };

        Ok(self.write_back(period, trading_date, records))
    }

    /// Memory tier, then persistent tier (promoting hits into memory).
    fn lookup(&self, period: FlowPeriod, trading_date: NaiveDate) -> Option<Arc<Dataset>> {
        let kind = period.signal_kind();

        if let Some(dataset) = self.memory.get(kind, period) {
            debug!(period = %period, "Memory cache hit");
            return Some(dataset);
        }

        match self.storage.load_dataset(kind, period, trading_date) {
            Ok(Some(dataset)) => {
                info!(period = %period, date = %trading_date, count = dataset.len(), "Loaded dataset from local storage");
                let dataset = Arc::new(dataset);
                self.memory.insert(kind, period, Arc::clone(&dataset));
                Some(dataset)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(period = %period, error = %e, "Local storage read failed, falling back to provider");
                None
            }
        }
    }

    /// Persist and memoize a provider-sourced dataset.
    fn write_back(
        &self,
        period: FlowPeriod,
        trading_date: NaiveDate,
        records: Vec<FundFlowRecord>,
    ) -> Arc<Dataset> {
        let kind = period.signal_kind();
        let dataset = Arc::new(Dataset::new(period, trading_date, records));

        if let Err(e) = self.storage.save_dataset(kind, &dataset) {
            warn!(period = %period, error = %e, "Failed to persist dataset");
        }
        self.memory.insert(kind, period, Arc::clone(&dataset));

        dataset
    }

    async fn fetch_universe(&self, period: FlowPeriod) -> Result<Vec<FundFlowRecord>, FlowError> {
        info!(period = %period, provider = self.provider.name(), "Fetching universe from provider");

        let rows = self
            .provider
            .fetch_universe(period)
            .await
            .map_err(|source| FlowError::ProviderUnavailable { period, source })?;

        let records = normalize_rows(rows);
        if records.is_empty() {
            return Err(FlowError::ProviderUnavailable {
                period,
                source: ProviderError::DataNotAvailable("no supported instruments in universe".into()),
            });
        }

        Ok(records)
    }

    /// Instant universe enriched with primary-capital splits.
    async fn fetch_instant(&self, trading_date: NaiveDate) -> Result<Vec<FundFlowRecord>, FlowError> {
        let mut records = self.fetch_universe(FlowPeriod::Instant).await?;
        let codes: Vec<String> = records.iter().map(|r| r.code.clone()).collect();

        let outcome = self.enrichment.enrich_capital_flows(&codes, trading_date).await;
        if outcome.values.is_empty() {
            return Err(FlowError::DataIntegrity(format!(
                "no primary-capital data for any of {} instruments",
                codes.len()
            )));
        }
        if !outcome.failed.is_empty() {
            warn!(
                failed = outcome.failed.len(),
                succeeded = outcome.succeeded(),
                "Partial enrichment failure, affected ratios left empty"
            );
        }

        for record in &mut records {
            if let Some(split) = outcome.values.get(&record.code) {
                record.super_large_net = Some(split.super_large_net);
                record.large_net = Some(split.large_net);
                record.primary_net = Some(split.primary_net);
            }
            record.derive_position_ratio();
        }

        Ok(records)
    }

    /// N-day universe with ratios estimated against the instant dataset.
    async fn fetch_ranking(
        &self,
        period: FlowPeriod,
        trading_date: NaiveDate,
    ) -> Result<Vec<FundFlowRecord>, FlowError> {
        let mut records = self.fetch_universe(period).await?;

        match self.instant_reference(trading_date).await {
            Ok(instant) => {
                self.fill_period_turnover(period, &mut records, &instant).await;
                apply_instant_estimate(&mut records, &instant);
            }
            Err(e) => warn!(period = %period, error = %e, "Instant dataset unavailable, N-day ratios left empty"),
        }

        Ok(records)
    }

    /// Fill the continuous turnover rate the ranking universe left out.
    ///
    /// Only records the instant estimate can use are fetched: a net inflow,
    /// and an instant reference carrying amount and turnover.
    async fn fill_period_turnover(
        &self,
        period: FlowPeriod,
        records: &mut [FundFlowRecord],
        instant: &Dataset,
    ) {
        let Some(days) = period.days() else {
            return;
        };

        let usable: HashSet<&str> = instant
            .records
            .iter()
            .filter(|r| r.amount.is_some() && r.turnover_rate.is_some())
            .map(|r| r.code.as_str())
            .collect();

        let codes: Vec<String> = records
            .iter()
            .filter(|r| r.turnover_rate.is_none() && r.net_inflow.is_some())
            .filter(|r| usable.contains(r.code.as_str()))
            .map(|r| r.code.clone())
            .collect();
        if codes.is_empty() {
            return;
        }

        let outcome = self.enrichment.fetch_period_turnovers(&codes, days as usize).await;
        if outcome.is_total_failure() {
            warn!(period = %period, requested = codes.len(), "No continuous turnover available, N-day ratios left empty");
            return;
        }

        for record in records.iter_mut() {
            if let Some(turnover) = outcome.values.get(&record.code) {
                record.turnover_rate = Some(*turnover);
            }
        }

        debug!(period = %period, filled = outcome.succeeded(), failed = outcome.failed.len(), "Filled continuous turnover");
    }

    async fn instant_reference(&self, trading_date: NaiveDate) -> Result<Arc<Dataset>, FlowError> {
        if let Some(dataset) = self.lookup(FlowPeriod::Instant, trading_date) {
            return Ok(dataset);
        }
        let records = self.fetch_instant(trading_date).await?;
        Ok(self.write_back(FlowPeriod::Instant, trading_date, records))
    }
}

/// Normalize provider rows: pad codes, drop unsupported boards and duplicates.
pub fn normalize_rows(rows: Vec<ProviderRow>) -> Vec<FundFlowRecord> {
    let total = rows.len();
    let mut seen = HashSet::with_capacity(total);
    let mut records = Vec::with_capacity(total);

    for row in rows {
        let Some(code) = normalize_code(&row.code) else {
            continue;
        };
        if !is_supported_code(&code) || !seen.insert(code.clone()) {
            continue;
        }

        let mut record = FundFlowRecord::new(code, row.name.trim());
        record.price = row.price.amount();
        record.change_pct = row.change_pct.percent();
        record.turnover_rate = row.turnover_rate.percent();
        record.amount = row.amount.amount();
        record.net_inflow = row.net_inflow.amount();
        record.derive_float_market_cap();
        records.push(record);
    }

    debug!(total, kept = records.len(), "Normalized provider rows");
    records
}

/// Estimate N-day position ratios from the same day's instant dataset.
///
/// `ratio = net_N × instant_turnover / (instant_amount × turnover_N) × 100`.
/// Float market cap is copied from the instant record.
pub fn apply_instant_estimate(records: &mut [FundFlowRecord], instant: &Dataset) {
    let reference: HashMap<&str, &FundFlowRecord> =
        instant.records.iter().map(|r| (r.code.as_str(), r)).collect();

    let mut estimated = 0usize;
    for record in records.iter_mut() {
        let base = reference.get(record.code.as_str());

        record.float_market_cap = base.and_then(|b| b.float_market_cap);
        record.position_ratio = base.and_then(|b| {
            let denominator = b.amount? * record.turnover_rate?;
            if denominator == 0.0 {
                return None;
            }
            Some(record.net_inflow? * b.turnover_rate? / denominator * 100.0)
        });
        record.ratio_basis = if record.position_ratio.is_some() {
            estimated += 1;
            RatioBasis::EstimatedFromInstant
        } else {
            RatioBasis::Unavailable
        };
    }

    debug!(estimated, total = records.len(), "Estimated N-day position ratios");
}
