//! Concurrent per-instrument enrichment.
//!
//! A fixed pool of workers drains a shared code queue. Each worker issues
//! one provider call per code, bounded by a timeout and followed by a fixed
//! delay. A failed code is recorded and skipped; it never stops the batch.
//!
//! ```text
//!   queue ──► worker 1 ─┐
//!         ──► worker 2 ─┼─► results (code → value | error) + progress
//!         ──► worker N ─┘
//! ```
//!
//! Locks guard only the queue pop and the result insert; no lock is held
//! across a provider call.

use chrono::NaiveDate;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::local_storage::LocalStorage;
use super::normalize::round_to;
use super::provider::{CapitalSplit, DailyBar, FundFlowProvider, ProviderError};
use zero_common::config::FundFlowConfig;

// ============================================================================
// Fetch Policy
// ============================================================================

/// Per-call policy for a batch of provider requests.
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    /// Worker count
    pub workers: usize,
    /// Delay after every call
    pub per_call_delay: Duration,
    /// Timeout for one call
    pub call_timeout: Duration,
    /// Attempts per code (recoverable errors only)
    pub max_attempts: u32,
    /// Interval between progress log lines
    pub progress_interval: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            workers: 10,
            per_call_delay: Duration::from_millis(200),
            call_timeout: Duration::from_secs(10),
            max_attempts: 1,
            progress_interval: Duration::from_secs(5),
        }
    }
}

impl FetchPolicy {
    pub fn from_config(config: &FundFlowConfig) -> Self {
        Self {
            workers: config.enrichment_workers.max(1),
            per_call_delay: Duration::from_millis(config.per_call_delay_ms),
            call_timeout: Duration::from_secs(config.call_timeout_secs),
            max_attempts: config.max_attempts.max(1),
            progress_interval: Duration::from_secs(config.progress_interval_secs),
        }
    }
}

// ============================================================================
// Batch Outcome
// ============================================================================

/// Result of one batch: successful values by code, plus per-code failures.
#[derive(Debug, Clone)]
pub struct BatchOutcome<T> {
    pub values: HashMap<String, T>,
    pub failed: Vec<(String, ProviderError)>,
}

impl<T> Default for BatchOutcome<T> {
    fn default() -> Self {
        Self {
            values: HashMap::new(),
            failed: Vec::new(),
        }
    }
}

impl<T> BatchOutcome<T> {
    pub fn succeeded(&self) -> usize {
        self.values.len()
    }

    /// True if codes were requested and none succeeded.
    pub fn is_total_failure(&self) -> bool {
        self.values.is_empty() && !self.failed.is_empty()
    }
}

/// Shared progress accounting.
struct Progress {
    total: usize,
    completed: usize,
    succeeded: usize,
    started: Instant,
    last_report: Instant,
}

impl Progress {
    fn new(total: usize) -> Self {
        let now = Instant::now();
        Self {
            total,
            completed: 0,
            succeeded: 0,
            started: now,
            last_report: now,
        }
    }

    fn rate(&self) -> f64 {
        let secs = self.started.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.completed as f64 / secs
        } else {
            0.0
        }
    }
}

/// Run `call` once per code on a bounded worker pool.
pub async fn run_batch<T, F, Fut>(
    label: &'static str,
    codes: Vec<String>,
    policy: &FetchPolicy,
    call: F,
) -> BatchOutcome<T>
where
    T: Send + 'static,
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ProviderError>> + Send + 'static,
{
    if codes.is_empty() {
        return BatchOutcome::default();
    }

    let total = codes.len();
    let worker_count = policy.workers.clamp(1, total);
    let queue = Arc::new(Mutex::new(VecDeque::from(codes)));
    let results = Arc::new(Mutex::new(BatchOutcome::default()));
    let progress = Arc::new(Mutex::new(Progress::new(total)));
    let call = Arc::new(call);

    info!(label, total, workers = worker_count, "Starting enrichment batch");

    let handles: Vec<_> = (0..worker_count)
        .map(|_| {
            let queue = Arc::clone(&queue);
            let results = Arc::clone(&results);
            let progress = Arc::clone(&progress);
            let call = Arc::clone(&call);
            let policy = policy.clone();

            tokio::spawn(async move {
                loop {
                    let Some(code) = queue.lock().await.pop_front() else {
                        break;
                    };

                    let outcome = call_with_policy(&policy, || (*call)(code.clone())).await;
                    let ok = outcome.is_ok();

                    {
                        let mut results = results.lock().await;
                        match outcome {
                            Ok(value) => {
                                results.values.insert(code, value);
                            }
                            Err(e) => {
                                debug!(label, code = %code, error = %e, "Enrichment call failed");
                                results.failed.push((code, e));
                            }
                        }
                    }

                    {
                        let mut p = progress.lock().await;
                        p.completed += 1;
                        if ok {
                            p.succeeded += 1;
                        }
                        if p.last_report.elapsed() >= policy.progress_interval {
                            p.last_report = Instant::now();
                            let rate = p.rate();
                            let remaining = p.total - p.completed;
                            info!(
                                label,
                                completed = p.completed,
                                total = p.total,
                                succeeded = p.succeeded,
                                rate = %format!("{:.1}/s", rate),
                                eta_secs = if rate > 0.0 { (remaining as f64 / rate) as u64 } else { 0 },
                                "Enrichment progress"
                            );
                        }
                    }

                    tokio::time::sleep(policy.per_call_delay).await;
                }
            })
        })
        .collect();

    for joined in futures::future::join_all(handles).await {
        if let Err(e) = joined {
            warn!(label, error = %e, "Enrichment worker aborted");
        }
    }

    let outcome = std::mem::take(&mut *results.lock().await);
    let elapsed = progress.lock().await.started.elapsed();

    info!(
        label,
        total,
        succeeded = outcome.succeeded(),
        failed = outcome.failed.len(),
        elapsed_ms = elapsed.as_millis() as u64,
        "Enrichment batch complete"
    );

    outcome
}

/// One code under the policy: timeout per attempt, retry only recoverable errors.
async fn call_with_policy<T, Fut>(
    policy: &FetchPolicy,
    mut call: impl FnMut() -> Fut,
) -> Result<T, ProviderError>
where
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_error = ProviderError::Unavailable("no attempt made".into());

    for attempt in 1..=attempts {
        let result = match tokio::time::timeout(policy.call_timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(policy.call_timeout.as_millis() as u64)),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) => {
                let retry = e.is_recoverable() && attempt < attempts;
                last_error = e;
                if !retry {
                    break;
                }
                tokio::time::sleep(policy.per_call_delay).await;
            }
        }
    }

    Err(last_error)
}

// ============================================================================
// Volume Ratio
// ============================================================================

/// Latest volume over the mean of up to `lookback` preceding sessions.
///
/// `volumes` is most recent first. Returns `None` without a latest session
/// or any preceding one; a zero mean yields `0.0`.
pub fn volume_ratio(volumes: &[f64], lookback: usize) -> Option<f64> {
    let (latest, rest) = volumes.split_first()?;
    let prior: Vec<f64> = rest.iter().take(lookback).copied().collect();
    if prior.is_empty() {
        return None;
    }

    let mean = prior.iter().sum::<f64>() / prior.len() as f64;
    if mean == 0.0 {
        return Some(0.0);
    }

    Some(round_to(latest / mean, 2))
}

/// Continuous turnover rate over the latest `sessions` bars.
///
/// `bars` is most recent first. Fewer bars than `sessions` (recent listings)
/// are summed as they are; a bar without turnover makes the result `None`.
pub fn period_turnover(bars: &[DailyBar], sessions: usize) -> Option<f64> {
    let window = &bars[..bars.len().min(sessions)];
    if window.is_empty() {
        return None;
    }

    window
        .iter()
        .map(|b| b.turnover_rate)
        .sum::<Option<f64>>()
        .map(|total| round_to(total, 2))
}

// ============================================================================
// Enrichment Fetcher
// ============================================================================

/// Fetches per-instrument detail for a set of codes.
pub struct EnrichmentFetcher {
    provider: Arc<dyn FundFlowProvider>,
    storage: LocalStorage,
    policy: FetchPolicy,
}

impl EnrichmentFetcher {
    pub fn new(provider: Arc<dyn FundFlowProvider>, storage: LocalStorage, policy: FetchPolicy) -> Self {
        Self {
            provider,
            storage,
            policy,
        }
    }

    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    /// Primary-capital split for each code.
    ///
    /// Codes already cached for `trading_date` are not refetched. The merged
    /// result replaces the enrichment table when anything new was fetched.
    pub async fn enrich_capital_flows(
        &self,
        codes: &[String],
        trading_date: NaiveDate,
    ) -> BatchOutcome<CapitalSplit> {
        let cached = self.storage.load_capital_flows(trading_date).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read capital flow cache");
            HashMap::new()
        });

        let missing: Vec<String> = codes
            .iter()
            .filter(|c| !cached.contains_key(*c))
            .cloned()
            .collect();

        if !cached.is_empty() {
            info!(
                cached = codes.len() - missing.len(),
                to_fetch = missing.len(),
                "Reusing cached capital flows"
            );
        }

        let provider = Arc::clone(&self.provider);
        let fetched = run_batch("capital_flow", missing, &self.policy, move |code| {
            let provider = Arc::clone(&provider);
            async move { provider.fetch_capital_split(&code).await }
        })
        .await;

        if !fetched.values.is_empty() {
            let mut merged = cached.clone();
            merged.extend(fetched.values.iter().map(|(k, v)| (k.clone(), *v)));
            if let Err(e) = self.storage.save_capital_flows(trading_date, &merged) {
                warn!(error = %e, "Failed to persist capital flows");
            }
        }

        let mut values: HashMap<String, CapitalSplit> = codes
            .iter()
            .filter_map(|c| cached.get(c).map(|v| (c.clone(), *v)))
            .collect();
        values.extend(fetched.values);

        BatchOutcome {
            values,
            failed: fetched.failed,
        }
    }

    /// Volume ratio for each code.
    pub async fn fetch_volume_ratios(&self, codes: &[String], lookback: usize) -> BatchOutcome<f64> {
        let provider = Arc::clone(&self.provider);
        run_batch("volume_ratio", codes.to_vec(), &self.policy, move |code| {
            let provider = Arc::clone(&provider);
            async move {
                let bars = provider.fetch_daily_bars(&code, lookback + 1).await?;
                let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();
                volume_ratio(&volumes, lookback)
                    .ok_or_else(|| ProviderError::DataNotAvailable(format!("no volume history for {}", code)))
            }
        })
        .await
    }

    /// Continuous turnover rate over the last `sessions` sessions for each code.
    pub async fn fetch_period_turnovers(&self, codes: &[String], sessions: usize) -> BatchOutcome<f64> {
        let provider = Arc::clone(&self.provider);
        run_batch("period_turnover", codes.to_vec(), &self.policy, move |code| {
            let provider = Arc::clone(&provider);
            async move {
                let bars = provider.fetch_daily_bars(&code, sessions).await?;
                period_turnover(&bars, sessions)
                    .ok_or_else(|| ProviderError::DataNotAvailable(format!("no turnover history for {}", code)))
            }
        })
        .await
    }
}
