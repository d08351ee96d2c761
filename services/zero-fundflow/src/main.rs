//! Zero FundFlow - capital-flow leaderboard for the Zero ecosystem.
//!
//! Runs one ranking pass per configured period and exits.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use zero_common::config::Config;
use zero_common::logging::init_from_config;
use zero_fundflow::data::{EastmoneyProvider, FlowPeriod};
use zero_fundflow::screener::{LeaderboardReport, ReportFormat};
use zero_fundflow::{FundFlowService, RankingOutcome};

const REPORT_PREFIX: &str = "fundflow";

#[tokio::main]
async fn main() -> Result<()> {
    let startup_start = std::time::Instant::now();

    let config = Config::load_with_env()?;
    init_from_config(&config.observability);

    tracing::info!("Zero FundFlow v{}", env!("CARGO_PKG_VERSION"));

    let fundflow = &config.fundflow;
    let provider = Arc::new(EastmoneyProvider::new(Duration::from_secs(fundflow.call_timeout_secs)));
    let service = FundFlowService::from_config(fundflow, provider)?;

    match service.cache().storage().clean_old_data(fundflow.keep_days) {
        Ok(deleted) => tracing::debug!(deleted, "Retention cleanup done"),
        Err(e) => tracing::warn!(error = %e, "Retention cleanup failed"),
    }
    if let Some(dir) = &fundflow.report_dir {
        match LeaderboardReport::clean_old_reports(dir, REPORT_PREFIX, fundflow.keep_days) {
            Ok(deleted) => tracing::debug!(deleted, "Report cleanup done"),
            Err(e) => tracing::warn!(error = %e, "Report cleanup failed"),
        }
    }

    let periods: Vec<FlowPeriod> = fundflow
        .periods
        .iter()
        .filter_map(|p| {
            let period = FlowPeriod::parse(p);
            if period.is_none() {
                tracing::warn!(period = %p, "Ignoring unknown period");
            }
            period
        })
        .collect();

    let mut unavailable = 0;
    for period in periods {
        match service.run_pass(period, None).await {
            RankingOutcome::Ranked { board, history } => {
                let report = LeaderboardReport::new(&board);
                match &fundflow.report_dir {
                    Some(dir) => {
                        for format in [ReportFormat::Markdown, ReportFormat::Json] {
                            match report.save_to_dir(dir, REPORT_PREFIX, format) {
                                Ok(path) => tracing::info!(path = %path.display(), "Saved report"),
                                Err(e) => tracing::warn!(error = %e, "Failed to save report"),
                            }
                        }
                    }
                    None => println!("{}", report.to_markdown()),
                }
                if let Some(history) = history {
                    tracing::info!(period = %period, "History: {}", history);
                }
            }
            RankingOutcome::DataUnavailable { period, reason } => {
                unavailable += 1;
                tracing::warn!(period = %period, error = %reason, "No leaderboard for period");
            }
        }
    }

    tracing::info!("{}", service.cache().memory().stats());
    if let Ok(stats) = service.cache().storage().stats() {
        tracing::info!("{}", stats);
    }
    if let Some(Ok(stats)) = service.recorder().map(|r| r.store().stats()) {
        tracing::info!("{}", stats);
    }

    tracing::info!(
        duration_ms = startup_start.elapsed().as_millis() as u64,
        unavailable,
        "Run complete"
    );

    Ok(())
}
