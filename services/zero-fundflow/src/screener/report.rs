//! Leaderboard report generation.
//!
//! Renders a ranked board as Markdown (human-readable) or JSON
//! (downstream consumers), and saves it under a report directory.
//! Saved reports older than the retention window are pruned by
//! [`LeaderboardReport::clean_old_reports`].

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

use super::funnel::{LeaderboardRow, RankedBoard, StageResult};
use crate::data::normalize::{format_amount, format_percent};
use crate::data::{FlowPeriod, RatioBasis};

// ============================================================================
// Report Format
// ============================================================================

/// Supported report formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportFormat {
    /// Markdown format (human-readable)
    Markdown,
    /// JSON format (machine-readable)
    Json,
}

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Markdown => "md",
            Self::Json => "json",
        }
    }
}

impl std::fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Markdown => write!(f, "markdown"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "markdown" | "md" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown report format: {}", s)),
        }
    }
}

// ============================================================================
// Leaderboard Report
// ============================================================================

/// JSON document for one leaderboard.
#[derive(Debug, Serialize)]
struct ReportDocument<'a> {
    period: FlowPeriod,
    trading_date: NaiveDate,
    universe: usize,
    config_summary: &'a str,
    stages: &'a [StageResult],
    rows: Vec<LeaderboardRow>,
}

/// Report generator for a ranked board.
pub struct LeaderboardReport<'a> {
    board: &'a RankedBoard,
}

impl<'a> LeaderboardReport<'a> {
    pub fn new(board: &'a RankedBoard) -> Self {
        Self { board }
    }

    /// Generate report in the specified format.
    pub fn generate(&self, format: ReportFormat) -> String {
        match format {
            ReportFormat::Markdown => self.to_markdown(),
            ReportFormat::Json => self.to_json(),
        }
    }

    /// `<prefix>_<period>_<yymmdd>.<ext>`
    pub fn file_name(&self, prefix: &str, format: ReportFormat) -> String {
        format!(
            "{}_{}_{}.{}",
            prefix,
            self.board.period.as_str(),
            self.board.trading_date.format("%y%m%d"),
            format.extension()
        )
    }

    /// Save report into `dir`, creating it if needed.
    pub fn save_to_dir(&self, dir: &Path, prefix: &str, format: ReportFormat) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create report directory: {}", dir.display()))?;

        let file_path = dir.join(self.file_name(prefix, format));
        std::fs::write(&file_path, self.generate(format))
            .with_context(|| format!("Failed to write report file: {}", file_path.display()))?;

        Ok(file_path)
    }

    /// Delete `<prefix>_*` report files in `dir` last modified more than
    /// `keep_days` days ago. A missing directory is not an error.
    pub fn clean_old_reports(dir: &Path, prefix: &str, keep_days: u32) -> Result<usize> {
        if !dir.is_dir() {
            return Ok(0);
        }

        let cutoff = SystemTime::now()
            .checked_sub(Duration::from_secs(u64::from(keep_days) * 86_400))
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let marker = format!("{}_", prefix);

        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read report directory: {}", dir.display()))?;

        let mut deleted = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_report = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&marker));
            if !is_report || !path.is_file() {
                continue;
            }

            let modified = match entry.metadata().and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Cannot read report mtime");
                    continue;
                }
            };
            if modified >= cutoff {
                continue;
            }

            match std::fs::remove_file(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), "Removed expired report");
                    deleted += 1;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove expired report"),
            }
        }

        Ok(deleted)
    }

    /// Generate markdown report.
    pub fn to_markdown(&self) -> String {
        let board = self.board;
        let mut md = String::new();

        md.push_str(&format!(
            "# 主力资金排行 ({})\n\n**交易日**: {}\n**耗时**: {:.1}秒\n**筛选条件**: {}\n\n",
            board.period.display_name(),
            board.trading_date.format("%Y-%m-%d"),
            board.duration_secs,
            board.config_summary
        ));

        md.push_str("### 筛选漏斗\n\n");
        md.push_str("| 阶段 | 通过 | 淘汰 | 淘汰率 |\n");
        md.push_str("|------|------|------|--------|\n");
        for stage in &board.stages {
            md.push_str(&format!(
                "| {} | {} | {} | {:.1}% |\n",
                stage.stage, stage.passed, stage.eliminated, stage.elimination_rate
            ));
        }
        md.push('\n');

        if board.is_empty() {
            md.push_str("*无符合条件的股票*\n\n");
        } else {
            md.push_str("## 排行榜\n\n");
            md.push_str("| 排名 | 代码 | 名称 | 综合得分 | 建仓比 | 涨跌幅 | 换手率 | 成交额 | 流通市值 | 量比 | 成交状态 |\n");
            md.push_str("|------|------|------|----------|--------|--------|--------|--------|----------|------|----------|\n");

            for row in board.rows() {
                md.push_str(&format!(
                    "| {} | {} | {} | {:.1} | {} | {} | {} | {} | {} | {} | {} |\n",
                    row.rank,
                    row.code,
                    row.name,
                    row.composite,
                    ratio_cell(row.position_ratio, row.ratio_basis),
                    format_percent(row.change_pct),
                    format_percent(row.turnover_rate),
                    format_amount(row.amount),
                    format_amount(row.float_market_cap),
                    row.volume_ratio.map_or_else(|| "-".to_string(), |v| format!("{:.2}", v)),
                    row.volume_level,
                ));
            }
            md.push('\n');
        }

        md.push_str("---\n\n");
        md.push_str(&format!(
            "*报告生成于 {}*\n",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        ));

        md
    }

    /// Generate JSON report.
    pub fn to_json(&self) -> String {
        let doc = ReportDocument {
            period: self.board.period,
            trading_date: self.board.trading_date,
            universe: self.board.full.len(),
            config_summary: &self.board.config_summary,
            stages: &self.board.stages,
            rows: self.board.rows(),
        };
        serde_json::to_string_pretty(&doc).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Estimated ratios are marked so they are never mistaken for primary-capital ones.
fn ratio_cell(ratio: Option<f64>, basis: RatioBasis) -> String {
    match (ratio, basis) {
        (Some(_), RatioBasis::EstimatedFromInstant) => format!("{}*", format_percent(ratio)),
        _ => format_percent(ratio),
    }
}

// ============================================================================
// Tests
// ============================================================================
