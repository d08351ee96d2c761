//! Selection funnel configuration.

use serde::{Deserialize, Serialize};
use zero_common::config::FundFlowConfig;

/// Configuration for the two-phase selection funnel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunnelConfig {
    /// Leaderboard size
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// Phase-1 candidates promoted to enrichment
    #[serde(default = "default_candidate_pool")]
    pub candidate_pool: usize,

    /// Float market cap at or above this is not eligible for the leaderboard
    #[serde(default = "default_float_cap_ceiling")]
    pub float_cap_ceiling: f64,

    /// Fetch volume ratios for candidates
    #[serde(default = "default_volume_ratio_enabled")]
    pub volume_ratio_enabled: bool,

    /// Sessions averaged for the volume ratio
    #[serde(default = "default_volume_lookback_days")]
    pub volume_lookback_days: usize,
}

impl Default for FunnelConfig {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
            candidate_pool: default_candidate_pool(),
            float_cap_ceiling: default_float_cap_ceiling(),
            volume_ratio_enabled: default_volume_ratio_enabled(),
            volume_lookback_days: default_volume_lookback_days(),
        }
    }
}

fn default_top_n() -> usize {
    20
}

fn default_candidate_pool() -> usize {
    500
}

fn default_float_cap_ceiling() -> f64 {
    1.0e11 // 1000亿
}

fn default_volume_ratio_enabled() -> bool {
    true
}

fn default_volume_lookback_days() -> usize {
    7
}

impl FunnelConfig {
    pub fn from_config(config: &FundFlowConfig) -> Self {
        Self {
            top_n: config.top_n,
            candidate_pool: config.candidate_pool,
            float_cap_ceiling: config.float_cap_ceiling,
            volume_ratio_enabled: config.volume_ratio_enabled,
            volume_lookback_days: config.volume_lookback_days.max(1),
        }
    }

    /// Same config with a different leaderboard size.
    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }

    /// Short human-readable summary for reports.
    pub fn summary(&self) -> String {
        format!(
            "TOP{}, 候选池{}, 流通市值<{:.0}亿, 量比{}",
            self.top_n,
            self.candidate_pool,
            self.float_cap_ceiling / 1.0e8,
            if self.volume_ratio_enabled { "开启" } else { "关闭" }
        )
    }
}
