//! Provider abstraction for fund-flow data.
//!
//! Defines the `FundFlowProvider` trait implemented by the eastmoney
//! adapter and by test doubles.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::normalize::RawValue;
use super::FlowPeriod;

// ============================================================================
// Provider Error
// ============================================================================

/// Errors specific to data providers.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Network error (connection failed, HTTP status)
    #[error("Network error: {0}")]
    Network(String),
    /// Call exceeded its time budget
    #[error("Timed out after {0} ms")]
    Timeout(u64),
    /// Rate limit exceeded
    #[error("Rate limited")]
    RateLimited,
    /// Data not available for the requested code/period
    #[error("Data not available: {0}")]
    DataNotAvailable(String),
    /// Response could not be decoded
    #[error("Malformed response: {0}")]
    Malformed(String),
    /// Provider is temporarily unavailable
    #[error("Provider unavailable: {0}")]
    Unavailable(String),
}

impl ProviderError {
    /// Check if the error is recoverable (worth retrying)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout(_) | Self::RateLimited | Self::Unavailable(_)
        )
    }
}

// ============================================================================
// Provider Payloads
// ============================================================================

/// One universe row with provider-native values.
///
/// Only known columns are carried; anything else the provider returns is
/// dropped at deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderRow {
    /// Raw code as delivered (may lack leading zeros)
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub price: RawValue,
    #[serde(default)]
    pub change_pct: RawValue,
    #[serde(default)]
    pub turnover_rate: RawValue,
    #[serde(default)]
    pub amount: RawValue,
    #[serde(default)]
    pub net_inflow: RawValue,
}

impl ProviderRow {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Primary-capital net inflow split by order size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CapitalSplit {
    /// Super-large order net inflow
    pub super_large_net: f64,
    /// Large order net inflow
    pub large_net: f64,
    /// super_large_net + large_net
    pub primary_net: f64,
}

impl CapitalSplit {
    pub fn new(super_large_net: f64, large_net: f64) -> Self {
        Self {
            super_large_net,
            large_net,
            primary_net: super_large_net + large_net,
        }
    }
}

/// One daily session bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    /// Traded volume
    pub volume: f64,
    /// Turnover rate in percent, when the provider reports it
    pub turnover_rate: Option<f64>,
}

impl DailyBar {
    pub fn new(volume: f64, turnover_rate: Option<f64>) -> Self {
        Self {
            volume,
            turnover_rate,
        }
    }
}

// ============================================================================
// Provider Trait
// ============================================================================

/// Trait for fund-flow data providers.
#[async_trait]
pub trait FundFlowProvider: Send + Sync {
    /// Provider name (e.g., "eastmoney")
    fn name(&self) -> &'static str;

    /// Fetch the full universe for a period.
    async fn fetch_universe(&self, period: FlowPeriod) -> Result<Vec<ProviderRow>, ProviderError>;

    /// Fetch today's primary-capital split for one instrument.
    async fn fetch_capital_split(&self, code: &str) -> Result<CapitalSplit, ProviderError>;

    /// Fetch daily bars for one instrument, most recent session first.
    ///
    /// Returns at most `sessions` bars.
    async fn fetch_daily_bars(
        &self,
        code: &str,
        sessions: usize,
    ) -> Result<Vec<DailyBar>, ProviderError>;
}
