//! Fund-flow market data for A-shares.
//!
//! Provides the record types, provider abstraction, and the three-tier
//! cache that serves a ranked universe to the screener.
//!
//! # Resolution Path
//!
//! ```text
//! resolve(period)
//!   ├─► MemoryCache        (process lifetime, keyed by signal kind + period)
//!   ├─► LocalStorage       (SQLite, keyed by signal kind + period + trading date)
//!   └─► FundFlowProvider   (eastmoney)
//!         └─► normalize ─► enrich (instant only) ─► write back to both tiers
//! ```

pub mod cache_manager;
pub mod eastmoney;
pub mod enrichment;
pub mod local_storage;
pub mod memory_cache;
pub mod normalize;
pub mod provider;

pub use cache_manager::TieredCache;
pub use eastmoney::EastmoneyProvider;
pub use enrichment::{BatchOutcome, EnrichmentFetcher, FetchPolicy};
pub use local_storage::{LocalStorage, LocalStorageConfig, LocalStorageStats};
pub use memory_cache::{MemoryCache, MemoryCacheStats};
pub use normalize::RawValue;
pub use provider::{CapitalSplit, DailyBar, FundFlowProvider, ProviderError, ProviderRow};

use chrono::{Datelike, Duration, Local, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Periods
// ============================================================================

/// Kind of fund-flow signal requested from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// Current-session flows
    Instant,
    /// Multi-day stage ranking
    RankNDay,
}

impl SignalKind {
    /// Storage label
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Instant => "instant",
            Self::RankNDay => "rank",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fund-flow period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowPeriod {
    /// 即时
    #[serde(rename = "instant")]
    Instant,
    /// 3日排行
    #[serde(rename = "3d")]
    Rank3Day,
    /// 5日排行
    #[serde(rename = "5d")]
    Rank5Day,
    /// 10日排行
    #[serde(rename = "10d")]
    Rank10Day,
}

impl FlowPeriod {
    /// All supported periods
    pub const ALL: [FlowPeriod; 4] = [
        Self::Instant,
        Self::Rank3Day,
        Self::Rank5Day,
        Self::Rank10Day,
    ];

    /// Parse from a storage label or display label (e.g., "3d", "3日排行")
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "instant" | "即时" | "0d" => Some(Self::Instant),
            "3d" | "3日排行" | "3" => Some(Self::Rank3Day),
            "5d" | "5日排行" | "5" => Some(Self::Rank5Day),
            "10d" | "10日排行" | "10" => Some(Self::Rank10Day),
            _ => None,
        }
    }

    /// Stable label used as a storage key
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Instant => "instant",
            Self::Rank3Day => "3d",
            Self::Rank5Day => "5d",
            Self::Rank10Day => "10d",
        }
    }

    /// Human-readable label
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Instant => "即时",
            Self::Rank3Day => "3日排行",
            Self::Rank5Day => "5日排行",
            Self::Rank10Day => "10日排行",
        }
    }

    /// Signal kind implied by this period
    pub fn signal_kind(&self) -> SignalKind {
        match self {
            Self::Instant => SignalKind::Instant,
            _ => SignalKind::RankNDay,
        }
    }

    /// Number of sessions covered by a ranking period
    pub fn days(&self) -> Option<u32> {
        match self {
            Self::Instant => None,
            Self::Rank3Day => Some(3),
            Self::Rank5Day => Some(5),
            Self::Rank10Day => Some(10),
        }
    }
}

impl fmt::Display for FlowPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Records
// ============================================================================

/// How a record's position-build ratio was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatioBasis {
    /// Primary-capital net inflow over traded amount
    PrimaryCapital,
    /// N-day stage net scaled by the instant amount/turnover relationship
    EstimatedFromInstant,
    /// Not computable
    Unavailable,
}

impl RatioBasis {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrimaryCapital => "primary_capital",
            Self::EstimatedFromInstant => "estimated_from_instant",
            Self::Unavailable => "unavailable",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "primary_capital" => Self::PrimaryCapital,
            "estimated_from_instant" => Self::EstimatedFromInstant,
            _ => Self::Unavailable,
        }
    }
}

/// One instrument's fund-flow snapshot for a period.
///
/// Every metric is optional: `None` means the value could not be parsed or
/// derived, which is distinct from a real zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundFlowRecord {
    /// 6-digit instrument code
    pub code: String,
    /// Display name
    pub name: String,
    /// Last price
    pub price: Option<f64>,
    /// Percent change (stage change for N-day periods)
    pub change_pct: Option<f64>,
    /// Turnover rate in percent (continuous turnover for N-day periods)
    pub turnover_rate: Option<f64>,
    /// Traded amount
    pub amount: Option<f64>,
    /// Raw net inflow reported with the universe
    pub net_inflow: Option<f64>,
    /// Super-large order net inflow
    pub super_large_net: Option<f64>,
    /// Large order net inflow
    pub large_net: Option<f64>,
    /// Primary-capital net inflow (super-large + large)
    pub primary_net: Option<f64>,
    /// Position-build ratio in percent
    pub position_ratio: Option<f64>,
    /// Provenance of `position_ratio`
    pub ratio_basis: RatioBasis,
    /// Float market cap
    pub float_market_cap: Option<f64>,
}

impl FundFlowRecord {
    /// Create an empty record for a code.
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            price: None,
            change_pct: None,
            turnover_rate: None,
            amount: None,
            net_inflow: None,
            super_large_net: None,
            large_net: None,
            primary_net: None,
            position_ratio: None,
            ratio_basis: RatioBasis::Unavailable,
            float_market_cap: None,
        }
    }

    /// Recompute the position-build ratio from primary-capital net inflow.
    ///
    /// The raw net inflow is never used as a substitute.
    pub fn derive_position_ratio(&mut self) {
        self.position_ratio = match (self.primary_net, self.amount) {
            (Some(net), Some(amount)) if amount != 0.0 => Some(net / amount * 100.0),
            _ => None,
        };
        self.ratio_basis = if self.position_ratio.is_some() {
            RatioBasis::PrimaryCapital
        } else {
            RatioBasis::Unavailable
        };
    }

    /// Derive float market cap as `amount / (turnover_rate / 100)`.
    pub fn derive_float_market_cap(&mut self) {
        self.float_market_cap = match (self.amount, self.turnover_rate) {
            (Some(amount), Some(turnover)) if turnover != 0.0 => Some(amount / (turnover / 100.0)),
            _ => None,
        };
    }
}

/// A resolved universe for one period and trading date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub period: FlowPeriod,
    pub trading_date: NaiveDate,
    /// Records in provider order
    pub records: Vec<FundFlowRecord>,
}

impl Dataset {
    pub fn new(period: FlowPeriod, trading_date: NaiveDate, records: Vec<FundFlowRecord>) -> Self {
        Self {
            period,
            trading_date,
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Codes in provider order
    pub fn codes(&self) -> Vec<String> {
        self.records.iter().map(|r| r.code.clone()).collect()
    }

    /// Find a record by code
    pub fn get(&self, code: &str) -> Option<&FundFlowRecord> {
        self.records.iter().find(|r| r.code == code)
    }
}

// ============================================================================
// Codes and Dates
// ============================================================================

/// Zero-pad a raw code to 6 digits.
///
/// Returns `None` for non-numeric input or codes longer than 6 digits.
pub fn normalize_code(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    // Codes round-tripped through numeric columns may arrive as "1.0"
    let digits = trimmed.strip_suffix(".0").unwrap_or(trimmed);

    if digits.is_empty() || digits.len() > 6 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    Some(format!("{:0>6}", digits))
}

/// Check that a normalized code belongs to the screened boards (0/3/6 prefix).
pub fn is_supported_code(code: &str) -> bool {
    code.len() == 6 && matches!(code.as_bytes()[0], b'0' | b'3' | b'6')
}

/// Trading date for a calendar date (weekends roll back to Friday).
pub fn trading_date_for(date: NaiveDate) -> NaiveDate {
    match date.weekday() {
        Weekday::Sat => date - Duration::days(1),
        Weekday::Sun => date - Duration::days(2),
        _ => date,
    }
}

/// Trading date for the local current day.
pub fn current_trading_date() -> NaiveDate {
    trading_date_for(Local::now().date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_labels() {
        for period in FlowPeriod::ALL {
            assert_eq!(FlowPeriod::parse(period.as_str()), Some(period));
            assert_eq!(FlowPeriod::parse(period.display_name()), Some(period));
        }
        assert_eq!(FlowPeriod::parse("20d"), None);
        assert_eq!(FlowPeriod::Instant.signal_kind(), SignalKind::Instant);
        assert_eq!(FlowPeriod::Rank5Day.signal_kind(), SignalKind::RankNDay);
        assert_eq!(FlowPeriod::Rank10Day.days(), Some(10));
    }

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code("1"), Some("000001".to_string()));
        assert_eq!(normalize_code(" 600519 "), Some("600519".to_string()));
        assert_eq!(normalize_code("300750.0"), Some("300750".to_string()));
        assert_eq!(normalize_code("1234567"), None);
        assert_eq!(normalize_code("SZ0001"), None);
        assert_eq!(normalize_code(""), None);
    }

    #[test]
    fn test_supported_prefixes() {
        assert!(is_supported_code("000001"));
        assert!(is_supported_code("300750"));
        assert!(is_supported_code("600519"));
        assert!(!is_supported_code("830799"));
        assert!(!is_supported_code("430047"));
        assert!(!is_supported_code("688"));
    }

    #[test]
    fn test_trading_date_rolls_back_weekends() {
        let friday = NaiveDate::from_ymd_opt(2024, 6, 7).unwrap();
        let saturday = NaiveDate::from_ymd_opt(2024, 6, 8).unwrap();
        let sunday = NaiveDate::from_ymd_opt(2024, 6, 9).unwrap();
        let monday = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();

        assert_eq!(trading_date_for(friday), friday);
        assert_eq!(trading_date_for(saturday), friday);
        assert_eq!(trading_date_for(sunday), friday);
        assert_eq!(trading_date_for(monday), monday);
    }

    #[test]
    fn test_derived_metrics() {
        let mut record = FundFlowRecord::new("000001", "平安银行");
        record.amount = Some(1.0e9);
        record.turnover_rate = Some(2.0);
        record.primary_net = Some(5.0e7);

        record.derive_position_ratio();
        record.derive_float_market_cap();

        assert_eq!(record.position_ratio, Some(5.0));
        assert_eq!(record.ratio_basis, RatioBasis::PrimaryCapital);
        assert_eq!(record.float_market_cap, Some(5.0e10));
    }

    #[test]
    fn test_derived_metrics_undefined_inputs() {
        let mut record = FundFlowRecord::new("000001", "平安银行");
        record.amount = Some(0.0);
        record.turnover_rate = Some(0.0);
        record.primary_net = Some(5.0e7);
        record.net_inflow = Some(1.0e7);

        record.derive_position_ratio();
        record.derive_float_market_cap();

        assert_eq!(record.position_ratio, None);
        assert_eq!(record.ratio_basis, RatioBasis::Unavailable);
        assert_eq!(record.float_market_cap, None);

        record.amount = Some(1.0e8);
        record.primary_net = None;
        record.derive_position_ratio();
        assert_eq!(record.position_ratio, None);
    }
}
