//! Eastmoney adapter for A-share fund-flow data.
//!
//! Primary data source: eastmoney push2 APIs (免费、无需 token)
//!
//! # Data Sources
//! - Universe / N-day ranking: push2.eastmoney.com `clist`
//! - Per-stock capital split: push2.eastmoney.com `fflow/kline`
//! - Daily bars (volume, turnover): push2his.eastmoney.com `kline`
//!
//! The list API caps its page size, so the universe is read page by page
//! until the reported `total` is collected.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use super::normalize::RawValue;
use super::provider::{CapitalSplit, DailyBar, FundFlowProvider, ProviderError, ProviderRow};
use super::FlowPeriod;

// ============================================================================
// Constants
// ============================================================================

/// Eastmoney list API (universe + rankings)
const EASTMONEY_CLIST_URL: &str = "https://push2.eastmoney.com/api/qt/clist/get";

/// Eastmoney intraday capital flow API
const EASTMONEY_FFLOW_URL: &str = "https://push2.eastmoney.com/api/qt/stock/fflow/kline/get";

/// Eastmoney historical K-line API
const EASTMONEY_KLINE_URL: &str = "https://push2his.eastmoney.com/api/qt/stock/kline/get";

/// Shanghai/Shenzhen A-share boards
const A_SHARE_FILTER: &str = "m:0+t:6,m:0+t:80,m:1+t:2,m:1+t:23";

/// Rows per list page
const PAGE_SIZE: usize = 100;

/// Stop paging here even if `total` claims more
const MAX_PAGES: usize = 100;

// ============================================================================
// Field Mapping
// ============================================================================

/// clist field ids for one period.
struct PeriodFields {
    /// Sort field
    sort: &'static str,
    change_pct: &'static str,
    turnover_rate: Option<&'static str>,
    amount: Option<&'static str>,
    net_inflow: &'static str,
}

fn period_fields(period: FlowPeriod) -> PeriodFields {
    match period {
        FlowPeriod::Instant => PeriodFields {
            sort: "f62",
            change_pct: "f3",
            turnover_rate: Some("f8"),
            amount: Some("f6"),
            net_inflow: "f62",
        },
        FlowPeriod::Rank3Day => PeriodFields {
            sort: "f267",
            change_pct: "f127",
            turnover_rate: None,
            amount: None,
            net_inflow: "f267",
        },
        FlowPeriod::Rank5Day => PeriodFields {
            sort: "f164",
            change_pct: "f109",
            turnover_rate: None,
            amount: None,
            net_inflow: "f164",
        },
        FlowPeriod::Rank10Day => PeriodFields {
            sort: "f174",
            change_pct: "f160",
            turnover_rate: None,
            amount: None,
            net_inflow: "f174",
        },
    }
}

/// Convert a 6-digit code to eastmoney secid ("1.600000" SH, "0.000001" SZ).
fn to_secid(code: &str) -> String {
    let market = if code.starts_with('6') { "1" } else { "0" };
    format!("{}.{}", market, code)
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ClistResponse {
    rc: i32,
    data: Option<ClistData>,
}

#[derive(Debug, Default, Deserialize)]
struct ClistData {
    #[serde(default)]
    total: usize,
    #[serde(default)]
    diff: Vec<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct KlineResponse {
    rc: i32,
    data: Option<KlineData>,
}

#[derive(Debug, Deserialize)]
struct KlineData {
    #[serde(default)]
    klines: Vec<String>,
}

// ============================================================================
// Eastmoney Provider
// ============================================================================

/// Eastmoney fund-flow provider.
pub struct EastmoneyProvider {
    client: reqwest::Client,
    timeout: Duration,
}

impl EastmoneyProvider {
    /// Create a provider with a per-request timeout.
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7)")
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { client, timeout }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, ProviderError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(self.timeout.as_millis() as u64)
            } else {
                ProviderError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited);
        }
        if !status.is_success() {
            return Err(ProviderError::Network(format!("HTTP {}", status)));
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(format!("Failed to parse response: {}", e)))
    }

    /// One list page; a missing `data` object reads as an empty page.
    async fn fetch_clist_page(&self, base_url: &str, page: usize) -> Result<ClistData, ProviderError> {
        let url = format!("{}&pn={}", base_url, page);
        let data: ClistResponse = self.get_json(&url).await?;
        if data.rc != 0 {
            return Err(ProviderError::Unavailable(format!(
                "Eastmoney API error: rc={} (page {})",
                data.rc, page
            )));
        }
        Ok(data.data.unwrap_or_default())
    }

    async fn fetch_kline_lines(&self, url: &str) -> Result<Vec<String>, ProviderError> {
        let data: KlineResponse = self.get_json(url).await?;
        if data.rc != 0 {
            return Err(ProviderError::Unavailable(format!(
                "Eastmoney API error: rc={}",
                data.rc
            )));
        }
        Ok(data.data.map(|d| d.klines).unwrap_or_default())
    }
}

/// Collect list pages until `total` rows are in hand or a page comes back empty.
///
/// A failed page fails the whole fetch: a partial universe would be ranked
/// as if it were the market.
async fn collect_pages<F, Fut>(mut fetch_page: F) -> Result<Vec<Map<String, Value>>, ProviderError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<ClistData, ProviderError>>,
{
    let mut entries = Vec::new();
    let mut total = 0;

    for page in 1..=MAX_PAGES {
        let data = fetch_page(page).await?;
        total = data.total;
        if data.diff.is_empty() {
            break;
        }

        entries.extend(data.diff);
        debug!(page, collected = entries.len(), total, "Fetched list page");
        if entries.len() >= total {
            break;
        }
    }

    if entries.len() < total {
        warn!(collected = entries.len(), total, "List paging stopped short of reported total");
    }

    Ok(entries)
}

/// Convert one clist entry into a provider row.
fn row_from_entry(entry: &Map<String, Value>, fields: &PeriodFields) -> Option<ProviderRow> {
    let code = match entry.get("f12")? {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let name = entry.get("f14").and_then(Value::as_str).unwrap_or_default();

    let raw = |key: Option<&str>| -> RawValue {
        key.and_then(|k| entry.get(k))
            .map(RawValue::from)
            .unwrap_or_default()
    };

    Some(ProviderRow {
        code,
        name: name.to_string(),
        price: raw(Some("f2")),
        change_pct: raw(Some(fields.change_pct)),
        turnover_rate: raw(fields.turnover_rate),
        amount: raw(fields.amount),
        net_inflow: raw(Some(fields.net_inflow)),
    })
}

/// Parse the last line of an fflow kline into a capital split.
///
/// Line format: "time,main,small,medium,large,super".
fn parse_capital_line(line: &str) -> Result<CapitalSplit, ProviderError> {
    let parts: Vec<&str> = line.split(',').collect();
    if parts.len() < 6 {
        return Err(ProviderError::Malformed(format!("fflow line: {}", line)));
    }

    let parse = |s: &str| {
        s.parse::<f64>()
            .map_err(|e| ProviderError::Malformed(format!("fflow value {}: {}", s, e)))
    };

    Ok(CapitalSplit::new(parse(parts[5])?, parse(parts[4])?))
}

/// Parse daily kline lines into bars, most recent first.
///
/// Line format: "date,open,close,high,low,volume,amount,amplitude,
/// change_pct,change,turnover".
fn parse_bars(lines: &[String]) -> Vec<DailyBar> {
    let mut bars = Vec::with_capacity(lines.len());
    for line in lines.iter().rev() {
        let parts: Vec<&str> = line.split(',').collect();
        match parts.get(5).and_then(|v| v.parse::<f64>().ok()) {
            Some(volume) => {
                let turnover = parts.get(10).and_then(|v| v.parse::<f64>().ok());
                bars.push(DailyBar::new(volume, turnover));
            }
            None => warn!(line = %line, "Invalid kline format, skipping"),
        }
    }
    bars
}

#[async_trait]
impl FundFlowProvider for EastmoneyProvider {
    fn name(&self) -> &'static str {
        "eastmoney"
    }

    async fn fetch_universe(&self, period: FlowPeriod) -> Result<Vec<ProviderRow>, ProviderError> {
        let fields = period_fields(period);

        let mut wanted = vec!["f12", "f14", "f2", fields.change_pct, fields.net_inflow];
        wanted.extend(fields.turnover_rate);
        wanted.extend(fields.amount);

        let base_url = format!(
            "{}?pz={}&po=1&np=1&fltt=2&invt=2&fid={}&fs={}&fields={}",
            EASTMONEY_CLIST_URL,
            PAGE_SIZE,
            fields.sort,
            A_SHARE_FILTER,
            wanted.join(","),
        );

        debug!(url = %base_url, period = %period, "Fetching fund-flow universe from eastmoney");

        let base_url = base_url.as_str();
        let entries = collect_pages(move |page| self.fetch_clist_page(base_url, page)).await?;
        if entries.is_empty() {
            return Err(ProviderError::DataNotAvailable(format!("empty universe for {}", period)));
        }

        Ok(entries
            .iter()
            .filter_map(|entry| row_from_entry(entry, &fields))
            .collect())
    }

    async fn fetch_capital_split(&self, code: &str) -> Result<CapitalSplit, ProviderError> {
        let url = format!(
            "{}?lmt=0&klt=1&secid={}&fields1=f1,f2,f3,f7&fields2=f51,f52,f53,f54,f55,f56,f57",
            EASTMONEY_FFLOW_URL,
            to_secid(code),
        );

        let lines = self.fetch_kline_lines(&url).await?;
        let last = lines
            .last()
            .ok_or_else(|| ProviderError::DataNotAvailable(format!("no capital flow for {}", code)))?;

        parse_capital_line(last)
    }

    async fn fetch_daily_bars(
        &self,
        code: &str,
        sessions: usize,
    ) -> Result<Vec<DailyBar>, ProviderError> {
        let url = format!(
            "{}?secid={}&klt=101&fqt=1&lmt={}&end=20500101&fields1=f1,f2,f3,f4,f5,f6&fields2=f51,f52,f53,f54,f55,f56,f57,f58,f59,f60,f61",
            EASTMONEY_KLINE_URL,
            to_secid(code),
            sessions,
        );

        let lines = self.fetch_kline_lines(&url).await?;
        let mut bars = parse_bars(&lines);
        bars.truncate(sessions);
        Ok(bars)
    }
}
