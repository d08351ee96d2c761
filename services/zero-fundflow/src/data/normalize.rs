//! Unit/amount normalization for provider-native values.
//!
//! Providers mix plain numbers with unit-suffixed strings ("1.23亿",
//! "4567.8万", "3.5%") and placeholders ("-", ""). Everything here returns
//! `Option<f64>`: unparseable input is `None`, never zero.

use serde::{Deserialize, Serialize};

/// 亿
pub const YI: f64 = 1.0e8;
/// 万
pub const WAN: f64 = 1.0e4;

/// A scalar as delivered by a provider, before normalization.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Text(String),
    #[default]
    Missing,
}

impl RawValue {
    /// Normalize as an amount (unit suffixes expanded).
    pub fn amount(&self) -> Option<f64> {
        match self {
            Self::Number(v) => finite(*v),
            Self::Text(s) => parse_amount(s),
            Self::Missing => None,
        }
    }

    /// Normalize as a percentage value (e.g., "3.5%" → 3.5).
    pub fn percent(&self) -> Option<f64> {
        match self {
            Self::Number(v) => finite(*v),
            Self::Text(s) => parse_percent(s),
            Self::Missing => None,
        }
    }
}

impl From<&serde_json::Value> for RawValue {
    fn from(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Number(n) => n.as_f64().map_or(Self::Missing, Self::Number),
            serde_json::Value::String(s) => Self::Text(s.clone()),
            _ => Self::Missing,
        }
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

fn finite(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}

fn is_placeholder(s: &str) -> bool {
    matches!(s, "" | "-" | "--" | "—")
}

/// Parse an amount string, expanding 亿/万 suffixes.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let s = raw.trim();
    if is_placeholder(s) {
        return None;
    }

    let (number, scale) = if let Some(n) = s.strip_suffix('亿') {
        (n, YI)
    } else if let Some(n) = s.strip_suffix('万') {
        (n, WAN)
    } else {
        (s, 1.0)
    };

    number
        .trim()
        .replace(',', "")
        .parse::<f64>()
        .ok()
        .and_then(finite)
        .map(|v| v * scale)
}

/// Parse a percentage string, tolerating a trailing `%`.
pub fn parse_percent(raw: &str) -> Option<f64> {
    let s = raw.trim();
    if is_placeholder(s) {
        return None;
    }

    s.strip_suffix('%')
        .unwrap_or(s)
        .trim()
        .parse::<f64>()
        .ok()
        .and_then(finite)
}

/// Round to a fixed number of decimals.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Format an amount as `x.xx亿` / `x.xx万` / `x.xx`; missing renders `-`.
pub fn format_amount(value: Option<f64>) -> String {
    match value {
        None => "-".to_string(),
        Some(v) if v.abs() >= YI => format!("{:.2}亿", v / YI),
        Some(v) if v.abs() >= WAN => format!("{:.2}万", v / WAN),
        Some(v) => format!("{:.2}", v),
    }
}

/// Format a percentage as `x.xx%`; missing renders `-`.
pub fn format_percent(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.2}%", v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_amount_units() {
        assert_eq!(parse_amount("1.5亿"), Some(1.5e8));
        assert_eq!(parse_amount("-3.5万"), Some(-3.5e4));
        assert_eq!(parse_amount("12345.6"), Some(12345.6));
        assert_eq!(parse_amount("1,234"), Some(1234.0));
        assert_eq!(parse_amount("0"), Some(0.0));
    }

    #[test]
    fn test_parse_amount_missing() {
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("-"), None);
        assert_eq!(parse_amount("  "), None);
        assert_eq!(parse_amount("abc"), None);
        assert_eq!(parse_amount("亿"), None);
        assert_eq!(parse_amount("NaN"), None);
    }

    #[test]
    fn test_parse_percent() {
        assert_eq!(parse_percent("3.5%"), Some(3.5));
        assert_eq!(parse_percent("-1.25"), Some(-1.25));
        assert_eq!(parse_percent("0%"), Some(0.0));
        assert_eq!(parse_percent("-"), None);
        assert_eq!(parse_percent("%"), None);
    }

    #[test]
    fn test_raw_value_from_json() {
        let number = RawValue::from(&serde_json::json!(12.5));
        let text = RawValue::from(&serde_json::json!("2.5亿"));
        let dash = RawValue::from(&serde_json::json!("-"));
        let null = RawValue::from(&serde_json::Value::Null);

        assert_eq!(number.amount(), Some(12.5));
        assert_eq!(text.amount(), Some(2.5e8));
        assert_eq!(dash.amount(), None);
        assert_eq!(null, RawValue::Missing);
        assert_eq!(RawValue::Number(f64::NAN).amount(), None);
    }

    #[test]
    fn test_format_helpers() {
        assert_eq!(format_amount(Some(2.5e8)), "2.50亿");
        assert_eq!(format_amount(Some(-12_000.0)), "-1.20万");
        assert_eq!(format_amount(Some(99.0)), "99.00");
        assert_eq!(format_amount(None), "-");
        assert_eq!(format_percent(Some(3.456)), "3.46%");
        assert_eq!(format_percent(None), "-");
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(1.234_56, 2), 1.23);
        assert_eq!(round_to(87.25, 1), 87.3);
    }
}
