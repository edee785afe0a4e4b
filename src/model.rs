use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Fields carried from an upstream asset object into the stored snapshot.
pub const KEEP_COLUMNS: [&str; 11] = [
    "id",
    "symbol",
    "name",
    "current_price",
    "market_cap",
    "total_volume",
    "market_cap_rank",
    "price_change_percentage_24h",
    "high_24h",
    "low_24h",
    "last_updated",
];

pub const CAPTURED_AT: &str = "captured_at";

/// One asset object projected onto [`KEEP_COLUMNS`]. Anything the upstream
/// omitted, or sent with an unexpected type, is `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketRow {
    pub id: Option<String>,
    pub symbol: Option<String>,
    pub name: Option<String>,
    pub current_price: Option<f64>,
    pub market_cap: Option<f64>,
    pub total_volume: Option<f64>,
    pub market_cap_rank: Option<u64>,
    pub price_change_percentage_24h: Option<f64>,
    pub high_24h: Option<f64>,
    pub low_24h: Option<f64>,
    pub last_updated: Option<String>,
}

impl MarketRow {
    /// Returns `None` only when `v` is not a JSON object.
    pub fn from_value(v: &Value) -> Option<Self> {
        let obj = v.as_object()?;
        let text = |key: &str| obj.get(key).and_then(Value::as_str).map(str::to_string);
        let number = |key: &str| obj.get(key).and_then(parse_number);

        Some(MarketRow {
            id: text("id"),
            symbol: text("symbol"),
            name: text("name"),
            current_price: number("current_price"),
            market_cap: number("market_cap"),
            total_volume: number("total_volume"),
            market_cap_rank: obj.get("market_cap_rank").and_then(parse_rank),
            price_change_percentage_24h: number("price_change_percentage_24h"),
            high_24h: number("high_24h"),
            low_24h: number("low_24h"),
            last_updated: text("last_updated"),
        })
    }

    /// Stamps the row for storage. Rows without rank or volume yield `None`.
    pub fn into_snapshot(self, captured_at: DateTime<Utc>) -> Option<CoinRow> {
        Some(CoinRow {
            market_cap_rank: self.market_cap_rank?,
            total_volume: self.total_volume?,
            id: self.id,
            symbol: self.symbol,
            name: self.name,
            current_price: self.current_price,
            market_cap: self.market_cap,
            price_change_percentage_24h: self.price_change_percentage_24h,
            high_24h: self.high_24h,
            low_24h: self.low_24h,
            last_updated: self.last_updated,
            captured_at,
        })
    }
}

/// JSON numbers, or strings holding one (`"900000"`). Non-finite values are absent.
fn parse_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite())
}

/// A rank is present only as a non-negative whole number: `7`, `7.0` or `"7"`.
/// Fractional ranks such as `7.9` count as absent.
fn parse_rank(v: &Value) -> Option<u64> {
    if let Some(rank) = v.as_u64() {
        return Some(rank);
    }
    parse_number(v)
        .filter(|r| *r >= 0.0 && r.fract() == 0.0 && *r <= u64::MAX as f64)
        .map(|r| r as u64)
}

/// Output row: one asset's market snapshot at capture time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoinRow {
    pub id: Option<String>,
    pub symbol: Option<String>,
    pub name: Option<String>,
    pub current_price: Option<f64>,
    pub market_cap: Option<f64>,
    pub total_volume: f64,
    pub market_cap_rank: u64,
    pub price_change_percentage_24h: Option<f64>,
    pub high_24h: Option<f64>,
    pub low_24h: Option<f64>,
    pub last_updated: Option<String>,
    pub captured_at: DateTime<Utc>,
}

/// Snapshot of one exchange-rate response.
#[derive(Debug, Clone, PartialEq)]
pub struct RatesSnapshot {
    pub base_code: String,
    pub time_last_update_utc: Option<String>,
    pub conversion_rates: BTreeMap<String, f64>,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExchangeRateRow {
    pub base_code: String,
    pub target_code: String,
    pub rate: f64,
    pub time_last_update_utc: Option<String>,
    pub captured_at: DateTime<Utc>,
}

impl RatesSnapshot {
    pub fn rows(&self) -> Vec<ExchangeRateRow> {
        self.conversion_rates
            .iter()
            .map(|(target, rate)| ExchangeRateRow {
                base_code: self.base_code.clone(),
                target_code: target.clone(),
                rate: *rate,
                time_last_update_utc: self.time_last_update_utc.clone(),
                captured_at: self.captured_at,
            })
            .collect()
    }
}
