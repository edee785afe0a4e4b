use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::model::{CoinRow, MarketRow};

/// Assets at or below this 24h volume are not stored.
pub const DEFAULT_MIN_VOLUME: f64 = 50_000.0;

/// Projects raw asset objects onto the keep-list. Non-object entries are skipped.
pub fn project(records: &[Value]) -> Vec<MarketRow> {
    records.iter().filter_map(MarketRow::from_value).collect()
}

/// Keeps rows that carry a rank and trade strictly above `min_volume`.
pub fn retain_tradable(mut rows: Vec<MarketRow>, min_volume: f64) -> Vec<MarketRow> {
    rows.retain(|r| r.market_cap_rank.is_some() && r.total_volume.is_some_and(|v| v > min_volume));
    rows
}

pub fn stamp(rows: Vec<MarketRow>, captured_at: DateTime<Utc>) -> Vec<CoinRow> {
    rows.into_iter()
        .filter_map(|r| r.into_snapshot(captured_at))
        .collect()
}
