//! Candle, the fundamental market data unit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One kline row as the upstream API returns it, before cleaning.
///
/// Every field except the key may be missing or unparseable on the wire,
/// so they are carried as options and resolved by the cleaning pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawKline {
    pub open_time: i64,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
    pub close_time: Option<i64>,
    pub quote_asset_volume: Option<f64>,
    pub number_of_trades: Option<u64>,
    pub taker_buy_base_asset_volume: Option<f64>,
    pub taker_buy_quote_asset_volume: Option<f64>,
    pub ignore: Option<String>,
}

impl RawKline {
    /// Span of the candle in milliseconds, if the close time is known.
    pub fn span_ms(&self) -> Option<i64> {
        self.close_time
            .and_then(|close| close.checked_sub(self.open_time))
    }
}

/// Canonical OHLCV candle as persisted, keyed by `open_time`.
///
/// `close_time` and the wire-level `ignore` marker are not part of the
/// persisted record; well-formedness is checked before projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_asset_volume: f64,
    pub number_of_trades: u64,
    pub taker_buy_base_asset_volume: f64,
    pub taker_buy_quote_asset_volume: f64,
}

impl Candle {
    /// Open time as epoch milliseconds.
    pub fn open_time_ms(&self) -> i64 {
        self.open_time.timestamp_millis()
    }

    /// Returns true if any floating-point field is NaN (treated as null).
    pub fn has_null(&self) -> bool {
        [
            self.open,
            self.high,
            self.low,
            self.close,
            self.volume,
            self.quote_asset_volume,
            self.taker_buy_base_asset_volume,
            self.taker_buy_quote_asset_volume,
        ]
        .iter()
        .any(|v| v.is_nan())
    }

    /// Basic OHLC sanity: high bounds everything, low is bounded by everything.
    pub fn is_sane(&self) -> bool {
        if self.has_null() {
            return false;
        }
        self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.volume >= 0.0
            && self.quote_asset_volume >= 0.0
    }
}
