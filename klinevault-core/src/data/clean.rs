//! Integrity & cleaning pipeline: raw klines → canonical candles.
//!
//! Steps, in order:
//! 1. deduplicate by `open_time` (first occurrence wins)
//! 2. sort ascending by `open_time`
//! 3. drop malformed candles whose span is not `duration - 1ms`
//! 4. project away `close_time` and the `ignore` marker
//! 5. type-normalize; rows with a missing or NaN field are dropped here
//! 6. assert integrity (no nulls, strictly increasing keys)
//! 7. optionally trim everything from the start of the current day on
//!
//! Steps 1–5 and 7 silently drop rows: bad upstream rows are expected.
//! Step 6 failing means the pipeline itself is broken.

use crate::domain::{Candle, Interval, RawKline};
use chrono::{DateTime, NaiveTime, Utc};
use std::collections::HashSet;
use thiserror::Error;

/// Broken pipeline invariant. Never expected at runtime.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum IntegrityError {
    #[error("null field in candle at open_time {0}")]
    NullField(i64),

    #[error("duplicate open_time {0}")]
    DuplicateKey(i64),

    #[error("open_time {0} out of order")]
    Unsorted(i64),
}

/// Options for one cleaning pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CleanOptions {
    pub interval: Interval,
    /// Exclusive upper bound on `open_time`, usually the start of today.
    pub trim_before: Option<DateTime<Utc>>,
}

/// Row counts for each drop reason.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanReport {
    pub input: usize,
    pub duplicates: usize,
    pub malformed: usize,
    pub incomplete: usize,
    pub trimmed: usize,
    pub output: usize,
}

impl CleanReport {
    pub fn dropped(&self) -> usize {
        self.input - self.output
    }
}

/// Output of [`clean`].
#[derive(Debug, Clone)]
pub struct Cleaned {
    pub candles: Vec<Candle>,
    pub report: CleanReport,
}

/// Start of the UTC day containing `now`.
pub fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::default()).and_utc()
}

/// Run the full cleaning pipeline over a concatenation of raw pages.
pub fn clean(raw: Vec<RawKline>, opts: &CleanOptions) -> Result<Cleaned, IntegrityError> {
    let mut report = CleanReport {
        input: raw.len(),
        ..CleanReport::default()
    };

    let mut seen = HashSet::with_capacity(raw.len());
    let mut rows: Vec<RawKline> = raw
        .into_iter()
        .filter(|k| seen.insert(k.open_time))
        .collect();
    report.duplicates = report.input - rows.len();

    rows.sort_by_key(|k| k.open_time);

    let span = opts.interval.expected_span_ms();
    let before = rows.len();
    rows.retain(|k| k.span_ms() == Some(span));
    report.malformed = before - rows.len();

    let before = rows.len();
    let mut candles: Vec<Candle> = rows.iter().filter_map(to_candle).collect();
    report.incomplete = before - candles.len();

    assert_integrity(&candles)?;

    if let Some(cutoff) = opts.trim_before {
        report.trimmed = trim(&mut candles, cutoff);
    }

    report.output = candles.len();
    Ok(Cleaned { candles, report })
}

/// Project a raw row onto the persisted schema. `None` if any field is unusable.
fn to_candle(raw: &RawKline) -> Option<Candle> {
    let candle = Candle {
        open_time: DateTime::from_timestamp_millis(raw.open_time)?,
        open: raw.open?,
        high: raw.high?,
        low: raw.low?,
        close: raw.close?,
        volume: raw.volume?,
        quote_asset_volume: raw.quote_asset_volume?,
        number_of_trades: raw.number_of_trades?,
        taker_buy_base_asset_volume: raw.taker_buy_base_asset_volume?,
        taker_buy_quote_asset_volume: raw.taker_buy_quote_asset_volume?,
    };
    (!candle.has_null()).then_some(candle)
}

/// Check the persisted-dataset invariants: no nulls, strictly increasing keys.
pub fn assert_integrity(candles: &[Candle]) -> Result<(), IntegrityError> {
    if let Some(c) = candles.iter().find(|c| c.has_null()) {
        return Err(IntegrityError::NullField(c.open_time_ms()));
    }
    for pair in candles.windows(2) {
        let (prev, next) = (pair[0].open_time, pair[1].open_time);
        if next == prev {
            return Err(IntegrityError::DuplicateKey(next.timestamp_millis()));
        }
        if next < prev {
            return Err(IntegrityError::Unsorted(next.timestamp_millis()));
        }
    }
    Ok(())
}

/// Drop candles at or after `cutoff`; returns how many were dropped.
pub fn trim(candles: &mut Vec<Candle>, cutoff: DateTime<Utc>) -> usize {
    let before = candles.len();
    candles.retain(|c| c.open_time < cutoff);
    before - candles.len()
}
