//! Kline source trait, structured error types, and progress reporting.
//!
//! The KlineSource trait abstracts over the upstream exchange API so the
//! pagination and update drivers can run against a scripted source in tests.

use super::paginate::PageProgress;
use super::store::MergeOutcome;
use super::update::RunSummary;
use crate::config::ConfigError;
use crate::domain::{Interval, RawKline, SymbolInfo, TradingPair};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error, info};

/// Structured error types for data operations.
///
/// Transient transport faults never appear here: the batch fetcher absorbs
/// them with cooldown-and-retry.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network error: {0}")]
    Network(String),

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("parquet I/O error: {0}")]
    Parquet(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("catalog unavailable: {0}")]
    Catalog(String),

    #[error("{pair} is stored as {stored} candles, refusing to merge {requested} candles")]
    IntervalMismatch {
        pair: String,
        stored: Interval,
        requested: Interval,
    },

    #[error("integrity violation for {pair}: {invariant}")]
    IntegrityViolation { pair: String, invariant: String },

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

impl DataError {
    /// Fatal errors abort the whole run instead of just the current pair.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DataError::IntegrityViolation { .. }
                | DataError::IntervalMismatch { .. }
                | DataError::Catalog(_)
                | DataError::Store(_)
                | DataError::Config(_)
        )
    }
}

/// One bounded page request: `limit` klines starting at `start_time`.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRequest<'a> {
    pub symbol: &'a str,
    pub interval: Interval,
    /// Smallest open time of interest: last known open time + 1ms.
    pub start_time: i64,
    pub limit: u32,
}

/// Trait for upstream kline sources.
///
/// `fetch_batch` is infallible by contract: transient transport failures are
/// retried inside the implementation, and any other failure degrades to an
/// empty batch ("no data this round").
pub trait KlineSource: Send + Sync {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    /// Fetch one page of klines, ascending by open time. May be empty.
    fn fetch_batch(&self, request: &BatchRequest<'_>) -> Vec<RawKline>;

    /// Fetch the exchange's current symbol catalog.
    fn fetch_catalog(&self) -> Result<Vec<SymbolInfo>, DataError>;
}

/// Observer for a full update run. Purely observational: nothing returned
/// from these callbacks affects control flow.
pub trait UpdateProgress {
    /// Called once after the catalog has been fetched and filtered.
    fn on_catalog(&self, listed: usize, active: usize, selected: usize);

    /// Called when starting a pair; `cursor` is the last persisted open time.
    fn on_start(&self, pair: &TradingPair, index: usize, total: usize, cursor: Option<DateTime<Utc>>);

    /// Called after every page that advanced the cursor.
    fn on_page(&self, pair: &TradingPair, index: usize, total: usize, page: &PageProgress);

    /// Called when a pair finishes.
    fn on_complete(
        &self,
        pair: &TradingPair,
        index: usize,
        total: usize,
        result: &Result<MergeOutcome, DataError>,
    );

    /// Called once when the whole run is done.
    fn on_run_complete(&self, summary: &RunSummary);
}

/// Progress reporter that writes run lines through `tracing`.
pub struct LogProgress;

impl UpdateProgress for LogProgress {
    fn on_catalog(&self, listed: usize, active: usize, selected: usize) {
        if selected < listed {
            info!(
                "Got {selected} pairs to update ({listed} listed, {active} active, {} skipped)",
                listed - selected
            );
        } else {
            info!("Got {listed} pairs, of which {active} are active");
        }
    }

    fn on_start(&self, pair: &TradingPair, index: usize, total: usize, cursor: Option<DateTime<Utc>>) {
        let n = index + 1;
        info!("{n:04}/{total} Updating {pair}");
        match cursor {
            None => info!("{n:04}/{total} Starting from the beginning (no last known timestamp)"),
            Some(ts) => info!("{n:04}/{total} Starting from last known timestamp ({ts})"),
        }
    }

    fn on_page(&self, pair: &TradingPair, index: usize, total: usize, page: &PageProgress) {
        let n = index + 1;
        if page.page == 1 {
            info!(
                "{n:04}/{total} Fetching all available data for {pair} since {} (max {} candles)",
                page.first_open_time, page.estimated_total
            );
        } else {
            debug!(
                "{n:04}/{total} {pair} page {} through {} ({}/{} candles)",
                page.page, page.through_open_time, page.fetched, page.estimated_total
            );
        }
    }

    fn on_complete(
        &self,
        pair: &TradingPair,
        index: usize,
        total: usize,
        result: &Result<MergeOutcome, DataError>,
    ) {
        let n = index + 1;
        match result {
            Ok(outcome) if outcome.added > 0 => info!(
                "{n:04}/{total} Wrote {} new candles to file for {pair} ({} total)",
                outcome.added, outcome.total
            ),
            Ok(outcome) if outcome.total < outcome.previous => info!(
                "{n:04}/{total} Trimmed {} current-day candles from {pair} ({} total)",
                outcome.previous - outcome.total,
                outcome.total
            ),
            Ok(_) => info!("{n:04}/{total} Already up to date with {pair}"),
            Err(e) => error!("{n:04}/{total} Failed to update {pair}: {e}"),
        }
    }

    fn on_run_complete(&self, summary: &RunSummary) {
        info!(
            "Update complete: {} pairs processed, {} updated with {} new candles, {} already up to date",
            summary.processed, summary.updated, summary.new_candles, summary.up_to_date
        );
    }
}

/// Progress reporter that discards everything.
pub struct SilentProgress;

impl UpdateProgress for SilentProgress {
    fn on_catalog(&self, _listed: usize, _active: usize, _selected: usize) {}
    fn on_start(&self, _: &TradingPair, _: usize, _: usize, _: Option<DateTime<Utc>>) {}
    fn on_page(&self, _: &TradingPair, _: usize, _: usize, _: &PageProgress) {}
    fn on_complete(&self, _: &TradingPair, _: usize, _: usize, _: &Result<MergeOutcome, DataError>) {}
    fn on_run_complete(&self, _: &RunSummary) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_violation_is_fatal() {
        let err = DataError::IntegrityViolation {
            pair: "BTC-USDT".into(),
            invariant: "duplicate open_time".into(),
        };
        assert!(err.is_fatal());
        assert_eq!(
            err.to_string(),
            "integrity violation for BTC-USDT: duplicate open_time"
        );
    }

    #[test]
    fn interval_mismatch_is_fatal() {
        let err = DataError::IntervalMismatch {
            pair: "BTC-USDT".into(),
            stored: Interval::OneMinute,
            requested: Interval::OneHour,
        };
        assert!(err.is_fatal());
        assert_eq!(
            err.to_string(),
            "BTC-USDT is stored as 1m candles, refusing to merge 1h candles"
        );
    }

    #[test]
    fn upstream_errors_are_not_fatal() {
        assert!(!DataError::Network("reset".into()).is_fatal());
        assert!(!DataError::Parquet("bad footer".into()).is_fatal());
        assert!(!DataError::ResponseFormatChanged("x".into()).is_fatal());
    }
}
