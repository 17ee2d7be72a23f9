//! KlineVault Core — incremental OHLCV kline fetching and merging.
//!
//! This crate keeps one local Parquet dataset per trading pair in sync with
//! the exchange:
//! - Domain types (raw klines, canonical candles, intervals, pairs)
//! - Batch fetcher with cooldown-and-retry on transient failures
//! - Cursor-driven pagination until convergence
//! - Cleaning pipeline (dedup, malformed-span filter, normalize, trim)
//! - Parquet store with read-modify-write merge and atomic writes
//! - Catalog-driven update runs

pub mod config;
pub mod data;
pub mod domain;
