//! Parquet store and merge engine.
//!
//! Layout: `{data_dir}/{BASE}-{QUOTE}.parquet` plus a
//! `{BASE}-{QUOTE}.meta.json` sidecar.
//!
//! Features:
//! - Read-modify-write merge: the whole dataset is loaded, combined with the
//!   new candles, and rewritten. Datasets must fit in memory.
//! - Atomic writes (write to .tmp, rename into place)
//! - Integrity validation on load (schema, nulls, key order)
//! - Quarantine for corrupt files ({filename}.quarantined), treated as absent
//! - Metadata sidecar per pair (interval, hash, time range, count)
//!
//! A dataset holds a single interval. The sidecar records it and runs with a
//! different interval are refused.

use super::clean::{assert_integrity, trim};
use super::provider::DataError;
use crate::domain::{Candle, Interval, TradingPair};
use chrono::{DateTime, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const COLUMNS: [&str; 10] = [
    "open_time",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "quote_asset_volume",
    "number_of_trades",
    "taker_buy_base_asset_volume",
    "taker_buy_quote_asset_volume",
];

/// Metadata sidecar for a stored dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMeta {
    pub pair: String,
    pub interval: Interval,
    pub first_open_time: DateTime<Utc>,
    pub last_open_time: DateTime<Utc>,
    pub candle_count: usize,
    pub data_hash: String,
    pub updated_at: DateTime<Utc>,
}

/// Counts reported after a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Candles stored before the merge.
    pub previous: usize,
    /// Candles stored after the merge.
    pub total: usize,
    /// `total - previous`, floored at zero.
    pub added: usize,
    /// Whether the dataset file was rewritten.
    pub written: bool,
}

/// Stored dataset summary for status reporting.
#[derive(Debug, Clone)]
pub struct DatasetStatus {
    pub name: String,
    pub meta: Option<DatasetMeta>,
    pub size_bytes: u64,
}

/// Cursor derived from a loaded dataset: its max open time, or 0 if absent.
pub fn cursor_of(existing: Option<&[Candle]>) -> i64 {
    existing
        .and_then(|candles| candles.last())
        .map(Candle::open_time_ms)
        .unwrap_or(0)
}

/// Union of `existing` and `new`, existing rows winning on key collisions,
/// sorted ascending and trimmed at `trim_before`.
pub fn merge_candles(
    existing: Vec<Candle>,
    new: Vec<Candle>,
    trim_before: Option<DateTime<Utc>>,
) -> Vec<Candle> {
    let mut seen = HashSet::with_capacity(existing.len() + new.len());
    let mut merged: Vec<Candle> = existing
        .into_iter()
        .chain(new)
        .filter(|c| seen.insert(c.open_time))
        .collect();
    merged.sort_by_key(|c| c.open_time);
    if let Some(cutoff) = trim_before {
        trim(&mut merged, cutoff);
    }
    merged
}

/// The Parquet candle store.
pub struct CandleStore {
    data_dir: PathBuf,
}

impl CandleStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Root directory of the store.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Path to the Parquet file for a pair: `{data_dir}/{BASE}-{QUOTE}.parquet`
    pub fn dataset_path(&self, pair: &TradingPair) -> PathBuf {
        self.data_dir.join(format!("{}.parquet", pair.file_stem()))
    }

    /// Path to the metadata sidecar for a pair.
    fn meta_path(&self, pair: &TradingPair) -> PathBuf {
        self.data_dir.join(format!("{}.meta.json", pair.file_stem()))
    }

    /// Fail if the stored dataset for `pair` was built with another interval.
    ///
    /// Without a sidecar the interval is unknown and the check passes.
    pub fn ensure_interval(&self, pair: &TradingPair, interval: Interval) -> Result<(), DataError> {
        if !self.dataset_path(pair).exists() {
            return Ok(());
        }
        match self.get_meta(pair) {
            Some(meta) if meta.interval != interval => Err(DataError::IntervalMismatch {
                pair: pair.to_string(),
                stored: meta.interval,
                requested: interval,
            }),
            Some(_) => Ok(()),
            None => {
                warn!("{pair}: no metadata sidecar, cannot verify stored interval");
                Ok(())
            }
        }
    }

    /// Load the persisted dataset for a pair.
    ///
    /// `Ok(None)` if nothing is stored yet. A file that fails validation is
    /// quarantined and also reported as `Ok(None)`, so the next fetch starts
    /// from the beginning of history. A file that cannot be opened is a
    /// store error and stays in place.
    pub fn load(&self, pair: &TradingPair) -> Result<Option<Vec<Candle>>, DataError> {
        let path = self.dataset_path(pair);
        if !path.exists() {
            return Ok(None);
        }

        match load_and_validate_parquet(&path) {
            Ok(candles) => Ok(Some(candles)),
            Err(e @ DataError::Store(_)) => Err(e),
            Err(e) => {
                let quarantine = path.with_extension("parquet.quarantined");
                warn!(
                    "quarantining corrupt dataset {}: {e}",
                    path.display()
                );
                fs::rename(&path, &quarantine)
                    .map_err(|e| DataError::Store(format!("quarantine {}: {e}", path.display())))?;
                Ok(None)
            }
        }
    }

    /// Merge canonical new candles into the stored dataset and persist it.
    ///
    /// `existing` is what [`CandleStore::load`] returned at the start of this
    /// pair's run. Nothing is written when the dataset would be unchanged, or
    /// when there is neither prior data nor anything new. A dataset the trim
    /// empties entirely is removed.
    pub fn merge(
        &self,
        pair: &TradingPair,
        interval: Interval,
        existing: Option<Vec<Candle>>,
        new: Vec<Candle>,
        trim_before: Option<DateTime<Utc>>,
    ) -> Result<MergeOutcome, DataError> {
        let previous = existing.as_ref().map_or(0, Vec::len);
        let had_file = existing.is_some();
        let known: HashSet<DateTime<Utc>> = existing
            .iter()
            .flatten()
            .map(|c| c.open_time)
            .collect();

        let merged = merge_candles(existing.unwrap_or_default(), new, trim_before);
        assert_integrity(&merged).map_err(|e| DataError::IntegrityViolation {
            pair: pair.to_string(),
            invariant: e.to_string(),
        })?;

        let total = merged.len();
        let fresh = merged.iter().filter(|c| !known.contains(&c.open_time)).count();
        let changed = fresh > 0 || total != previous;

        let written = if !changed {
            false
        } else if merged.is_empty() {
            if had_file {
                warn!("{pair}: every stored candle is past the trim boundary, removing dataset");
                self.remove(pair)?;
            }
            had_file
        } else {
            self.write(pair, interval, &merged)?;
            true
        };

        debug!("{pair}: merged {previous} + {fresh} fresh -> {total} candles (written: {written})");

        Ok(MergeOutcome {
            previous,
            total,
            added: total.saturating_sub(previous),
            written,
        })
    }

    /// Write a full dataset for a pair, replacing any existing file.
    pub fn write(
        &self,
        pair: &TradingPair,
        interval: Interval,
        candles: &[Candle],
    ) -> Result<(), DataError> {
        let (Some(first), Some(last)) = (candles.first(), candles.last()) else {
            return Err(DataError::Store("no candles to write".into()));
        };

        fs::create_dir_all(&self.data_dir)
            .map_err(|e| DataError::Store(format!("failed to create dir: {e}")))?;

        let df = candles_to_dataframe(candles)?;
        let path = self.dataset_path(pair);
        let tmp_path = path.with_extension("parquet.tmp");

        write_parquet(&df, &tmp_path)?;

        // Atomic rename
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            DataError::Store(format!("atomic rename failed: {e}"))
        })?;

        let meta = DatasetMeta {
            pair: pair.to_string(),
            interval,
            first_open_time: first.open_time,
            last_open_time: last.open_time,
            candle_count: candles.len(),
            data_hash: content_hash(candles),
            updated_at: Utc::now(),
        };
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| DataError::Store(format!("meta serialization: {e}")))?;
        let meta_path = self.meta_path(pair);
        let meta_tmp = meta_path.with_extension("json.tmp");
        fs::write(&meta_tmp, meta_json)
            .and_then(|()| fs::rename(&meta_tmp, &meta_path))
            .map_err(|e| DataError::Store(format!("meta write: {e}")))?;

        Ok(())
    }

    /// Delete the dataset and its sidecar.
    pub fn remove(&self, pair: &TradingPair) -> Result<(), DataError> {
        for path in [self.dataset_path(pair), self.meta_path(pair)] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(DataError::Store(format!("remove {}: {e}", path.display())));
                }
            }
        }
        Ok(())
    }

    /// Read the metadata sidecar for a pair, if present and parseable.
    pub fn get_meta(&self, pair: &TradingPair) -> Option<DatasetMeta> {
        let content = fs::read_to_string(self.meta_path(pair)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Every dataset file in the store, sorted by name.
    pub fn list(&self) -> Result<Vec<DatasetStatus>, DataError> {
        if !self.data_dir.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.data_dir)
            .map_err(|e| DataError::Store(format!("read dir: {e}")))?;

        let mut datasets = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| DataError::Store(format!("dir entry: {e}")))?;
            let path = entry.path();

            // Skip meta.json, .tmp and .quarantined files
            if path.extension().and_then(|e| e.to_str()) != Some("parquet") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            let meta = name
                .parse::<TradingPair>()
                .ok()
                .and_then(|pair| self.get_meta(&pair));
            let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);

            datasets.push(DatasetStatus {
                name: name.to_string(),
                meta,
                size_bytes,
            });
        }

        datasets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(datasets)
    }
}

/// BLAKE3 over the little-endian bytes of every field, in key order.
fn content_hash(candles: &[Candle]) -> String {
    let mut hasher = blake3::Hasher::new();
    for c in candles {
        hasher.update(&c.open_time_ms().to_le_bytes());
        for v in [
            c.open,
            c.high,
            c.low,
            c.close,
            c.volume,
            c.quote_asset_volume,
            c.taker_buy_base_asset_volume,
            c.taker_buy_quote_asset_volume,
        ] {
            hasher.update(&v.to_le_bytes());
        }
        hasher.update(&c.number_of_trades.to_le_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

/// Convert candles to a Polars DataFrame keyed by a millisecond datetime.
fn candles_to_dataframe(candles: &[Candle]) -> Result<DataFrame, DataError> {
    let open_times: Vec<i64> = candles.iter().map(Candle::open_time_ms).collect();
    let float_col = |name: &str, f: fn(&Candle) -> f64| {
        Column::new(name.into(), candles.iter().map(f).collect::<Vec<f64>>())
    };
    let trades: Vec<u64> = candles.iter().map(|c| c.number_of_trades).collect();

    DataFrame::new(vec![
        Column::new("open_time".into(), open_times)
            .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))
            .map_err(|e| DataError::Parquet(format!("open_time cast: {e}")))?,
        float_col("open", |c| c.open),
        float_col("high", |c| c.high),
        float_col("low", |c| c.low),
        float_col("close", |c| c.close),
        float_col("volume", |c| c.volume),
        float_col("quote_asset_volume", |c| c.quote_asset_volume),
        Column::new("number_of_trades".into(), trades),
        float_col("taker_buy_base_asset_volume", |c| c.taker_buy_base_asset_volume),
        float_col("taker_buy_quote_asset_volume", |c| c.taker_buy_quote_asset_volume),
    ])
    .map_err(|e| DataError::Parquet(format!("dataframe creation: {e}")))
}

/// Write a DataFrame to a Parquet file.
fn write_parquet(df: &DataFrame, path: &Path) -> Result<(), DataError> {
    let file =
        fs::File::create(path).map_err(|e| DataError::Store(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(&mut df.clone())
        .map_err(|e| DataError::Store(format!("write parquet: {e}")))?;
    Ok(())
}

/// Load a Parquet file and validate its integrity.
fn load_and_validate_parquet(path: &Path) -> Result<Vec<Candle>, DataError> {
    let file = fs::File::open(path)
        .map_err(|e| DataError::Store(format!("open {}: {e}", path.display())))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| DataError::Parquet(format!("read: {e}")))?;

    for col_name in &COLUMNS {
        if df.column(col_name).is_err() {
            return Err(DataError::Validation(format!(
                "missing column '{col_name}'"
            )));
        }
    }

    let candles = dataframe_to_candles(&df)?;
    assert_integrity(&candles).map_err(|e| DataError::Validation(e.to_string()))?;
    Ok(candles)
}

/// Convert a DataFrame back to candles. Any null cell is a validation error.
fn dataframe_to_candles(df: &DataFrame) -> Result<Vec<Candle>, DataError> {
    let map_err = |e: PolarsError| DataError::Parquet(format!("column read: {e}"));

    let open_time = df
        .column("open_time")
        .map_err(map_err)?
        .cast(&DataType::Int64)
        .map_err(|e| DataError::Parquet(format!("open_time column type: {e}")))?;
    let open_time_ca = open_time
        .i64()
        .map_err(|e| DataError::Parquet(format!("open_time column type: {e}")))?;

    let float = |name: &str| -> Result<Float64Chunked, DataError> {
        df.column(name)
            .map_err(map_err)?
            .f64()
            .cloned()
            .map_err(|e| DataError::Parquet(format!("{name} column type: {e}")))
    };
    let open_ca = float("open")?;
    let high_ca = float("high")?;
    let low_ca = float("low")?;
    let close_ca = float("close")?;
    let volume_ca = float("volume")?;
    let quote_ca = float("quote_asset_volume")?;
    let base_buy_ca = float("taker_buy_base_asset_volume")?;
    let quote_buy_ca = float("taker_buy_quote_asset_volume")?;
    let trades_ca = df
        .column("number_of_trades")
        .map_err(map_err)?
        .u64()
        .map_err(|e| DataError::Parquet(format!("number_of_trades column type: {e}")))?;

    let null_at = |col: &str, i: usize| DataError::Validation(format!("null {col} at row {i}"));

    let n = df.height();
    let mut candles = Vec::with_capacity(n);
    for i in 0..n {
        let ms = open_time_ca.get(i).ok_or_else(|| null_at("open_time", i))?;
        candles.push(Candle {
            open_time: DateTime::from_timestamp_millis(ms)
                .ok_or_else(|| DataError::Validation(format!("open_time {ms} out of range")))?,
            open: open_ca.get(i).ok_or_else(|| null_at("open", i))?,
            high: high_ca.get(i).ok_or_else(|| null_at("high", i))?,
            low: low_ca.get(i).ok_or_else(|| null_at("low", i))?,
            close: close_ca.get(i).ok_or_else(|| null_at("close", i))?,
            volume: volume_ca.get(i).ok_or_else(|| null_at("volume", i))?,
            quote_asset_volume: quote_ca.get(i).ok_or_else(|| null_at("quote_asset_volume", i))?,
            number_of_trades: trades_ca.get(i).ok_or_else(|| null_at("number_of_trades", i))?,
            taker_buy_base_asset_volume: base_buy_ca
                .get(i)
                .ok_or_else(|| null_at("taker_buy_base_asset_volume", i))?,
            taker_buy_quote_asset_volume: quote_buy_ca
                .get(i)
                .ok_or_else(|| null_at("taker_buy_quote_asset_volume", i))?,
        });
    }

    Ok(candles)
}
