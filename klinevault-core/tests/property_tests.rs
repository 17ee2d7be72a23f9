//! Property tests for the fetch-and-merge invariants.
//!
//! Uses proptest to verify:
//! 1. Convergence — pagination finishes within ceil(n / limit) + 1 requests
//! 2. Ordering — cleaned output has strictly increasing, unique open times
//! 3. Filtering — malformed or incomplete rows never survive cleaning
//! 4. Merge counts — N existing + M new with K overlap yields N + M - K

use chrono::{DateTime, Utc};
use klinevault_core::data::clean::{clean, CleanOptions};
use klinevault_core::data::paginate::gather_new_klines;
use klinevault_core::data::store::merge_candles;
use klinevault_core::data::{BatchRequest, DataError, KlineSource};
use klinevault_core::domain::{Candle, Interval, RawKline, SymbolInfo};
use proptest::prelude::*;
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

const M: i64 = 60_000;

fn kline(minute: i64) -> RawKline {
    let open_time = minute * M;
    RawKline {
        open_time,
        open: Some(1.0),
        high: Some(2.0),
        low: Some(0.5),
        close: Some(1.5),
        volume: Some(10.0),
        close_time: Some(open_time + M - 1),
        quote_asset_volume: Some(15.0),
        number_of_trades: Some(4),
        taker_buy_base_asset_volume: Some(5.0),
        taker_buy_quote_asset_volume: Some(7.5),
        ignore: None,
    }
}

fn candle(minute: i64) -> Candle {
    Candle {
        open_time: DateTime::from_timestamp_millis(minute * M).unwrap(),
        open: 1.0,
        high: 2.0,
        low: 0.5,
        close: 1.5,
        volume: 10.0,
        quote_asset_volume: 15.0,
        number_of_trades: 4,
        taker_buy_base_asset_volume: 5.0,
        taker_buy_quote_asset_volume: 7.5,
    }
}

/// Window server over a sorted history.
struct History {
    rows: Vec<RawKline>,
    requests: AtomicUsize,
}

impl KlineSource for History {
    fn name(&self) -> &str {
        "history"
    }

    fn fetch_batch(&self, request: &BatchRequest<'_>) -> Vec<RawKline> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.rows
            .iter()
            .filter(|k| k.open_time >= request.start_time)
            .take(request.limit as usize)
            .cloned()
            .collect()
    }

    fn fetch_catalog(&self) -> Result<Vec<SymbolInfo>, DataError> {
        Ok(Vec::new())
    }
}

// ── Strategies (proptest) ────────────────────────────────────────────

/// Row defect injected by [`arb_row`].
#[derive(Debug, Clone, Copy)]
enum Defect {
    None,
    PartialSpan,
    MissingField,
    NanField,
}

fn arb_defect() -> impl Strategy<Value = Defect> {
    prop_oneof![
        6 => Just(Defect::None),
        1 => Just(Defect::PartialSpan),
        1 => Just(Defect::MissingField),
        1 => Just(Defect::NanField),
    ]
}

fn arb_row() -> impl Strategy<Value = (i64, Defect)> {
    (1..200i64, arb_defect())
}

fn with_defect(minute: i64, defect: Defect) -> RawKline {
    let mut k = kline(minute);
    match defect {
        Defect::None => {}
        Defect::PartialSpan => k.close_time = Some(k.open_time + 1_000),
        Defect::MissingField => k.taker_buy_quote_asset_volume = None,
        Defect::NanField => k.high = Some(f64::NAN),
    }
    k
}

fn opts() -> CleanOptions {
    CleanOptions {
        interval: Interval::OneMinute,
        trim_before: None,
    }
}

// ── 1. Convergence ───────────────────────────────────────────────────

proptest! {
    #[test]
    fn pagination_converges_within_bound(n in 0..300i64, limit in 1..50u32) {
        let source = History {
            rows: (1..=n).map(kline).collect(),
            requests: AtomicUsize::new(0),
        };
        let result = gather_new_klines(&source, "X", Interval::OneMinute, limit, 0, Utc::now(), |_| {});

        let bound = (n as usize).div_ceil(limit as usize) + 1;
        prop_assert!(result.requests <= bound, "{} requests > bound {}", result.requests, bound);
        prop_assert_eq!(result.requests, source.requests.load(Ordering::SeqCst));
        prop_assert_eq!(result.fetched(), n as usize);
        prop_assert_eq!(result.cursor, n * M);
    }

    #[test]
    fn pagination_from_cursor_only_fetches_newer(n in 1..200i64, from in 0..200i64, limit in 1..50u32) {
        let source = History {
            rows: (1..=n).map(kline).collect(),
            requests: AtomicUsize::new(0),
        };
        let result = gather_new_klines(&source, "X", Interval::OneMinute, limit, from * M, Utc::now(), |_| {});
        let klines = result.into_klines();

        prop_assert_eq!(klines.len() as i64, (n - from).max(0));
        prop_assert!(klines.iter().all(|k| k.open_time > from * M));
    }
}

// ── 2 & 3. Cleaning ──────────────────────────────────────────────────

proptest! {
    #[test]
    fn cleaned_keys_strictly_increase(rows in prop::collection::vec(arb_row(), 0..150)) {
        let raw = rows.iter().map(|&(m, d)| with_defect(m, d)).collect();
        let cleaned = clean(raw, &opts()).unwrap();

        for pair in cleaned.candles.windows(2) {
            prop_assert!(pair[0].open_time < pair[1].open_time);
        }
        prop_assert!(cleaned.candles.iter().all(Candle::is_sane));
    }

    #[test]
    fn defective_rows_never_survive(rows in prop::collection::vec(arb_row(), 0..150)) {
        // First occurrence of each key decides its fate.
        let mut seen = HashSet::new();
        let expected: BTreeSet<i64> = rows
            .iter()
            .filter(|(m, _)| seen.insert(*m))
            .filter(|(_, d)| matches!(d, Defect::None))
            .map(|(m, _)| m * M)
            .collect();

        let raw = rows.iter().map(|&(m, d)| with_defect(m, d)).collect();
        let cleaned = clean(raw, &opts()).unwrap();
        let kept: BTreeSet<i64> = cleaned.candles.iter().map(Candle::open_time_ms).collect();

        prop_assert_eq!(kept, expected);
        prop_assert_eq!(cleaned.report.input, rows.len());
        prop_assert_eq!(cleaned.report.dropped(), rows.len() - cleaned.candles.len());
    }
}

// ── 4. Merge counts ──────────────────────────────────────────────────

proptest! {
    #[test]
    fn merge_yields_union_size(
        existing in prop::collection::btree_set(0..300i64, 0..120),
        new in prop::collection::btree_set(0..300i64, 0..120),
    ) {
        let overlap = existing.intersection(&new).count();
        let merged = merge_candles(
            existing.iter().copied().map(candle).collect(),
            new.iter().copied().map(candle).collect(),
            None,
        );

        prop_assert_eq!(merged.len(), existing.len() + new.len() - overlap);
        for pair in merged.windows(2) {
            prop_assert!(pair[0].open_time < pair[1].open_time);
        }
    }

    #[test]
    fn merge_respects_trim_boundary(
        keys in prop::collection::btree_set(0..300i64, 0..120),
        cutoff in 0..300i64,
    ) {
        let boundary = DateTime::from_timestamp_millis(cutoff * M).unwrap();
        let merged = merge_candles(
            Vec::new(),
            keys.iter().copied().map(candle).collect(),
            Some(boundary),
        );

        prop_assert!(merged.iter().all(|c| c.open_time < boundary));
        prop_assert_eq!(merged.len(), keys.iter().filter(|&&k| k < cutoff).count());
    }
}
