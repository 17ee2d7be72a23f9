//! Pagination driver: walks the upstream history forward from a cursor.
//!
//! State machine per symbol:
//!
//! - `Advancing { cursor }`: fetch a page starting at `cursor + 1`.
//!   - empty page → `Converged(EmptyBatch)` (caught up, window in the future,
//!     or the request degraded to "no data this round");
//!   - page max open time not beyond `cursor` → `Converged(NoNewData)`;
//!   - otherwise keep the page, move the cursor to its max open time.
//! - `Converged`: terminal; return every kept page.
//!
//! The cursor strictly increases on every step that continues, so the loop
//! never re-requests a window it has already satisfied and always terminates
//! on a finite history.

use super::provider::{BatchRequest, KlineSource};
use crate::domain::{Interval, RawKline};
use chrono::{DateTime, Utc};

/// Why the driver stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convergence {
    EmptyBatch,
    NoNewData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageState {
    Advancing { cursor: i64 },
    Converged(Convergence),
}

/// Observational progress after a page that advanced the cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct PageProgress {
    /// 1-based page number.
    pub page: usize,
    /// Earliest open time seen in the first kept page.
    pub first_open_time: DateTime<Utc>,
    /// Cursor after this page.
    pub through_open_time: DateTime<Utc>,
    /// Raw klines kept so far.
    pub fetched: usize,
    /// Rough upper bound of candles between `first_open_time` and now.
    pub estimated_total: i64,
}

/// Result of a converged pagination run.
#[derive(Debug, Clone)]
pub struct Pagination {
    pub batches: Vec<Vec<RawKline>>,
    /// Cursor at convergence; equals the start cursor when nothing was new.
    pub cursor: i64,
    /// Number of page requests issued, including the final one.
    pub requests: usize,
    pub reason: Convergence,
}

impl Pagination {
    /// Total raw klines across all kept pages.
    pub fn fetched(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }

    /// Concatenate all kept pages in fetch order.
    pub fn into_klines(self) -> Vec<RawKline> {
        self.batches.into_iter().flatten().collect()
    }
}

/// Decide the next state from the current cursor and a freshly fetched page.
fn advance(cursor: i64, batch: &[RawKline]) -> PageState {
    match batch.iter().map(|k| k.open_time).max() {
        None => PageState::Converged(Convergence::EmptyBatch),
        Some(max) if max <= cursor => PageState::Converged(Convergence::NoNewData),
        Some(max) => PageState::Advancing { cursor: max },
    }
}

/// Fetch every page newer than `cursor` for one symbol.
///
/// `now` only feeds the progress estimate; `on_page` is called after each
/// page that advanced the cursor and has no influence on control flow.
pub fn gather_new_klines(
    source: &dyn KlineSource,
    symbol: &str,
    interval: Interval,
    limit: u32,
    cursor: i64,
    now: DateTime<Utc>,
    mut on_page: impl FnMut(&PageProgress),
) -> Pagination {
    let mut state = PageState::Advancing { cursor };
    let mut batches: Vec<Vec<RawKline>> = Vec::new();
    let mut requests = 0usize;
    let mut last_cursor = cursor;
    let mut first_open_time: Option<i64> = None;
    let mut fetched = 0usize;

    let reason = loop {
        let cursor = match state {
            PageState::Advancing { cursor } => cursor,
            PageState::Converged(reason) => break reason,
        };

        let Some(start_time) = cursor.checked_add(1) else {
            break Convergence::NoNewData;
        };
        let batch = source.fetch_batch(&BatchRequest {
            symbol,
            interval,
            start_time,
            limit,
        });
        requests += 1;

        state = advance(cursor, &batch);
        if let PageState::Advancing { cursor: next } = state {
            let first = *first_open_time
                .get_or_insert_with(|| batch.iter().map(|k| k.open_time).min().unwrap_or(next));
            fetched += batch.len();
            batches.push(batch);
            last_cursor = next;

            on_page(&PageProgress {
                page: batches.len(),
                first_open_time: to_utc(first),
                through_open_time: to_utc(next),
                fetched,
                estimated_total: now.timestamp_millis().saturating_sub(first).max(0)
                    / interval.duration_ms(),
            });
        }
    };

    Pagination {
        batches,
        cursor: last_cursor,
        requests,
        reason,
    }
}

fn to_utc(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
