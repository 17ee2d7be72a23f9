//! Update orchestrator: catalog → per pair (load → paginate → clean → merge).
//!
//! Pairs are processed one at a time. A fatal error (integrity violation,
//! storage failure) aborts the whole run; anything else is reported for the
//! pair and the run moves on. Re-running resumes every pair from its own
//! persisted cursor.

use super::catalog::Universe;
use super::clean::{clean, start_of_day, CleanOptions};
use super::paginate::gather_new_klines;
use super::provider::{DataError, KlineSource, UpdateProgress};
use super::store::{cursor_of, CandleStore, MergeOutcome};
use crate::config::UpdateConfig;
use crate::domain::TradingPair;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

/// Totals for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: usize,
    pub updated: usize,
    pub up_to_date: usize,
    pub failed: usize,
    pub new_candles: usize,
}

impl RunSummary {
    fn record(&mut self, result: &Result<MergeOutcome, DataError>) {
        self.processed += 1;
        match result {
            Ok(outcome) if outcome.added > 0 => {
                self.updated += 1;
                self.new_candles += outcome.added;
            }
            Ok(_) => self.up_to_date += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// Runs updates against one source and one store with a fixed config.
pub struct Updater<'a> {
    source: &'a dyn KlineSource,
    store: &'a CandleStore,
    config: &'a UpdateConfig,
    progress: &'a dyn UpdateProgress,
}

impl<'a> Updater<'a> {
    pub fn new(
        source: &'a dyn KlineSource,
        store: &'a CandleStore,
        config: &'a UpdateConfig,
        progress: &'a dyn UpdateProgress,
    ) -> Self {
        Self {
            source,
            store,
            config,
            progress,
        }
    }

    /// Update every catalog pair, or only `only` when it is non-empty.
    ///
    /// `now` fixes the trim boundary for the whole run.
    pub fn run(&self, only: &[TradingPair], now: DateTime<Utc>) -> Result<RunSummary, DataError> {
        let symbols = self
            .source
            .fetch_catalog()
            .map_err(|e| DataError::Catalog(e.to_string()))?;

        let mut universe = Universe::from_symbols(symbols, self.config.skip_delisted);
        if !only.is_empty() {
            for pair in universe.restrict(only) {
                warn!("{pair} is not listed by {}, skipping", self.source.name());
            }
        }
        universe.shuffle(self.config.shuffle_seed);
        self.progress
            .on_catalog(universe.listed(), universe.active(), universe.len());

        let trim_before = self.config.trim_current_day.then(|| start_of_day(now));
        let total = universe.len();
        let mut summary = RunSummary::default();

        for (index, pair) in universe.pairs().iter().enumerate() {
            let result = self.update_pair(pair, index, total, now, trim_before);
            self.progress.on_complete(pair, index, total, &result);
            summary.record(&result);

            if let Err(e) = result {
                if e.is_fatal() {
                    return Err(e);
                }
            }
        }

        self.progress.on_run_complete(&summary);
        Ok(summary)
    }

    /// Bring one pair's dataset up to date.
    pub fn update_pair(
        &self,
        pair: &TradingPair,
        index: usize,
        total: usize,
        now: DateTime<Utc>,
        trim_before: Option<DateTime<Utc>>,
    ) -> Result<MergeOutcome, DataError> {
        let interval = self.config.interval;
        self.store.ensure_interval(pair, interval)?;
        let existing = self.store.load(pair)?;
        let cursor = cursor_of(existing.as_deref());
        let last_known = existing
            .as_ref()
            .and_then(|candles| candles.last())
            .map(|c| c.open_time);
        self.progress.on_start(pair, index, total, last_known);

        let pages = gather_new_klines(
            self.source,
            &pair.symbol(),
            interval,
            self.config.page_limit,
            cursor,
            now,
            |page| self.progress.on_page(pair, index, total, page),
        );
        debug!(
            "{pair}: {} klines in {} requests, converged on {:?}",
            pages.fetched(),
            pages.requests,
            pages.reason
        );

        let cleaned = clean(
            pages.into_klines(),
            &CleanOptions {
                interval,
                trim_before,
            },
        )
        .map_err(|e| DataError::IntegrityViolation {
            pair: pair.to_string(),
            invariant: e.to_string(),
        })?;

        let report = &cleaned.report;
        if report.dropped() > 0 {
            debug!(
                "{pair}: dropped {} rows ({} duplicate, {} malformed, {} incomplete, {} current day)",
                report.dropped(),
                report.duplicates,
                report.malformed,
                report.incomplete,
                report.trimmed
            );
        }

        self.store
            .merge(pair, interval, existing, cleaned.candles, trim_before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(previous: usize, total: usize) -> MergeOutcome {
        MergeOutcome {
            previous,
            total,
            added: total.saturating_sub(previous),
            written: total != previous,
        }
    }

    #[test]
    fn summary_counts_each_result_kind() {
        let mut summary = RunSummary::default();
        summary.record(&Ok(outcome(10, 13)));
        summary.record(&Ok(outcome(5, 5)));
        summary.record(&Err(DataError::Network("HTTP 500".into())));
        summary.record(&Ok(outcome(0, 2)));

        assert_eq!(
            summary,
            RunSummary {
                processed: 4,
                updated: 2,
                up_to_date: 1,
                failed: 1,
                new_candles: 5,
            }
        );
    }
}
