//! Symbol universe for one run, derived from the exchange catalog.
//!
//! The catalog is fetched once; the resulting pair list is a snapshot that
//! is filtered, optionally restricted to explicit pairs, and shuffled before
//! the per-pair updates start.

use crate::domain::{SymbolInfo, TradingPair};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeSet;

/// Pairs selected for a run, plus catalog counts for the summary line.
#[derive(Debug, Clone)]
pub struct Universe {
    listed: usize,
    active: usize,
    pairs: Vec<TradingPair>,
}

impl Universe {
    /// Build from catalog entries. Non-trading pairs are dropped when
    /// `skip_delisted` is set; duplicate entries collapse to one pair.
    pub fn from_symbols(symbols: Vec<SymbolInfo>, skip_delisted: bool) -> Self {
        let listed = symbols.len();
        let active = symbols.iter().filter(|s| s.status.is_trading()).count();

        let pairs: BTreeSet<TradingPair> = symbols
            .into_iter()
            .filter(|s| !skip_delisted || s.status.is_trading())
            .map(|s| s.pair())
            .collect();

        Self {
            listed,
            active,
            pairs: pairs.into_iter().collect(),
        }
    }

    /// Keep only the pairs in `wanted`. Returns the wanted pairs that are
    /// not in the universe.
    pub fn restrict(&mut self, wanted: &[TradingPair]) -> Vec<TradingPair> {
        let wanted: BTreeSet<&TradingPair> = wanted.iter().collect();
        self.pairs.retain(|p| wanted.contains(p));
        wanted
            .into_iter()
            .filter(|p| !self.pairs.contains(p))
            .cloned()
            .collect()
    }

    /// Randomize processing order. A seed makes the order reproducible.
    pub fn shuffle(&mut self, seed: Option<u64>) {
        match seed {
            Some(seed) => self.pairs.shuffle(&mut StdRng::seed_from_u64(seed)),
            None => self.pairs.shuffle(&mut rand::thread_rng()),
        }
    }

    /// Catalog entries before filtering.
    pub fn listed(&self) -> usize {
        self.listed
    }

    /// Catalog entries with `TRADING` status.
    pub fn active(&self) -> usize {
        self.active
    }

    pub fn pairs(&self) -> &[TradingPair] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}
