//! Trading pairs and exchange catalog entries.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A (base asset, quote asset) pair, e.g. BTC / USDT.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TradingPair {
    pub base: String,
    pub quote: String,
}

#[derive(Debug, Error, PartialEq)]
#[error("invalid pair '{0}': expected BASE-QUOTE, e.g. BTC-USDT")]
pub struct InvalidPair(pub String);

impl TradingPair {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            quote: quote.into(),
        }
    }

    /// Exchange symbol used in API requests: `BTCUSDT`.
    pub fn symbol(&self) -> String {
        format!("{}{}", self.base, self.quote)
    }

    /// Name used for on-disk files: `BTC-USDT`.
    pub fn file_stem(&self) -> String {
        format!("{}-{}", self.base, self.quote)
    }
}

impl fmt::Display for TradingPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.base, self.quote)
    }
}

impl FromStr for TradingPair {
    type Err = InvalidPair;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, quote) = s.split_once('-').ok_or_else(|| InvalidPair(s.to_string()))?;
        let valid = |part: &str| !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric());
        if !valid(base) || !valid(quote) {
            return Err(InvalidPair(s.to_string()));
        }
        Ok(Self::new(base.to_uppercase(), quote.to_uppercase()))
    }
}

/// Trading status reported by the exchange catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SymbolStatus {
    PreTrading,
    Trading,
    PostTrading,
    EndOfDay,
    Halt,
    AuctionMatch,
    Break,
    #[serde(other)]
    Unknown,
}

impl SymbolStatus {
    pub fn is_trading(&self) -> bool {
        matches!(self, SymbolStatus::Trading)
    }
}

/// One entry of the exchange's symbol catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub status: SymbolStatus,
}

impl SymbolInfo {
    pub fn pair(&self) -> TradingPair {
        TradingPair::new(&self.base_asset, &self.quote_asset)
    }
}
