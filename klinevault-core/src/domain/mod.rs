//! Domain types: candles, intervals, trading pairs.

pub mod candle;
pub mod interval;
pub mod pair;

pub use candle::{Candle, RawKline};
pub use interval::{Interval, InvalidInterval};
pub use pair::{InvalidPair, SymbolInfo, SymbolStatus, TradingPair};
