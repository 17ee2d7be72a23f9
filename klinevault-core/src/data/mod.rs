//! Data pipeline: upstream source, pagination, cleaning, storage, orchestration.

pub mod binance;
pub mod catalog;
pub mod clean;
pub mod cooldown;
pub mod paginate;
pub mod provider;
pub mod store;
pub mod update;

pub use binance::BinanceClient;
pub use catalog::Universe;
pub use clean::{clean, CleanOptions, CleanReport, Cleaned, IntegrityError};
pub use cooldown::{Attempt, Cooldown};
pub use paginate::{gather_new_klines, Convergence, PageProgress, Pagination};
pub use provider::{
    BatchRequest, DataError, KlineSource, LogProgress, SilentProgress, UpdateProgress,
};
pub use store::{CandleStore, DatasetMeta, DatasetStatus, MergeOutcome};
pub use update::{RunSummary, Updater};
