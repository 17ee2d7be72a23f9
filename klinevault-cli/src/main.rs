//! KlineVault CLI — keep local kline datasets in sync with the exchange.
//!
//! Commands:
//! - `update` — fetch every new closed candle for the catalog (or given pairs)
//! - `status` — report stored datasets, ranges, counts and sizes
//! - `init-config` — write the default TOML config

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use klinevault_core::config::UpdateConfig;
use klinevault_core::data::{BinanceClient, CandleStore, LogProgress, Updater};
use klinevault_core::domain::{Interval, TradingPair};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "klinevault",
    version,
    about = "KlineVault CLI — incremental kline fetcher and Parquet store"
)]
struct Cli {
    /// Log at debug level (overrides RUST_LOG).
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring every dataset up to date with the exchange.
    Update(UpdateArgs),
    /// Report stored datasets from their metadata sidecars.
    Status {
        /// Path to a TOML config file; its `data_dir` is used.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Data directory. Overrides the config file; defaults to ./data.
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Write the default configuration as TOML.
    InitConfig {
        /// Output path.
        #[arg(long, default_value = "klinevault.toml")]
        path: PathBuf,

        /// Overwrite an existing file.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
}

#[derive(Args)]
struct UpdateArgs {
    /// Path to a TOML config file. Defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Only update these pairs (BASE-QUOTE, e.g. BTC-USDT). Repeatable.
    #[arg(long = "pair")]
    pairs: Vec<TradingPair>,

    /// Candle interval (1m, 5m, 1h, 1d, ...).
    #[arg(long)]
    interval: Option<Interval>,

    /// Page size per request (1-1000).
    #[arg(long)]
    limit: Option<u32>,

    /// Skip pairs that are not currently trading.
    #[arg(long, default_value_t = false)]
    skip_delisted: bool,

    /// Keep candles from the current UTC day.
    #[arg(long, default_value_t = false)]
    no_trim: bool,

    /// Cooldown after a transient network failure, in seconds.
    #[arg(long)]
    cooldown_secs: Option<u64>,

    /// Seed for the pair processing order.
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Update(args) => run_update(args),
        Commands::Status { config, data_dir } => {
            run_status(&status_data_dir(config.as_deref(), data_dir)?)
        }
        Commands::InitConfig { path, force } => run_init_config(&path, force),
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// File (or defaults), then flag overrides, then validation.
fn build_config(args: &UpdateArgs) -> Result<UpdateConfig> {
    let mut config = match &args.config {
        Some(path) => UpdateConfig::from_file(path)?,
        None => UpdateConfig::default(),
    };

    if let Some(dir) = &args.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(interval) = args.interval {
        config.interval = interval;
    }
    if let Some(limit) = args.limit {
        config.page_limit = limit;
    }
    if args.skip_delisted {
        config.skip_delisted = true;
    }
    if args.no_trim {
        config.trim_current_day = false;
    }
    if let Some(secs) = args.cooldown_secs {
        config.cooldown_secs = secs;
    }
    if args.seed.is_some() {
        config.shuffle_seed = args.seed;
    }

    config.validate()?;
    Ok(config)
}

/// `--data-dir`, else the config file's `data_dir`, else the default.
fn status_data_dir(config: Option<&Path>, data_dir: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = data_dir {
        return Ok(dir);
    }
    let config = match config {
        Some(path) => UpdateConfig::from_file(path)?,
        None => UpdateConfig::default(),
    };
    Ok(config.data_dir)
}

fn run_update(args: UpdateArgs) -> Result<()> {
    let config = build_config(&args)?;
    info!(
        "Updating {} candles into {} (page size {}, trim current day: {})",
        config.interval,
        config.data_dir.display(),
        config.page_limit,
        config.trim_current_day
    );

    let store = CandleStore::new(&config.data_dir);
    let client = BinanceClient::new(&config)?;
    let progress = LogProgress;
    let updater = Updater::new(&client, &store, &config, &progress);

    let summary = updater
        .run(&args.pairs, Utc::now())
        .context("update aborted")?;

    if summary.failed > 0 {
        warn!("{} pairs failed and will be retried on the next run", summary.failed);
    }
    Ok(())
}

fn run_status(data_dir: &Path) -> Result<()> {
    if !data_dir.exists() {
        println!("Data directory does not exist: {}", data_dir.display());
        return Ok(());
    }

    let store = CandleStore::new(data_dir);
    let datasets = store.list()?;

    println!("Data directory: {}", data_dir.display());
    println!();
    println!(
        "{:<16} {:<8} {:<42} {:>12} {:>10}",
        "Pair", "Interval", "Range", "Candles", "Size"
    );
    println!("{}", "-".repeat(92));

    let mut total_size = 0u64;
    let mut total_candles = 0usize;
    for dataset in &datasets {
        total_size += dataset.size_bytes;
        let (interval, range, count) = match &dataset.meta {
            Some(meta) => {
                total_candles += meta.candle_count;
                (
                    meta.interval.to_string(),
                    format!(
                        "{} to {}",
                        meta.first_open_time.format("%Y-%m-%d %H:%M"),
                        meta.last_open_time.format("%Y-%m-%d %H:%M")
                    ),
                    meta.candle_count.to_string(),
                )
            }
            None => ("?".into(), "(no meta)".into(), "?".into()),
        };
        println!(
            "{:<16} {:<8} {:<42} {:>12} {:>10}",
            dataset.name,
            interval,
            range,
            count,
            format_size(dataset.size_bytes)
        );
    }

    println!();
    println!(
        "Total: {} datasets, {} candles, {}",
        datasets.len(),
        total_candles,
        format_size(total_size)
    );
    Ok(())
}

fn run_init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let toml = UpdateConfig::default().to_toml()?;
    std::fs::write(path, toml).with_context(|| format!("write {}", path.display()))?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn update_flags_override_defaults() {
        let cli = parse(&[
            "klinevault",
            "update",
            "--pair",
            "btc-usdt",
            "--pair",
            "ETH-BTC",
            "--interval",
            "1h",
            "--limit",
            "500",
            "--no-trim",
            "--seed",
            "9",
        ]);
        let Commands::Update(args) = cli.command else {
            panic!("expected update");
        };
        assert_eq!(
            args.pairs,
            vec![TradingPair::new("BTC", "USDT"), TradingPair::new("ETH", "BTC")]
        );

        let config = build_config(&args).unwrap();
        assert_eq!(config.interval, Interval::OneHour);
        assert_eq!(config.page_limit, 500);
        assert!(!config.trim_current_day);
        assert_eq!(config.shuffle_seed, Some(9));
    }

    #[test]
    fn invalid_limit_is_rejected() {
        let cli = parse(&["klinevault", "update", "--limit", "5000"]);
        let Commands::Update(args) = cli.command else {
            panic!("expected update");
        };
        assert!(build_config(&args).is_err());
    }

    #[test]
    fn bad_pair_fails_to_parse() {
        assert!(Cli::try_parse_from(["klinevault", "update", "--pair", "BTCUSDT"]).is_err());
    }

    #[test]
    fn monthly_interval_fails_to_parse() {
        assert!(Cli::try_parse_from(["klinevault", "update", "--interval", "1M"]).is_err());
    }

    #[test]
    fn status_reads_data_dir_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("klinevault.toml");
        std::fs::write(&path, "data_dir = \"/srv/klines\"\n").unwrap();

        let cli = parse(&["klinevault", "status", "--config", path.to_str().unwrap()]);
        let Commands::Status { config, data_dir } = cli.command else {
            panic!("expected status");
        };
        assert_eq!(
            status_data_dir(config.as_deref(), data_dir).unwrap(),
            PathBuf::from("/srv/klines")
        );
    }

    #[test]
    fn status_data_dir_flag_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("klinevault.toml");
        std::fs::write(&path, "data_dir = \"/srv/klines\"\n").unwrap();

        assert_eq!(
            status_data_dir(Some(&path), Some(PathBuf::from("elsewhere"))).unwrap(),
            PathBuf::from("elsewhere")
        );
        assert_eq!(status_data_dir(None, None).unwrap(), PathBuf::from("data"));
    }

    #[test]
    fn format_size_units() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }
}
