//! Binance spot REST source.
//!
//! Fetches kline pages from `/klines` and the symbol catalog from
//! `/exchangeInfo`. Transient transport failures are absorbed by the
//! [`Cooldown`] loop; a non-success status or an undecodable body degrades to
//! an empty batch so one bad request cannot spin forever.

use super::cooldown::{Attempt, Cooldown};
use super::provider::{BatchRequest, DataError, KlineSource};
use crate::config::UpdateConfig;
use crate::domain::{RawKline, SymbolInfo};
use serde::Deserialize;
use serde_json::Value;
use std::io::ErrorKind;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

/// Binance spot REST client.
pub struct BinanceClient {
    client: reqwest::blocking::Client,
    api_base: String,
    cooldown: Cooldown,
}

impl BinanceClient {
    pub fn new(config: &UpdateConfig) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("klinevault/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DataError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_base: config.api_base_trimmed().to_string(),
            cooldown: Cooldown::new(config.cooldown()),
        })
    }

    fn klines_url(&self, request: &BatchRequest<'_>) -> String {
        format!(
            "{}/klines?symbol={}&interval={}&startTime={}&limit={}",
            self.api_base, request.symbol, request.interval, request.start_time, request.limit
        )
    }

    fn exchange_info_url(&self) -> String {
        format!("{}/exchangeInfo", self.api_base)
    }

    /// One GET; classifies the outcome for the cooldown loop.
    fn get_body(&self, url: &str) -> Attempt<Result<String, DataError>> {
        let resp = match self.client.get(url).send() {
            Ok(resp) => resp,
            Err(e) if is_transient(&e) => return Attempt::Transient(e.to_string()),
            Err(e) => return Attempt::Done(Err(DataError::Network(e.to_string()))),
        };

        let status = resp.status();
        if !status.is_success() {
            return Attempt::Done(Err(DataError::Network(format!("HTTP {status}"))));
        }

        match resp.text() {
            Ok(body) => Attempt::Done(Ok(body)),
            Err(e) if is_transient(&e) => Attempt::Transient(e.to_string()),
            Err(e) => Attempt::Done(Err(DataError::Network(format!("read body: {e}")))),
        }
    }
}

impl KlineSource for BinanceClient {
    fn name(&self) -> &str {
        "binance_spot"
    }

    fn fetch_batch(&self, request: &BatchRequest<'_>) -> Vec<RawKline> {
        let url = self.klines_url(request);
        debug!("GET {url}");

        let what = format!("klines {} from {}", request.symbol, request.start_time);
        let (body, _) = self.cooldown.run(&what, || self.get_body(&url));

        let parsed = body.and_then(|b| parse_klines(&b));
        match parsed {
            Ok(klines) => klines,
            Err(e) => {
                warn!("Got erroneous response back for {}: {e}", request.symbol);
                Vec::new()
            }
        }
    }

    fn fetch_catalog(&self) -> Result<Vec<SymbolInfo>, DataError> {
        let url = self.exchange_info_url();
        let (body, _) = self.cooldown.run("exchange info", || self.get_body(&url));
        parse_exchange_info(&body?)
    }
}

/// Connection refused, timeout, or a connection dropped mid-flight.
fn is_transient(err: &reqwest::Error) -> bool {
    if err.is_connect() || err.is_timeout() {
        return true;
    }
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        if let Some(io) = inner.downcast_ref::<std::io::Error>() {
            if matches!(
                io.kind(),
                ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
                    | ErrorKind::UnexpectedEof
                    | ErrorKind::TimedOut
            ) {
                return true;
            }
        }
        source = inner.source();
    }
    false
}

/// Parse a `/klines` response body.
///
/// Rows are positional arrays; numeric fields arrive either as JSON numbers
/// or as decimal strings. Rows without a usable open time are skipped since
/// they cannot be keyed; every other unusable field becomes `None` and is
/// left for the cleaning pipeline to drop.
pub fn parse_klines(body: &str) -> Result<Vec<RawKline>, DataError> {
    let rows: Vec<Vec<Value>> = serde_json::from_str(body)
        .map_err(|e| DataError::ResponseFormatChanged(format!("klines body: {e}")))?;

    let mut klines = Vec::with_capacity(rows.len());
    for row in &rows {
        let Some(open_time) = int_field(row.get(0)) else {
            continue;
        };
        klines.push(RawKline {
            open_time,
            open: float_field(row.get(1)),
            high: float_field(row.get(2)),
            low: float_field(row.get(3)),
            close: float_field(row.get(4)),
            volume: float_field(row.get(5)),
            close_time: int_field(row.get(6)),
            quote_asset_volume: float_field(row.get(7)),
            number_of_trades: int_field(row.get(8)).and_then(|n| u64::try_from(n).ok()),
            taker_buy_base_asset_volume: float_field(row.get(9)),
            taker_buy_quote_asset_volume: float_field(row.get(10)),
            ignore: row.get(11).and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            }),
        });
    }
    Ok(klines)
}

/// Parse an `/exchangeInfo` response body.
pub fn parse_exchange_info(body: &str) -> Result<Vec<SymbolInfo>, DataError> {
    let info: ExchangeInfo = serde_json::from_str(body)
        .map_err(|e| DataError::ResponseFormatChanged(format!("exchange info body: {e}")))?;
    Ok(info.symbols)
}

fn float_field(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn int_field(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
