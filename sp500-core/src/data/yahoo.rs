//! Yahoo Finance market-data provider.
//!
//! Fetches the daily chart for one symbol from Yahoo's v8 chart API and keeps
//! the most recent complete bar. One request per symbol, bounded by the client
//! timeout; there is no retry loop here, a failed symbol is simply dropped by
//! the fetch stage.

use super::circuit_breaker::CircuitBreaker;
use super::provider::{MarketDataProvider, SymbolFetchError};
use crate::domain::RawPriceRecord;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_CHART_BASE_URL: &str = "https://query2.finance.yahoo.com/v8/finance/chart";

/// Yahoo Finance v8 chart API response.
#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
    adjclose: Option<Vec<AdjCloseData>>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<u64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseData {
    adjclose: Vec<Option<f64>>,
}

/// Request settings for [`YahooProvider`].
#[derive(Debug, Clone)]
pub struct YahooOptions {
    pub base_url: String,
    /// Chart range, e.g. `"1d"` or `"5d"`. The latest complete bar inside the
    /// range is kept, so a few days of slack covers weekends and holidays.
    pub range: String,
    pub timeout: Duration,
}

impl Default for YahooOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_CHART_BASE_URL.to_string(),
            range: "5d".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct YahooProvider {
    client: reqwest::blocking::Client,
    circuit_breaker: Arc<CircuitBreaker>,
    opts: YahooOptions,
}

impl YahooProvider {
    pub fn new(
        circuit_breaker: Arc<CircuitBreaker>,
        opts: YahooOptions,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(opts.timeout)
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()?;

        Ok(Self {
            client,
            circuit_breaker,
            opts,
        })
    }

    fn chart_url(&self, symbol: &str) -> String {
        format!(
            "{}/{symbol}?range={}&interval=1d&includeAdjustedClose=true",
            self.opts.base_url.trim_end_matches('/'),
            self.opts.range
        )
    }

    fn request(&self, symbol: &str) -> Result<RawPriceRecord, SymbolFetchError> {
        let resp = self
            .client
            .get(self.chart_url(symbol))
            .send()
            .map_err(|e| SymbolFetchError::NetworkUnreachable(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::FORBIDDEN || status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(SymbolFetchError::Blocked {
                status: status.as_u16(),
            });
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(SymbolFetchError::RateLimited);
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SymbolFetchError::SymbolNotFound);
        }
        if !status.is_success() {
            return Err(SymbolFetchError::HttpStatus {
                status: status.as_u16(),
            });
        }

        let chart: ChartResponse = resp.json().map_err(|e| {
            SymbolFetchError::ResponseFormatChanged(format!("failed to parse response: {e}"))
        })?;
        latest_bar(symbol, chart)
    }
}

impl MarketDataProvider for YahooProvider {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    fn daily_bar(&self, symbol: &str) -> Result<RawPriceRecord, SymbolFetchError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(SymbolFetchError::CircuitOpen);
        }

        let result = self.request(symbol);
        match &result {
            Ok(_) => self.circuit_breaker.record_success(),
            Err(SymbolFetchError::Blocked { .. }) => self.circuit_breaker.trip(),
            Err(e) if e.counts_against_provider() => self.circuit_breaker.record_failure(),
            Err(_) => {}
        }
        result
    }

    fn begin_fetch(&self) {
        self.circuit_breaker.reset();
    }
}

/// Parse a chart payload and keep the most recent bar with a complete,
/// non-negative OHLC set. A missing adjusted close falls back to the close,
/// a missing volume to zero.
fn latest_bar(symbol: &str, resp: ChartResponse) -> Result<RawPriceRecord, SymbolFetchError> {
    let result = resp.chart.result.ok_or_else(|| match resp.chart.error {
        Some(err) if err.code == "Not Found" => SymbolFetchError::SymbolNotFound,
        Some(err) => {
            SymbolFetchError::ResponseFormatChanged(format!("{}: {}", err.code, err.description))
        }
        None => SymbolFetchError::ResponseFormatChanged("empty result with no error".into()),
    })?;

    let data = result
        .into_iter()
        .next()
        .ok_or_else(|| SymbolFetchError::ResponseFormatChanged("result array is empty".into()))?;

    // Yahoo omits timestamps entirely when the range holds no trading days.
    let timestamps = data.timestamp.unwrap_or_default();

    let quote = data
        .indicators
        .quote
        .into_iter()
        .next()
        .ok_or_else(|| SymbolFetchError::ResponseFormatChanged("no quote data".into()))?;

    let adj_closes = data
        .indicators
        .adjclose
        .and_then(|v| v.into_iter().next())
        .map(|a| a.adjclose);

    for (i, &ts) in timestamps.iter().enumerate().rev() {
        let field = |v: &Vec<Option<f64>>| v.get(i).copied().flatten().filter(|p| *p >= 0.0);

        let (Some(open), Some(high), Some(low), Some(close)) = (
            field(&quote.open),
            field(&quote.high),
            field(&quote.low),
            field(&quote.close),
        ) else {
            continue;
        };

        let date = chrono::DateTime::from_timestamp(ts, 0)
            .map(|dt| dt.naive_utc().date())
            .ok_or_else(|| {
                SymbolFetchError::ResponseFormatChanged(format!("invalid timestamp: {ts}"))
            })?;

        let adj_close = adj_closes.as_ref().and_then(field).unwrap_or(close);
        let volume = quote.volume.get(i).copied().flatten().unwrap_or(0);

        return Ok(RawPriceRecord {
            date,
            symbol: symbol.to_string(),
            open,
            high,
            low,
            close,
            adj_close,
            volume,
        });
    }

    Err(SymbolFetchError::EmptyHistory)
}
