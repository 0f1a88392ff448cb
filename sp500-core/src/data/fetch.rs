//! Fetch orchestrator: universe first, then one daily bar per symbol on a
//! bounded worker pool.
//!
//! Per-symbol failures are filtered out of the dataset and routed to
//! [`FetchReport::failures`] and the log; only a missing universe, or a worker
//! pool that cannot be built, fails the stage.

use rayon::prelude::*;
use tracing::{debug, info, warn};

use super::provider::{MarketDataProvider, SymbolFetchError, UniverseSource};
use crate::domain::{RawDataset, RawPriceRecord};
use crate::error::PipelineError;

/// Options for [`fetch_raw_dataset`].
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Worker threads for per-symbol requests. `1` fetches sequentially.
    pub workers: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self { workers: 8 }
    }
}

/// A symbol that produced no record, and why.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolFailure {
    pub symbol: String,
    pub error: SymbolFetchError,
}

/// Outcome of the fetch stage.
#[derive(Debug, Clone)]
pub struct FetchReport {
    pub dataset: RawDataset,
    pub failures: Vec<SymbolFailure>,
    pub universe_size: usize,
}

impl FetchReport {
    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Fetch one symbol's latest bar, logging and swallowing any failure.
pub fn fetch_daily_bar(provider: &dyn MarketDataProvider, symbol: &str) -> Option<RawPriceRecord> {
    fetch_one(provider, symbol).ok()
}

/// Shared by [`fetch_daily_bar`] and [`fetch_raw_dataset`]: one request, with
/// the failure logged and kept for the report.
fn fetch_one(
    provider: &dyn MarketDataProvider,
    symbol: &str,
) -> Result<RawPriceRecord, SymbolFailure> {
    match provider.daily_bar(symbol) {
        Ok(record) => {
            debug!(symbol, date = %record.date, close = record.close, "fetched");
            Ok(record)
        }
        Err(error) => {
            warn!(symbol, provider = provider.name(), %error, "symbol fetch failed, dropping");
            Err(SymbolFailure {
                symbol: symbol.to_string(),
                error,
            })
        }
    }
}

/// Build the day's raw dataset.
///
/// Rows keep universe order, but callers must not rely on it: downstream
/// stages sort explicitly.
pub fn fetch_raw_dataset(
    source: &dyn UniverseSource,
    provider: &dyn MarketDataProvider,
    opts: &FetchOptions,
) -> Result<FetchReport, PipelineError> {
    let universe = source.fetch_universe()?;
    info!(source = source.name(), symbols = universe.len(), "universe loaded");

    let workers = opts.workers.max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("sp500-fetch-{i}"))
        .build()
        .map_err(|e| PipelineError::FetchWorkers {
            workers,
            reason: e.to_string(),
        })?;

    provider.begin_fetch();

    let results: Vec<Result<RawPriceRecord, SymbolFailure>> = pool.install(|| {
        universe
            .symbols()
            .par_iter()
            .map(|symbol| fetch_one(provider, symbol))
            .collect()
    });

    let mut rows = Vec::with_capacity(results.len());
    let mut failures = Vec::new();
    for result in results {
        match result {
            Ok(record) => rows.push(record),
            Err(failure) => failures.push(failure),
        }
    }

    info!(
        provider = provider.name(),
        fetched = rows.len(),
        failed = failures.len(),
        total = universe.len(),
        "fetch complete"
    );

    Ok(FetchReport {
        dataset: RawDataset::new(rows),
        failures,
        universe_size: universe.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::circuit_breaker::CircuitBreaker;
    use crate::data::universe::Universe;
    use chrono::NaiveDate;

    struct FixedUniverse(Vec<&'static str>);

    impl UniverseSource for FixedUniverse {
        fn name(&self) -> &str {
            "fixed"
        }

        fn fetch_universe(&self) -> Result<Universe, PipelineError> {
            Ok(Universe::from_symbols(self.0.iter()))
        }
    }

    struct BrokenUniverse;

    impl UniverseSource for BrokenUniverse {
        fn name(&self) -> &str {
            "broken"
        }

        fn fetch_universe(&self) -> Result<Universe, PipelineError> {
            Err(PipelineError::UniverseFetch {
                reason: "HTTP 503".into(),
            })
        }
    }

    fn bar(symbol: &str) -> RawPriceRecord {
        RawPriceRecord {
            date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            symbol: symbol.to_string(),
            open: 10.0,
            high: 11.0,
            low: 9.0,
            close: 10.5,
            adj_close: 10.5,
            volume: 100,
        }
    }

    /// Fails every symbol whose name starts with `X`.
    struct FlakyProvider;

    impl MarketDataProvider for FlakyProvider {
        fn name(&self) -> &str {
            "flaky"
        }

        fn daily_bar(&self, symbol: &str) -> Result<RawPriceRecord, SymbolFetchError> {
            if symbol.starts_with('X') {
                return Err(SymbolFetchError::EmptyHistory);
            }
            Ok(bar(symbol))
        }
    }

    /// Skips requests while its breaker is open; resets it per fetch.
    struct GuardedProvider {
        breaker: CircuitBreaker,
    }

    impl MarketDataProvider for GuardedProvider {
        fn name(&self) -> &str {
            "guarded"
        }

        fn daily_bar(&self, symbol: &str) -> Result<RawPriceRecord, SymbolFetchError> {
            if !self.breaker.is_allowed() {
                return Err(SymbolFetchError::CircuitOpen);
            }
            Ok(bar(symbol))
        }

        fn begin_fetch(&self) {
            self.breaker.reset();
        }
    }

    #[test]
    fn failed_symbols_are_dropped_not_fatal() {
        let report = fetch_raw_dataset(
            &FixedUniverse(vec!["AAA", "XBAD", "BBB", "XNONE"]),
            &FlakyProvider,
            &FetchOptions { workers: 2 },
        )
        .unwrap();

        assert_eq!(report.universe_size, 4);
        assert_eq!(report.dataset.len(), 2);
        assert_eq!(report.failures.len(), 2);
        assert!(report.dataset.len() <= report.universe_size);
        let failed: Vec<&str> = report.failures.iter().map(|f| f.symbol.as_str()).collect();
        assert!(failed.contains(&"XBAD"));
        assert!(failed.contains(&"XNONE"));
        assert!(!report.all_succeeded());
    }

    #[test]
    fn universe_failure_is_fatal() {
        let err = fetch_raw_dataset(&BrokenUniverse, &FlakyProvider, &FetchOptions::default())
            .unwrap_err();
        assert!(matches!(err, PipelineError::UniverseFetch { .. }));
    }

    #[test]
    fn single_symbol_helper_swallows_errors() {
        assert!(fetch_daily_bar(&FlakyProvider, "AAA").is_some());
        assert!(fetch_daily_bar(&FlakyProvider, "XBAD").is_none());
    }

    #[test]
    fn breaker_tripped_before_a_fetch_does_not_carry_over() {
        let provider = GuardedProvider {
            breaker: CircuitBreaker::new(3),
        };
        provider.breaker.trip();

        let report = fetch_raw_dataset(
            &FixedUniverse(vec!["AAA", "BBB"]),
            &provider,
            &FetchOptions { workers: 1 },
        )
        .unwrap();
        assert!(report.all_succeeded());
        assert_eq!(report.dataset.len(), 2);
    }
}
