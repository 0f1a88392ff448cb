//! Source adapter traits and per-symbol error types.
//!
//! `UniverseSource` and `MarketDataProvider` abstract over the upstream ticker
//! list and the market-data API so the fetch stage can run against fakes in
//! tests.

use thiserror::Error;

use super::universe::Universe;
use crate::domain::RawPriceRecord;
use crate::error::PipelineError;

/// Why a single symbol produced no record.
///
/// These never abort a run: the fetch stage logs them and drops the symbol.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SymbolFetchError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider")]
    RateLimited,

    #[error("provider refused the request (HTTP {status})")]
    Blocked { status: u16 },

    #[error("unexpected HTTP status {status}")]
    HttpStatus { status: u16 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("symbol not found")]
    SymbolNotFound,

    #[error("no complete daily bar in history")]
    EmptyHistory,

    #[error("circuit breaker open, request skipped")]
    CircuitOpen,
}

impl SymbolFetchError {
    /// Failures that say something about the provider's health rather than
    /// about the symbol itself.
    pub fn counts_against_provider(&self) -> bool {
        matches!(
            self,
            SymbolFetchError::NetworkUnreachable(_)
                | SymbolFetchError::RateLimited
                | SymbolFetchError::HttpStatus { .. }
        )
    }
}

/// Upstream ticker list.
pub trait UniverseSource: Send + Sync {
    /// Human-readable name of this source, for logs.
    fn name(&self) -> &str;

    /// Retrieve and normalize the current universe. Failure is fatal for the run.
    fn fetch_universe(&self) -> Result<Universe, PipelineError>;
}

/// Upstream market-data API.
pub trait MarketDataProvider: Send + Sync {
    /// Human-readable name of this provider, for logs.
    fn name(&self) -> &str;

    /// Latest complete daily bar for `symbol`.
    fn daily_bar(&self, symbol: &str) -> Result<RawPriceRecord, SymbolFetchError>;

    /// Called once at the start of every fetch, retries included. Clears
    /// state that must not leak between fetches.
    fn begin_fetch(&self) {}
}
