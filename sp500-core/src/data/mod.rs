//! Source adapters: ticker universe and per-symbol daily bars.

pub mod circuit_breaker;
pub mod fetch;
pub mod provider;
pub mod universe;
pub mod yahoo;

pub use circuit_breaker::CircuitBreaker;
pub use fetch::{fetch_daily_bar, fetch_raw_dataset, FetchOptions, FetchReport, SymbolFailure};
pub use provider::{MarketDataProvider, SymbolFetchError, UniverseSource};
pub use universe::{CsvUniverse, FileUniverse, Universe, WikipediaUniverse};
pub use yahoo::{YahooOptions, YahooProvider};
