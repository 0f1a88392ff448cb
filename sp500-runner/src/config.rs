//! TOML pipeline configuration.
//!
//! Every section has defaults, so an empty file is a valid configuration:
//!
//! ```toml
//! [universe]
//! source = "wikipedia"          # or "csv" / "file"
//!
//! [market_data]
//! range = "5d"
//! workers = 8
//!
//! [staging]
//! data_dir = "data/staging"
//!
//! [remote]
//! kind = "fs"                   # or "http"
//! root = "data/bucket"
//! bucket = "market-data"
//! prefix = "sp500"
//!
//! [warehouse]
//! path = "data/warehouse.db"
//! table = "SP500_DATA"
//! mode = "append"               # or "upsert"
//!
//! [retry]
//! retries = 1
//! delay_secs = 300
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use sp500_core::data::universe::WIKIPEDIA_SP500_URL;
use sp500_core::data::yahoo::DEFAULT_CHART_BASE_URL;
use sp500_core::data::{
    CircuitBreaker, CsvUniverse, FetchOptions, FileUniverse, UniverseSource, WikipediaUniverse,
    YahooOptions, YahooProvider,
};
use sp500_core::load::{LoadMode, SqliteWarehouse, DEFAULT_TABLE};
use sp500_core::staging::{FsObjectStore, HttpObjectStore, ObjectStore, RemotePublisher};

use crate::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("cannot build {component}: {reason}")]
    Build {
        component: &'static str,
        reason: String,
    },
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub universe: UniverseConfig,
    pub market_data: MarketDataConfig,
    pub staging: StagingConfig,
    pub remote: RemoteConfig,
    pub warehouse: WarehouseConfig,
    pub retry: RetryConfig,
}

fn default_wikipedia_url() -> String {
    WIKIPEDIA_SP500_URL.to_string()
}

fn default_symbol_column() -> String {
    "Symbol".to_string()
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_remote_timeout_secs() -> u64 {
    60
}

fn default_bucket() -> String {
    "market-data".to_string()
}

fn default_prefix() -> String {
    "sp500".to_string()
}

fn default_bucket_root() -> PathBuf {
    PathBuf::from("data/bucket")
}

/// Where the ticker universe comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum UniverseConfig {
    Wikipedia {
        #[serde(default = "default_wikipedia_url")]
        url: String,
        #[serde(default = "default_http_timeout_secs")]
        timeout_secs: u64,
    },
    Csv {
        /// `http(s)://` URL or local path.
        location: String,
        #[serde(default = "default_symbol_column")]
        column: String,
        #[serde(default = "default_http_timeout_secs")]
        timeout_secs: u64,
    },
    File {
        path: PathBuf,
    },
}

impl Default for UniverseConfig {
    fn default() -> Self {
        UniverseConfig::Wikipedia {
            url: default_wikipedia_url(),
            timeout_secs: default_http_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketDataConfig {
    pub base_url: String,
    pub range: String,
    pub timeout_secs: u64,
    pub workers: usize,
    /// Consecutive provider failures that open the circuit breaker; 0 disables.
    pub breaker_threshold: u32,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_CHART_BASE_URL.to_string(),
            range: "5d".to_string(),
            timeout_secs: default_http_timeout_secs(),
            workers: 8,
            breaker_threshold: 25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagingConfig {
    pub data_dir: PathBuf,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/staging"),
        }
    }
}

/// Remote durability copy of the raw artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RemoteConfig {
    /// A local directory standing in for the bucket.
    Fs {
        #[serde(default = "default_bucket_root")]
        root: PathBuf,
        #[serde(default = "default_bucket")]
        bucket: String,
        #[serde(default = "default_prefix")]
        prefix: String,
    },
    /// S3-compatible gateway, path-style PUT.
    Http {
        endpoint: String,
        #[serde(default = "default_bucket")]
        bucket: String,
        #[serde(default = "default_prefix")]
        prefix: String,
        #[serde(default = "default_remote_timeout_secs")]
        timeout_secs: u64,
    },
}

impl Default for RemoteConfig {
    fn default() -> Self {
        RemoteConfig::Fs {
            root: default_bucket_root(),
            bucket: default_bucket(),
            prefix: default_prefix(),
        }
    }
}

impl RemoteConfig {
    pub fn bucket(&self) -> &str {
        match self {
            RemoteConfig::Fs { bucket, .. } | RemoteConfig::Http { bucket, .. } => bucket,
        }
    }

    pub fn prefix(&self) -> &str {
        match self {
            RemoteConfig::Fs { prefix, .. } | RemoteConfig::Http { prefix, .. } => prefix,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    pub path: PathBuf,
    pub table: String,
    pub mode: LoadMode,
    pub busy_timeout_secs: u64,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/warehouse.db"),
            table: DEFAULT_TABLE.to_string(),
            mode: LoadMode::Append,
            busy_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub retries: u32,
    pub delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: 1,
            delay_secs: 300,
        }
    }
}

impl PipelineConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.market_data.workers == 0 {
            return invalid("market_data.workers must be at least 1");
        }
        if self.market_data.range.trim().is_empty() {
            return invalid("market_data.range must not be empty");
        }
        if self.market_data.timeout_secs == 0 {
            return invalid("market_data.timeout_secs must be positive");
        }
        if self.warehouse.table.is_empty()
            || !self
                .warehouse
                .table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return invalid("warehouse.table must be a non-empty [A-Za-z0-9_] identifier");
        }
        if self.warehouse.busy_timeout_secs == 0 {
            return invalid("warehouse.busy_timeout_secs must be positive");
        }
        if self.remote.bucket().is_empty() {
            return invalid("remote.bucket must not be empty");
        }
        if let RemoteConfig::Http {
            endpoint,
            timeout_secs,
            ..
        } = &self.remote
        {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return invalid("remote.endpoint must be an http(s) URL");
            }
            if *timeout_secs == 0 {
                return invalid("remote.timeout_secs must be positive");
            }
        }
        Ok(())
    }

    // ── Builders ─────────────────────────────────────────────────────

    pub fn universe_source(&self) -> Box<dyn UniverseSource> {
        match &self.universe {
            UniverseConfig::Wikipedia { url, timeout_secs } => Box::new(WikipediaUniverse::new(
                url.clone(),
                Duration::from_secs(*timeout_secs),
            )),
            UniverseConfig::Csv {
                location,
                column,
                timeout_secs,
            } => Box::new(CsvUniverse::new(
                location.clone(),
                column.clone(),
                Duration::from_secs(*timeout_secs),
            )),
            UniverseConfig::File { path } => Box::new(FileUniverse::new(path.clone())),
        }
    }

    pub fn provider(&self) -> Result<YahooProvider, ConfigError> {
        let md = &self.market_data;
        let breaker = Arc::new(CircuitBreaker::new(md.breaker_threshold));
        YahooProvider::new(
            breaker,
            YahooOptions {
                base_url: md.base_url.clone(),
                range: md.range.clone(),
                timeout: Duration::from_secs(md.timeout_secs),
            },
        )
        .map_err(|e| ConfigError::Build {
            component: "market data client",
            reason: e.to_string(),
        })
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            workers: self.market_data.workers,
        }
    }

    pub fn publisher(&self) -> Result<RemotePublisher, ConfigError> {
        let store: Box<dyn ObjectStore> = match &self.remote {
            RemoteConfig::Fs { root, bucket, .. } => {
                Box::new(FsObjectStore::new(root.clone(), bucket.clone()))
            }
            RemoteConfig::Http {
                endpoint,
                bucket,
                timeout_secs,
                ..
            } => Box::new(
                HttpObjectStore::new(
                    endpoint.clone(),
                    bucket.clone(),
                    Duration::from_secs(*timeout_secs),
                )
                .map_err(|e| ConfigError::Build {
                    component: "object store client",
                    reason: e.to_string(),
                })?,
            ),
        };
        Ok(RemotePublisher::new(store, self.remote.prefix()))
    }

    pub fn warehouse(&self) -> SqliteWarehouse {
        SqliteWarehouse::new(
            self.warehouse.path.clone(),
            Duration::from_secs(self.warehouse.busy_timeout_secs),
        )
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retry.retries,
            delay: Duration::from_secs(self.retry.delay_secs),
        }
    }
}
