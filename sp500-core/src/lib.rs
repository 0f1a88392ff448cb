//! sp500 core — the four stages of the daily S&P 500 batch pipeline.
//!
//! - Source adapters: ticker universe and per-symbol daily bars
//! - Staging writer: run-stamped local artifacts and the remote raw copy
//! - Transform engine: lenient coercion, (symbol, date) ordering, close deltas
//! - Load adapter: bulk load into the destination table
//!
//! Stage sequencing and handoff state live in `sp500-runner`.

pub mod data;
pub mod domain;
pub mod error;
pub mod load;
pub mod schema;
pub mod staging;
pub mod transform;

pub use domain::{
    CsvArtifact, RawDataset, RawPriceRecord, TransformedDataset, TransformedPriceRecord,
};
pub use error::{PipelineError, Stage};
pub use load::{load, LoadMode, SqliteWarehouse, Warehouse, WarehouseError};
pub use schema::SchemaError;
pub use staging::{ArtifactLocation, ObjectStore, RemotePublisher, StagingWriter};
pub use transform::{transform, TransformOutcome};
