//! Load adapter: transformed artifact into the destination table.

pub mod sqlite;

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::domain::{TransformedDataset, TransformedPriceRecord};
use crate::error::{PipelineError, Stage};

pub use sqlite::SqliteWarehouse;

/// Default destination table.
pub const DEFAULT_TABLE: &str = "SP500_DATA";

/// How a load treats rows already in the table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadMode {
    /// Insert every row; repeated runs accumulate.
    #[default]
    Append,
    /// Delete existing (SYMBOL, DATE) rows in the same transaction, then insert.
    Upsert,
}

#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("invalid table name '{0}'")]
    InvalidTable(String),

    #[error("cannot open warehouse {}: {reason}", .path.display())]
    Connect { path: PathBuf, reason: String },

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub trait Warehouse: Send + Sync {
    fn name(&self) -> &str;

    /// Load all `rows` atomically; returns the number of rows inserted.
    fn bulk_load(
        &self,
        table: &str,
        rows: &[TransformedPriceRecord],
        mode: LoadMode,
    ) -> Result<usize, WarehouseError>;
}

/// Read a transformed artifact and bulk-load it into `table`.
pub fn load(
    transformed_path: &Path,
    warehouse: &dyn Warehouse,
    table: &str,
    mode: LoadMode,
) -> Result<usize, PipelineError> {
    let missing = || PipelineError::MissingArtifact {
        stage: Stage::Load,
        path: transformed_path.to_path_buf(),
    };
    if !transformed_path.is_file() {
        return Err(missing());
    }
    let file = File::open(transformed_path).map_err(|_| missing())?;

    let dataset = TransformedDataset::from_csv(file).map_err(|source| PipelineError::Schema {
        stage: Stage::Load,
        path: transformed_path.to_path_buf(),
        source,
    })?;

    let loaded = warehouse
        .bulk_load(table, &dataset.rows, mode)
        .map_err(|e| PipelineError::Load {
            table: table.to_string(),
            reason: e.to_string(),
        })?;

    info!(
        warehouse = warehouse.name(),
        source = %transformed_path.display(),
        table,
        rows = loaded,
        "transformed artifact loaded"
    );
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaError;
    use std::time::Duration;

    #[test]
    fn load_mode_parses_lowercase() {
        #[derive(Deserialize)]
        struct W {
            mode: LoadMode,
        }
        let w: W = toml::from_str("mode = \"upsert\"").unwrap();
        assert_eq!(w.mode, LoadMode::Upsert);
        assert_eq!(LoadMode::default(), LoadMode::Append);
    }

    #[test]
    fn missing_artifact_is_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let wh = SqliteWarehouse::new(dir.path().join("wh.db"), Duration::from_secs(1));
        let err = load(
            &dir.path().join("sp500_transformed_gone.csv"),
            &wh,
            DEFAULT_TABLE,
            LoadMode::Append,
        )
        .unwrap_err();
        assert!(err.is_missing_input());
        assert_eq!(err.stage(), Stage::Load);
    }

    #[test]
    fn wrong_header_is_schema_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "Datetime,Symbol\n2024-01-01,AAA\n").unwrap();
        let wh = SqliteWarehouse::new(dir.path().join("wh.db"), Duration::from_secs(1));

        let err = load(&path, &wh, DEFAULT_TABLE, LoadMode::Append).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Schema {
                stage: Stage::Load,
                source: SchemaError::UnexpectedHeader { .. },
                ..
            }
        ));
        assert_eq!(wh.count_rows(DEFAULT_TABLE).unwrap(), 0);
    }

    #[test]
    fn invalid_table_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.csv");
        std::fs::write(
            &path,
            "DATE,SYMBOL,OPEN,HIGH,LOW,CLOSE,ADJ_CLOSE,VOLUME,CLOSE_CHANGE,CLOSE_PCT_CHANGE\n",
        )
        .unwrap();
        let wh = SqliteWarehouse::new(dir.path().join("wh.db"), Duration::from_secs(1));
        let err = load(&path, &wh, "bad table", LoadMode::Append).unwrap_err();
        assert!(matches!(err, PipelineError::Load { .. }));
    }
}
