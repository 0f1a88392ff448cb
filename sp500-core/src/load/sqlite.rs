//! SQLite warehouse.
//!
//! One connection per load, a finite busy timeout, one transaction per load.
//! The destination table is created on first use with quoted upper-case
//! identifiers matching the artifact header.

use rusqlite::{params, Connection};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use super::{LoadMode, Warehouse, WarehouseError};
use crate::domain::TransformedPriceRecord;

const COLUMN_TYPES: &[(&str, &str)] = &[
    ("DATE", "TEXT NOT NULL"),
    ("SYMBOL", "TEXT NOT NULL"),
    ("OPEN", "REAL"),
    ("HIGH", "REAL"),
    ("LOW", "REAL"),
    ("CLOSE", "REAL"),
    ("ADJ_CLOSE", "REAL"),
    ("VOLUME", "INTEGER"),
    ("CLOSE_CHANGE", "REAL"),
    ("CLOSE_PCT_CHANGE", "REAL"),
];

pub struct SqliteWarehouse {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteWarehouse {
    pub fn new(path: impl Into<PathBuf>, busy_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            busy_timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection, WarehouseError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| WarehouseError::Connect {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        }
        let conn = Connection::open(&self.path).map_err(|e| WarehouseError::Connect {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }

    /// Rows currently in `table`; `0` when the table does not exist yet.
    pub fn count_rows(&self, table: &str) -> Result<usize, WarehouseError> {
        let ident = quote_table(table)?;
        let conn = self.connect()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            params![table],
            |row| row.get(0),
        )?;
        if !exists {
            return Ok(0);
        }
        let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {ident}"), [], |row| {
            row.get(0)
        })?;
        Ok(usize::try_from(n).unwrap_or(0))
    }
}

impl Warehouse for SqliteWarehouse {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn bulk_load(
        &self,
        table: &str,
        rows: &[TransformedPriceRecord],
        mode: LoadMode,
    ) -> Result<usize, WarehouseError> {
        let ident = quote_table(table)?;
        let mut conn = self.connect()?;
        conn.execute_batch(&create_table_sql(&ident))?;

        let tx = conn.transaction()?;
        {
            // Replace by key before inserting, so repeated keys within one
            // batch are all kept and every inserted row is counted.
            if mode == LoadMode::Upsert {
                let mut delete = tx.prepare(&format!(
                    "DELETE FROM {ident} WHERE \"SYMBOL\" = ?1 AND \"DATE\" = ?2"
                ))?;
                let keys: BTreeSet<(&str, &str)> = rows
                    .iter()
                    .map(|r| (r.symbol.as_str(), r.date.as_str()))
                    .collect();
                for (symbol, date) in keys {
                    let removed = delete.execute(params![symbol, date])?;
                    if removed > 0 {
                        debug!(symbol, date, removed, "replacing rows");
                    }
                }
            }

            let mut insert = tx.prepare(&insert_sql(&ident))?;
            for r in rows {
                insert.execute(params![
                    r.date,
                    r.symbol,
                    r.open,
                    r.high,
                    r.low,
                    r.close,
                    r.adj_close,
                    r.volume,
                    r.close_change,
                    r.close_pct_change,
                ])?;
            }
        }
        tx.commit()?;

        info!(
            db = %self.path.display(),
            table,
            ?mode,
            rows = rows.len(),
            "bulk load committed"
        );
        Ok(rows.len())
    }
}

/// Table names are restricted to `[A-Za-z0-9_]` and always quoted.
fn quote_table(table: &str) -> Result<String, WarehouseError> {
    let valid = !table.is_empty()
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(format!("\"{table}\""))
    } else {
        Err(WarehouseError::InvalidTable(table.to_string()))
    }
}

fn create_table_sql(ident: &str) -> String {
    let columns: Vec<String> = COLUMN_TYPES
        .iter()
        .map(|(name, ty)| format!("\"{name}\" {ty}"))
        .collect();
    format!("CREATE TABLE IF NOT EXISTS {ident} ({})", columns.join(", "))
}

fn insert_sql(ident: &str) -> String {
    let names: Vec<String> = COLUMN_TYPES
        .iter()
        .map(|(name, _)| format!("\"{name}\""))
        .collect();
    let placeholders: Vec<String> = (1..=COLUMN_TYPES.len()).map(|i| format!("?{i}")).collect();
    format!(
        "INSERT INTO {ident} ({}) VALUES ({})",
        names.join(", "),
        placeholders.join(", ")
    )
}
