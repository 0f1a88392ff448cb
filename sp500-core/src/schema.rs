//! Tabular schema contract for staged artifacts.
//!
//! Raw artifacts keep the provider's column names; transformed artifacts use
//! the destination warehouse's upper-case identifiers in a fixed order.

use std::collections::HashSet;
use thiserror::Error;

/// Header of a raw artifact, as written by the fetch stage.
pub const RAW_COLUMNS: &[&str] = &[
    "Datetime",
    "Symbol",
    "Open",
    "High",
    "Low",
    "Close",
    "Adj Close",
    "Volume",
];

/// Date column name emitted by the provider.
pub const RAW_DATE_COLUMN: &str = "Datetime";

/// Canonical date column name after the transform rename.
pub const CANONICAL_DATE_COLUMN: &str = "Date";

/// Destination table schema, in load order.
pub const FINAL_COLUMNS: &[&str] = &[
    "DATE",
    "SYMBOL",
    "OPEN",
    "HIGH",
    "LOW",
    "CLOSE",
    "ADJ_CLOSE",
    "VOLUME",
    "CLOSE_CHANGE",
    "CLOSE_PCT_CHANGE",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("duplicate column name: {0}")]
    DuplicateColumn(String),

    #[error("missing required column: {0}")]
    MissingColumn(String),

    #[error("unexpected header: expected [{}], found [{}]", .expected.join(", "), .found.join(", "))]
    UnexpectedHeader {
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("row {row}: {reason}")]
    MalformedRow { row: usize, reason: String },
}

/// Positions of the raw columns inside an artifact's header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawColumnIndex {
    pub date: usize,
    pub symbol: usize,
    pub open: usize,
    pub high: usize,
    pub low: usize,
    pub close: usize,
    pub adj_close: usize,
    pub volume: usize,
}

/// Reject headers where any column name repeats.
pub fn ensure_unique(header: &[String]) -> Result<(), SchemaError> {
    let mut seen = HashSet::with_capacity(header.len());
    for name in header {
        if !seen.insert(name.as_str()) {
            return Err(SchemaError::DuplicateColumn(name.clone()));
        }
    }
    Ok(())
}

/// Validate a raw header and resolve column positions.
///
/// Accepts either the provider's `Datetime` or the canonical `Date` as the
/// date column. Extra columns are ignored.
pub fn index_raw_header(header: &[String]) -> Result<RawColumnIndex, SchemaError> {
    ensure_unique(header)?;

    let find = |name: &str| {
        header
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| SchemaError::MissingColumn(name.to_string()))
    };

    let date = find(RAW_DATE_COLUMN).or_else(|_| find(CANONICAL_DATE_COLUMN))?;

    Ok(RawColumnIndex {
        date,
        symbol: find("Symbol")?,
        open: find("Open")?,
        high: find("High")?,
        low: find("Low")?,
        close: find("Close")?,
        adj_close: find("Adj Close")?,
        volume: find("Volume")?,
    })
}

/// Require a header to be exactly the destination schema.
pub fn ensure_final_header(header: &[String]) -> Result<(), SchemaError> {
    ensure_unique(header)?;
    if header.iter().map(String::as_str).eq(FINAL_COLUMNS.iter().copied()) {
        Ok(())
    } else {
        Err(SchemaError::UnexpectedHeader {
            expected: FINAL_COLUMNS.iter().map(|c| c.to_string()).collect(),
            found: header.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(cols: &[&str]) -> Vec<String> {
        cols.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn raw_header_resolves_in_any_order() {
        let header = owned(&[
            "Symbol", "Volume", "Datetime", "Open", "High", "Low", "Close", "Adj Close",
        ]);
        let idx = index_raw_header(&header).unwrap();
        assert_eq!(idx.symbol, 0);
        assert_eq!(idx.volume, 1);
        assert_eq!(idx.date, 2);
        assert_eq!(idx.adj_close, 7);
    }

    #[test]
    fn canonical_date_name_is_accepted() {
        let mut header = owned(RAW_COLUMNS);
        header[0] = CANONICAL_DATE_COLUMN.to_string();
        assert!(index_raw_header(&header).is_ok());
    }

    #[test]
    fn duplicate_column_is_rejected() {
        let header = owned(&[
            "Datetime", "Symbol", "Open", "High", "Low", "Close", "Close", "Adj Close", "Volume",
        ]);
        assert_eq!(
            index_raw_header(&header),
            Err(SchemaError::DuplicateColumn("Close".into()))
        );
    }

    #[test]
    fn missing_column_is_rejected() {
        let header = owned(&["Datetime", "Symbol", "Open", "High", "Low", "Close", "Volume"]);
        assert_eq!(
            index_raw_header(&header),
            Err(SchemaError::MissingColumn("Adj Close".into()))
        );
    }

    #[test]
    fn final_header_must_match_exactly() {
        assert!(ensure_final_header(&owned(FINAL_COLUMNS)).is_ok());

        let mut reordered = owned(FINAL_COLUMNS);
        reordered.swap(0, 1);
        assert!(matches!(
            ensure_final_header(&reordered),
            Err(SchemaError::UnexpectedHeader { .. })
        ));
    }
}
