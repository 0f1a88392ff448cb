//! Fixed-schema records exchanged between stages.
//!
//! Raw records come straight from the market-data provider and are strictly
//! typed. Transformed records are read back from a staged artifact with lenient
//! coercion, so every numeric cell is optional (`None` is the missing marker
//! and is written as an empty cell).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::io::Read;

use crate::schema::{self, SchemaError, FINAL_COLUMNS, RAW_COLUMNS};

/// Latest daily OHLCV bar for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPriceRecord {
    pub date: NaiveDate,
    pub symbol: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub adj_close: f64,
    pub volume: u64,
}

/// One run's fetched rows, in fetch order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDataset {
    pub rows: Vec<RawPriceRecord>,
}

impl RawDataset {
    pub fn new(rows: Vec<RawPriceRecord>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A raw row after lenient coercion, plus the two derived close deltas.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformedPriceRecord {
    pub date: String,
    pub symbol: String,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub adj_close: Option<f64>,
    pub volume: Option<u64>,
    pub close_change: Option<f64>,
    pub close_pct_change: Option<f64>,
}

/// Transformed rows sorted by (symbol, date).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformedDataset {
    pub rows: Vec<TransformedPriceRecord>,
}

impl TransformedDataset {
    pub fn new(rows: Vec<TransformedPriceRecord>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Parse a transformed artifact. The header must be exactly the destination
    /// schema; empty cells become `None`.
    pub fn from_csv<R: Read>(reader: R) -> Result<Self, SchemaError> {
        let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);

        let header: Vec<String> = rdr
            .headers()
            .map_err(|e| SchemaError::MalformedRow {
                row: 0,
                reason: format!("unreadable header: {e}"),
            })?
            .iter()
            .map(str::to_string)
            .collect();
        schema::ensure_final_header(&header)?;

        let mut rows = Vec::new();
        for (i, record) in rdr.records().enumerate() {
            let row = i + 1;
            let record = record.map_err(|e| SchemaError::MalformedRow {
                row,
                reason: e.to_string(),
            })?;
            let cell = |idx: usize| record.get(idx).unwrap_or("");
            let float = |idx: usize| {
                strict_float(cell(idx)).map_err(|reason| SchemaError::MalformedRow {
                    row,
                    reason: format!("{}: {reason}", FINAL_COLUMNS[idx]),
                })
            };

            rows.push(TransformedPriceRecord {
                date: cell(0).to_string(),
                symbol: cell(1).to_string(),
                open: float(2)?,
                high: float(3)?,
                low: float(4)?,
                close: float(5)?,
                adj_close: float(6)?,
                volume: strict_volume(cell(7)).map_err(|reason| SchemaError::MalformedRow {
                    row,
                    reason: format!("VOLUME: {reason}"),
                })?,
                close_change: float(8)?,
                close_pct_change: float(9)?,
            });
        }

        Ok(Self { rows })
    }
}

/// Datasets that can be written as a staged, header-first CSV artifact.
pub trait CsvArtifact {
    fn header(&self) -> &'static [&'static str];
    fn row_count(&self) -> usize;
    fn write_rows<W: std::io::Write>(&self, wtr: &mut csv::Writer<W>) -> csv::Result<()>;

    fn to_csv_bytes(&self) -> csv::Result<Vec<u8>> {
        let mut wtr = csv::Writer::from_writer(vec![]);
        wtr.write_record(self.header())?;
        self.write_rows(&mut wtr)?;
        wtr.into_inner()
            .map_err(|e| csv::Error::from(e.into_error()))
    }
}

impl CsvArtifact for RawDataset {
    fn header(&self) -> &'static [&'static str] {
        RAW_COLUMNS
    }

    fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn write_rows<W: std::io::Write>(&self, wtr: &mut csv::Writer<W>) -> csv::Result<()> {
        for r in &self.rows {
            wtr.write_record([
                r.date.format("%Y-%m-%d").to_string(),
                r.symbol.clone(),
                r.open.to_string(),
                r.high.to_string(),
                r.low.to_string(),
                r.close.to_string(),
                r.adj_close.to_string(),
                r.volume.to_string(),
            ])?;
        }
        Ok(())
    }
}

impl CsvArtifact for TransformedDataset {
    fn header(&self) -> &'static [&'static str] {
        FINAL_COLUMNS
    }

    fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn write_rows<W: std::io::Write>(&self, wtr: &mut csv::Writer<W>) -> csv::Result<()> {
        for r in &self.rows {
            wtr.write_record([
                r.date.clone(),
                r.symbol.clone(),
                cell_f64(r.open),
                cell_f64(r.high),
                cell_f64(r.low),
                cell_f64(r.close),
                cell_f64(r.adj_close),
                r.volume.map(|v| v.to_string()).unwrap_or_default(),
                cell_f64(r.close_change),
                cell_f64(r.close_pct_change),
            ])?;
        }
        Ok(())
    }
}

fn cell_f64(v: Option<f64>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}

// ── Coercion ────────────────────────────────────────────────────────

/// Lenient float coercion: anything that is not a finite number is missing.
pub fn coerce_f64(cell: &str) -> Option<f64> {
    cell.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Lenient volume coercion. Integral float spellings (`"1200.0"`) are accepted,
/// negative or fractional values are missing.
pub fn coerce_volume(cell: &str) -> Option<u64> {
    let cell = cell.trim();
    if let Ok(v) = cell.parse::<u64>() {
        return Some(v);
    }
    match coerce_f64(cell) {
        Some(v) if v >= 0.0 && v.fract() == 0.0 && v <= u64::MAX as f64 => Some(v as u64),
        _ => None,
    }
}

/// Strict counterparts used when reading our own transformed artifacts: an
/// empty cell is the missing marker, anything else must parse.
fn strict_float(cell: &str) -> Result<Option<f64>, String> {
    if cell.is_empty() {
        return Ok(None);
    }
    cell.parse::<f64>()
        .map(Some)
        .map_err(|e| format!("'{cell}': {e}"))
}

fn strict_volume(cell: &str) -> Result<Option<u64>, String> {
    if cell.is_empty() {
        return Ok(None);
    }
    cell.parse::<u64>()
        .map(Some)
        .map_err(|e| format!("'{cell}': {e}"))
}
