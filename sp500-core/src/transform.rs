//! Transform engine: raw artifact in, destination-shaped artifact out.
//!
//! Steps, in order:
//! 1. Validate the header (no repeated names, all raw columns present)
//! 2. Coerce numeric cells leniently; unparseable values become missing
//! 3. Stable-sort by (symbol, date)
//! 4. Derive CLOSE_CHANGE and CLOSE_PCT_CHANGE per symbol
//! 5. Project to the destination column order and stage the result
//!
//! Output row count always equals input row count, and the output bytes are a
//! pure function of the input bytes.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::domain::{coerce_f64, coerce_volume, TransformedDataset, TransformedPriceRecord};
use crate::error::{PipelineError, Stage};
use crate::schema::{self, SchemaError};
use crate::staging::{ArtifactLocation, StagingWriter, TRANSFORMED_LOGICAL_NAME};

/// Result of one transform run.
#[derive(Debug, Clone)]
pub struct TransformOutcome {
    pub source: PathBuf,
    pub location: ArtifactLocation,
    pub symbols: usize,
}

/// Transform a staged raw artifact and stage the result as `sp500_transformed`.
///
/// A missing raw artifact is [`PipelineError::MissingArtifact`]; a header with
/// a repeated or missing column is [`PipelineError::Schema`]. In both cases
/// nothing is written.
pub fn transform(
    raw_path: &Path,
    writer: &StagingWriter,
) -> Result<TransformOutcome, PipelineError> {
    let missing = || PipelineError::MissingArtifact {
        stage: Stage::Transform,
        path: raw_path.to_path_buf(),
    };
    if !raw_path.is_file() {
        return Err(missing());
    }
    let file = File::open(raw_path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => missing(),
        _ => PipelineError::Schema {
            stage: Stage::Transform,
            path: raw_path.to_path_buf(),
            source: SchemaError::MalformedRow {
                row: 0,
                reason: format!("unreadable artifact: {e}"),
            },
        },
    })?;

    let dataset = transform_reader(file).map_err(|source| PipelineError::Schema {
        stage: Stage::Transform,
        path: raw_path.to_path_buf(),
        source,
    })?;

    let symbols = count_symbols(&dataset);
    info!(
        source = %raw_path.display(),
        rows = dataset.len(),
        symbols,
        "raw artifact transformed"
    );

    let location = writer.stage(Stage::Transform, &dataset, TRANSFORMED_LOGICAL_NAME)?;
    Ok(TransformOutcome {
        source: raw_path.to_path_buf(),
        location,
        symbols,
    })
}

/// Parse a raw CSV stream and apply the transform rules in memory.
pub fn transform_reader<R: Read>(reader: R) -> Result<TransformedDataset, SchemaError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let header: Vec<String> = rdr
        .headers()
        .map_err(|e| SchemaError::MalformedRow {
            row: 0,
            reason: format!("unreadable header: {e}"),
        })?
        .iter()
        .map(str::to_string)
        .collect();
    let idx = schema::index_raw_header(&header)?;

    let mut rows = Vec::new();
    for (i, record) in rdr.byte_records().enumerate() {
        let record = record.map_err(|e| SchemaError::MalformedRow {
            row: i + 1,
            reason: e.to_string(),
        })?;
        // Short rows are tolerated: absent cells read as empty, i.e. missing.
        let bytes = |pos: usize| record.get(pos).unwrap_or(&b""[..]);
        // Cells that are not UTF-8 coerce to missing like any other garbage.
        let number = |pos: usize| std::str::from_utf8(bytes(pos)).ok().and_then(coerce_f64);
        let text = |pos: usize| String::from_utf8_lossy(bytes(pos)).trim().to_string();

        rows.push(TransformedPriceRecord {
            date: text(idx.date),
            symbol: text(idx.symbol),
            open: number(idx.open),
            high: number(idx.high),
            low: number(idx.low),
            close: number(idx.close),
            adj_close: number(idx.adj_close),
            volume: std::str::from_utf8(bytes(idx.volume))
                .ok()
                .and_then(coerce_volume),
            close_change: None,
            close_pct_change: None,
        });
    }
    debug!(rows = rows.len(), "raw rows coerced");

    // `sort_by` is stable: rows sharing (symbol, date) keep input order.
    rows.sort_by(|a, b| (&a.symbol, &a.date).cmp(&(&b.symbol, &b.date)));
    derive_close_deltas(&mut rows);

    Ok(TransformedDataset::new(rows))
}

/// Fill the two close deltas in place. `rows` must be sorted by
/// (symbol, date); a symbol boundary restarts the series.
///
/// - first row of a symbol: both deltas `0.0`
/// - either close missing: both deltas `0.0`
/// - previous close `0.0`: change is computed, percentage is missing
pub fn derive_close_deltas(rows: &mut [TransformedPriceRecord]) {
    for i in 0..rows.len() {
        let (change, pct) = if i > 0 && rows[i - 1].symbol == rows[i].symbol {
            close_deltas(rows[i - 1].close, rows[i].close)
        } else {
            (Some(0.0), Some(0.0))
        };
        rows[i].close_change = change;
        rows[i].close_pct_change = pct;
    }
}

fn close_deltas(prev: Option<f64>, cur: Option<f64>) -> (Option<f64>, Option<f64>) {
    match (prev, cur) {
        (Some(p), Some(c)) => {
            let change = c - p;
            let pct = if p == 0.0 {
                None
            } else {
                Some(change / p * 100.0)
            };
            (Some(change), pct)
        }
        _ => (Some(0.0), Some(0.0)),
    }
}

fn count_symbols(dataset: &TransformedDataset) -> usize {
    let mut count = 0;
    let mut last: Option<&str> = None;
    for row in &dataset.rows {
        if last != Some(row.symbol.as_str()) {
            count += 1;
            last = Some(row.symbol.as_str());
        }
    }
    count
}
