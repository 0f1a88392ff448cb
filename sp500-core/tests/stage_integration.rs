//! Integration tests chaining the staging writer, transform engine and load
//! adapter on real files.

use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sp500_core::error::Stage;
use sp500_core::load::{load, LoadMode, SqliteWarehouse, DEFAULT_TABLE};
use sp500_core::schema::SchemaError;
use sp500_core::staging::{list_artifacts, StagingWriter, RAW_LOGICAL_NAME};
use sp500_core::transform::transform;
use sp500_core::{PipelineError, RawDataset, RawPriceRecord, TransformedDataset};

const STAMP: &str = "20240102_220000";

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn read_transformed(path: &Path) -> TransformedDataset {
    TransformedDataset::from_csv(std::fs::File::open(path).unwrap()).unwrap()
}

#[test]
fn fixture_transforms_with_sorted_rows_and_deltas() {
    let dir = tempfile::tempdir().unwrap();
    let writer = StagingWriter::new(dir.path(), STAMP);

    let outcome = transform(&fixture("raw_two_days.csv"), &writer).unwrap();
    assert_eq!(
        outcome.location.path,
        dir.path().join("sp500_transformed_20240102_220000.csv")
    );
    assert_eq!(outcome.location.rows, 4);
    assert_eq!(outcome.symbols, 2);

    let out = read_transformed(&outcome.location.path);
    let keys: Vec<(&str, &str)> = out
        .rows
        .iter()
        .map(|r| (r.symbol.as_str(), r.date.as_str()))
        .collect();
    assert_eq!(
        keys,
        vec![
            ("AAA", "2024-01-01"),
            ("AAA", "2024-01-02"),
            ("BRK-B", "2024-01-01"),
            ("BRK-B", "2024-01-02"),
        ]
    );

    assert_eq!(out.rows[1].close_change, Some(2.0));
    assert_eq!(out.rows[1].close_pct_change, Some(20.0));

    // unparseable close and empty adjusted close are missing, never fatal
    assert_eq!(out.rows[2].close, None);
    assert_eq!(out.rows[2].adj_close, None);
    assert_eq!(out.rows[2].close_change, Some(0.0));
    assert_eq!(out.rows[3].close_change, Some(0.0));
    assert_eq!(out.rows[3].close_pct_change, Some(0.0));
}

#[test]
fn rerunning_transform_is_byte_identical_and_never_overwrites() {
    let dir = tempfile::tempdir().unwrap();
    let writer = StagingWriter::new(dir.path(), STAMP);

    let first = transform(&fixture("raw_two_days.csv"), &writer).unwrap();
    let second = transform(&fixture("raw_two_days.csv"), &writer).unwrap();

    assert_ne!(first.location.path, second.location.path);
    assert_eq!(first.location.digest, second.location.digest);
    assert_eq!(
        std::fs::read(&first.location.path).unwrap(),
        std::fs::read(&second.location.path).unwrap()
    );
}

#[test]
fn duplicate_column_fails_without_writing() {
    let dir = tempfile::tempdir().unwrap();
    let writer = StagingWriter::new(dir.path(), STAMP);

    let err = transform(&fixture("raw_duplicate_close.csv"), &writer).unwrap_err();
    match err {
        PipelineError::Schema {
            stage: Stage::Transform,
            source: SchemaError::DuplicateColumn(name),
            ..
        } => assert_eq!(name, "Close"),
        other => panic!("expected duplicate column error, got {other}"),
    }
    assert!(list_artifacts(dir.path()).unwrap().is_empty());
}

#[test]
fn staged_raw_dataset_flows_into_warehouse() {
    let dir = tempfile::tempdir().unwrap();
    let writer = StagingWriter::new(dir.path().join("staging"), STAMP);
    let day = |d| NaiveDate::from_ymd_opt(2024, 1, d).unwrap();
    let bar = |date, close: f64| RawPriceRecord {
        date,
        symbol: "AAA".into(),
        open: close,
        high: close,
        low: close,
        close,
        adj_close: close,
        volume: 1000,
    };

    let raw = RawDataset::new(vec![bar(day(2), 12.0), bar(day(1), 10.0)]);
    let raw_loc = writer.stage(Stage::Fetch, &raw, RAW_LOGICAL_NAME).unwrap();
    let outcome = transform(&raw_loc.path, &writer).unwrap();
    assert_eq!(outcome.location.rows, raw_loc.rows);

    let warehouse = SqliteWarehouse::new(dir.path().join("warehouse.db"), Duration::from_secs(5));
    let loaded = load(
        &outcome.location.path,
        &warehouse,
        DEFAULT_TABLE,
        LoadMode::Append,
    )
    .unwrap();
    assert_eq!(loaded, 2);

    // append-only: a second load of the same artifact accumulates
    load(
        &outcome.location.path,
        &warehouse,
        DEFAULT_TABLE,
        LoadMode::Append,
    )
    .unwrap();
    assert_eq!(warehouse.count_rows(DEFAULT_TABLE).unwrap(), 4);

    // upsert: replaces by (SYMBOL, DATE)
    load(
        &outcome.location.path,
        &warehouse,
        DEFAULT_TABLE,
        LoadMode::Upsert,
    )
    .unwrap();
    assert_eq!(warehouse.count_rows(DEFAULT_TABLE).unwrap(), 2);

    let staged: Vec<String> = list_artifacts(&dir.path().join("staging"))
        .unwrap()
        .into_iter()
        .map(|a| a.name)
        .collect();
    assert_eq!(
        staged,
        vec![
            "sp500_raw_20240102_220000.csv",
            "sp500_transformed_20240102_220000.csv"
        ]
    );
}

#[test]
fn load_of_vanished_artifact_is_missing_input() {
    let dir = tempfile::tempdir().unwrap();
    let warehouse = SqliteWarehouse::new(dir.path().join("warehouse.db"), Duration::from_secs(5));
    let err = load(
        &dir.path().join("sp500_transformed_20240102_220000.csv"),
        &warehouse,
        DEFAULT_TABLE,
        LoadMode::Append,
    )
    .unwrap_err();
    assert!(err.is_missing_input());
    assert!(err.to_string().contains("[load]"));
}
