//! Local staging of run artifacts, plus the remote copy of the raw artifact.
//!
//! Layout: `{data_dir}/{logical_name}_{run_stamp}.csv`, with `_1`, `_2`, ...
//! appended when a name is already taken. A staged file is never overwritten.
//!
//! The final name is reserved first as an empty file, the body goes to a
//! `.tmp` sibling and is renamed over the reservation, so a staged name never
//! holds a partial body. Every artifact has at least a header line, so
//! [`list_artifacts`] skips empty reservations still being written.

use chrono::{DateTime, Local, NaiveDateTime};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::object_store::ObjectStore;
use crate::domain::CsvArtifact;
use crate::error::{PipelineError, Stage};

/// `strftime` pattern of the run stamp embedded in artifact names.
pub const RUN_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Logical name of the fetched dataset.
pub const RAW_LOGICAL_NAME: &str = "sp500_raw";

/// Logical name of the transformed dataset.
pub const TRANSFORMED_LOGICAL_NAME: &str = "sp500_transformed";

const MAX_NAME_ATTEMPTS: u32 = 1000;

pub fn run_stamp(at: NaiveDateTime) -> String {
    at.format(RUN_STAMP_FORMAT).to_string()
}

/// A staged artifact on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLocation {
    pub path: PathBuf,
    pub rows: usize,
    /// BLAKE3 hex digest of the bytes written.
    pub digest: String,
}

pub struct StagingWriter {
    dir: PathBuf,
    run_stamp: String,
}

impl StagingWriter {
    pub fn new(dir: impl Into<PathBuf>, run_stamp: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            run_stamp: run_stamp.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn run_stamp(&self) -> &str {
        &self.run_stamp
    }

    fn candidate(&self, logical_name: &str, attempt: u32) -> PathBuf {
        let name = if attempt == 0 {
            format!("{logical_name}_{}.csv", self.run_stamp)
        } else {
            format!("{logical_name}_{}_{attempt}.csv", self.run_stamp)
        };
        self.dir.join(name)
    }

    /// Claim the first free artifact name by creating it exclusively.
    fn reserve(&self, stage: Stage, logical_name: &str) -> Result<PathBuf, PipelineError> {
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let path = self.candidate(logical_name, attempt);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok(path),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(source) => {
                    return Err(PipelineError::StagingWrite {
                        stage,
                        path,
                        source,
                    })
                }
            }
        }
        Err(PipelineError::StagingWrite {
            stage,
            path: self.candidate(logical_name, 0),
            source: io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("no free artifact name after {MAX_NAME_ATTEMPTS} attempts"),
            ),
        })
    }

    /// Write `dataset` as a header-first CSV under a fresh, run-stamped name.
    pub fn stage<D: CsvArtifact>(
        &self,
        stage: Stage,
        dataset: &D,
        logical_name: &str,
    ) -> Result<ArtifactLocation, PipelineError> {
        let write_err = |path: &Path, source: io::Error| PipelineError::StagingWrite {
            stage,
            path: path.to_path_buf(),
            source,
        };

        let bytes = dataset
            .to_csv_bytes()
            .map_err(|e| write_err(&self.dir, io::Error::new(io::ErrorKind::InvalidData, e)))?;

        fs::create_dir_all(&self.dir).map_err(|e| write_err(&self.dir, e))?;
        let path = self.reserve(stage, logical_name)?;

        let tmp = path.with_extension("csv.tmp");
        let written = write_synced(&tmp, &bytes).and_then(|()| fs::rename(&tmp, &path));
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            let _ = fs::remove_file(&path);
            return Err(write_err(&path, e));
        }

        let location = ArtifactLocation {
            path,
            rows: dataset.row_count(),
            digest: blake3::hash(&bytes).to_hex().to_string(),
        };
        info!(
            %stage,
            path = %location.path.display(),
            rows = location.rows,
            digest = %&location.digest[..12],
            "artifact staged"
        );
        Ok(location)
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

// ── Remote copy ─────────────────────────────────────────────────────

/// Uploads staged raw artifacts to `<prefix>/raw/<file name>`.
pub struct RemotePublisher {
    store: Box<dyn ObjectStore>,
    prefix: String,
}

impl RemotePublisher {
    pub fn new(store: Box<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    pub fn remote_key(&self, file_name: &str) -> String {
        let prefix = self.prefix.trim_matches('/');
        if prefix.is_empty() {
            format!("raw/{file_name}")
        } else {
            format!("{prefix}/raw/{file_name}")
        }
    }

    /// Copy a staged raw artifact to the object store, returning its remote
    /// location.
    pub fn publish_remote(&self, local_path: &Path) -> Result<String, PipelineError> {
        let fail = |reason: String| PipelineError::RemotePublish {
            local: local_path.to_path_buf(),
            reason,
        };

        let file_name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| fail("artifact path has no file name".into()))?;
        let body = fs::read(local_path).map_err(|e| fail(format!("read local artifact: {e}")))?;

        let key = self.remote_key(file_name);
        debug!(store = self.store.name(), %key, bytes = body.len(), "uploading");
        let location = self
            .store
            .put(&key, &body)
            .map_err(|e| fail(e.to_string()))?;

        let digest = blake3::hash(&body).to_hex().to_string();
        info!(
            local = %local_path.display(),
            remote = %location,
            digest = %&digest[..12],
            "raw artifact published"
        );
        Ok(location)
    }
}

// ── Status ──────────────────────────────────────────────────────────

/// One file in the staging directory.
#[derive(Debug, Clone)]
pub struct StagedArtifact {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<DateTime<Local>>,
}

/// List staged `.csv` artifacts, sorted by name. A missing directory is empty;
/// zero-byte reservations of in-flight writes are skipped.
pub fn list_artifacts(dir: &Path) -> io::Result<Vec<StagedArtifact>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut artifacts = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("csv") {
            continue;
        }
        let meta = entry.metadata()?;
        if meta.len() == 0 {
            continue;
        }
        artifacts.push(StagedArtifact {
            name: entry.file_name().to_string_lossy().into_owned(),
            path,
            size: meta.len(),
            modified: meta.modified().ok().map(DateTime::<Local>::from),
        });
    }

    artifacts.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(artifacts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RawDataset, RawPriceRecord};
    use crate::staging::object_store::FsObjectStore;
    use chrono::NaiveDate;

    fn dataset() -> RawDataset {
        RawDataset::new(vec![RawPriceRecord {
            date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            symbol: "AAA".into(),
            open: 10.0,
            high: 11.0,
            low: 9.5,
            close: 10.0,
            adj_close: 10.0,
            volume: 1000,
        }])
    }

    #[test]
    fn run_stamp_format() {
        let at = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(6, 5, 9)
            .unwrap();
        assert_eq!(run_stamp(at), "20240102_060509");
    }

    #[test]
    fn stages_under_run_stamped_name() {
        let dir = tempfile::tempdir().unwrap();
        let writer = StagingWriter::new(dir.path(), "20240102_000000");

        let loc = writer.stage(Stage::Fetch, &dataset(), RAW_LOGICAL_NAME).unwrap();

        assert_eq!(loc.path, dir.path().join("sp500_raw_20240102_000000.csv"));
        assert_eq!(loc.rows, 1);
        let body = fs::read(&loc.path).unwrap();
        assert_eq!(loc.digest, blake3::hash(&body).to_hex().to_string());
        assert!(String::from_utf8(body)
            .unwrap()
            .starts_with("Datetime,Symbol,Open,High,Low,Close,Adj Close,Volume\n"));
    }

    #[test]
    fn never_overwrites_existing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let writer = StagingWriter::new(dir.path(), "20240102_000000");
        let taken = dir.path().join("sp500_raw_20240102_000000.csv");
        fs::write(&taken, "keep me").unwrap();

        let first = writer.stage(Stage::Fetch, &dataset(), RAW_LOGICAL_NAME).unwrap();
        let second = writer.stage(Stage::Fetch, &dataset(), RAW_LOGICAL_NAME).unwrap();

        assert_eq!(fs::read_to_string(&taken).unwrap(), "keep me");
        assert_eq!(first.path, dir.path().join("sp500_raw_20240102_000000_1.csv"));
        assert_eq!(second.path, dir.path().join("sp500_raw_20240102_000000_2.csv"));
        assert_eq!(first.digest, second.digest);
    }

    #[test]
    fn no_tmp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let writer = StagingWriter::new(dir.path().join("nested"), "20240102_000000");
        writer.stage(Stage::Fetch, &dataset(), RAW_LOGICAL_NAME).unwrap();

        let names: Vec<String> = fs::read_dir(dir.path().join("nested"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["sp500_raw_20240102_000000.csv"]);
    }

    #[test]
    fn unwritable_staging_dir_is_staging_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let not_a_dir = dir.path().join("staging");
        fs::write(&not_a_dir, "occupied").unwrap();
        let writer = StagingWriter::new(&not_a_dir, "20240102_000000");

        let err = writer
            .stage(Stage::Transform, &dataset(), TRANSFORMED_LOGICAL_NAME)
            .unwrap_err();
        match &err {
            PipelineError::StagingWrite { stage, path, .. } => {
                assert_eq!(*stage, Stage::Transform);
                assert_eq!(path, &not_a_dir);
            }
            other => panic!("expected StagingWrite, got {other}"),
        }
        assert!(err.is_transient());
        assert_eq!(fs::read_to_string(&not_a_dir).unwrap(), "occupied");
    }

    #[test]
    fn publishes_under_prefix_raw() {
        let local = tempfile::tempdir().unwrap();
        let bucket = tempfile::tempdir().unwrap();
        let writer = StagingWriter::new(local.path(), "20240102_000000");
        let loc = writer.stage(Stage::Fetch, &dataset(), RAW_LOGICAL_NAME).unwrap();

        let store = FsObjectStore::new(bucket.path(), "market-data");
        let remote_copy = store.object_path("sp500/raw/sp500_raw_20240102_000000.csv");
        let publisher = RemotePublisher::new(Box::new(store), "/sp500/");

        let location = publisher.publish_remote(&loc.path).unwrap();
        assert!(location.ends_with("sp500/raw/sp500_raw_20240102_000000.csv"));
        assert_eq!(fs::read(&remote_copy).unwrap(), fs::read(&loc.path).unwrap());
    }

    #[test]
    fn publishing_missing_artifact_fails() {
        let bucket = tempfile::tempdir().unwrap();
        let publisher =
            RemotePublisher::new(Box::new(FsObjectStore::new(bucket.path(), "b")), "sp500");
        let err = publisher
            .publish_remote(Path::new("/nonexistent/sp500_raw_20240102_000000.csv"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::RemotePublish { .. }));
        assert_eq!(err.stage(), Stage::Publish);
    }

    #[test]
    fn empty_prefix_keys_at_raw() {
        let bucket = tempfile::tempdir().unwrap();
        let publisher = RemotePublisher::new(Box::new(FsObjectStore::new(bucket.path(), "b")), "");
        assert_eq!(publisher.remote_key("a.csv"), "raw/a.csv");
    }

    #[test]
    fn lists_only_csv_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.csv"), "x").unwrap();
        fs::write(dir.path().join("a.csv"), "xyz").unwrap();
        fs::write(dir.path().join("a.csv.tmp"), "partial").unwrap();
        fs::write(dir.path().join("c.csv"), "").unwrap();

        let listed = list_artifacts(dir.path()).unwrap();
        let names: Vec<&str> = listed.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["a.csv", "b.csv"]);
        assert_eq!(listed[0].size, 3);

        assert!(list_artifacts(&dir.path().join("missing")).unwrap().is_empty());
    }
}
