//! Remote object stores used as the durability layer for raw artifacts.
//!
//! Two backends:
//! - `FsObjectStore`: a directory standing in for a bucket (`{root}/{bucket}/{key}`)
//! - `HttpObjectStore`: path-style PUT against an S3-compatible gateway
//!   (`{endpoint}/{bucket}/{key}`), bounded by a client timeout

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("invalid object key '{0}'")]
    InvalidKey(String),

    #[error("object store I/O for '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("object store request for '{key}' failed: {reason}")]
    Http { key: String, reason: String },
}

pub trait ObjectStore: Send + Sync {
    fn name(&self) -> &str;

    /// Store `body` under `key`, returning the object's remote location.
    fn put(&self, key: &str, body: &[u8]) -> Result<String, ObjectStoreError>;
}

/// Keys are relative, `/`-separated and may not climb out of the bucket.
fn validate_key(key: &str) -> Result<(), ObjectStoreError> {
    let path = Path::new(key);
    let ok = !key.is_empty()
        && !key.starts_with('/')
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if ok {
        Ok(())
    } else {
        Err(ObjectStoreError::InvalidKey(key.to_string()))
    }
}

// ── Filesystem ──────────────────────────────────────────────────────

pub struct FsObjectStore {
    root: PathBuf,
    bucket: String,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            bucket: bucket.into(),
        }
    }

    pub fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(&self.bucket).join(key)
    }
}

impl ObjectStore for FsObjectStore {
    fn name(&self) -> &str {
        "fs"
    }

    fn put(&self, key: &str, body: &[u8]) -> Result<String, ObjectStoreError> {
        validate_key(key)?;
        let io_err = |source| ObjectStoreError::Io {
            key: key.to_string(),
            source,
        };

        let path = self.object_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let tmp = path.with_extension("upload.tmp");
        fs::write(&tmp, body).map_err(io_err)?;
        fs::rename(&tmp, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            io_err(e)
        })?;

        let absolute = fs::canonicalize(&path).unwrap_or(path);
        Ok(format!("file://{}", absolute.display()))
    }
}

// ── HTTP (S3-compatible, path style) ────────────────────────────────

pub struct HttpObjectStore {
    client: reqwest::blocking::Client,
    endpoint: String,
    bucket: String,
}

impl HttpObjectStore {
    pub fn new(
        endpoint: impl Into<String>,
        bucket: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            bucket: bucket.into(),
        })
    }

    pub fn object_url(&self, key: &str) -> String {
        format!(
            "{}/{}/{key}",
            self.endpoint.trim_end_matches('/'),
            self.bucket
        )
    }
}

impl ObjectStore for HttpObjectStore {
    fn name(&self) -> &str {
        "http"
    }

    fn put(&self, key: &str, body: &[u8]) -> Result<String, ObjectStoreError> {
        validate_key(key)?;
        let http_err = |reason: String| ObjectStoreError::Http {
            key: key.to_string(),
            reason,
        };

        let resp = self
            .client
            .put(self.object_url(key))
            .header(reqwest::header::CONTENT_TYPE, "text/csv")
            .body(body.to_vec())
            .send()
            .map_err(|e| http_err(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(http_err(format!("HTTP {status}")));
        }
        Ok(format!("s3://{}/{key}", self.bucket))
    }
}
