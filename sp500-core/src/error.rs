//! Pipeline error taxonomy.
//!
//! Every variant of [`PipelineError`] is fatal to the run. Per-symbol fetch
//! failures live in [`SymbolFetchError`](crate::data::SymbolFetchError) and never
//! reach this type: they are filtered into the fetch report instead.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::schema::SchemaError;

/// The four pipeline stages, used to tag errors and log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Fetch,
    Publish,
    Transform,
    Load,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Publish => "publish",
            Stage::Transform => "transform",
            Stage::Load => "load",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fatal pipeline errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("[fetch] ticker universe unavailable: {reason}")]
    UniverseFetch { reason: String },

    #[error("[fetch] universe loaded but {workers} fetch workers could not start: {reason}")]
    FetchWorkers { workers: usize, reason: String },

    #[error("[{stage}] cannot write staged artifact {}: {source}", .path.display())]
    StagingWrite {
        stage: Stage,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[publish] cannot publish {} to remote store: {reason}", .local.display())]
    RemotePublish { local: PathBuf, reason: String },

    #[error("[{stage}] required handoff value '{key}' was never recorded (upstream stage did not run)")]
    MissingHandoff { stage: Stage, key: &'static str },

    #[error("[{stage}] input artifact not found: {}", .path.display())]
    MissingArtifact { stage: Stage, path: PathBuf },

    #[error("[{stage}] schema violation in {}: {source}", .path.display())]
    Schema {
        stage: Stage,
        path: PathBuf,
        #[source]
        source: SchemaError,
    },

    #[error("[load] bulk load into {table} failed: {reason}")]
    Load { table: String, reason: String },
}

impl PipelineError {
    /// The stage that raised the error.
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::UniverseFetch { .. } => Stage::Fetch,
            PipelineError::FetchWorkers { .. } => Stage::Fetch,
            PipelineError::StagingWrite { stage, .. } => *stage,
            PipelineError::RemotePublish { .. } => Stage::Publish,
            PipelineError::MissingHandoff { stage, .. } => *stage,
            PipelineError::MissingArtifact { stage, .. } => *stage,
            PipelineError::Schema { stage, .. } => *stage,
            PipelineError::Load { .. } => Stage::Load,
        }
    }

    /// True for both flavours of missing input: a handoff key that was never
    /// written, and an artifact that was recorded but is gone.
    pub fn is_missing_input(&self) -> bool {
        matches!(
            self,
            PipelineError::MissingHandoff { .. } | PipelineError::MissingArtifact { .. }
        )
    }

    /// Whether a second attempt of the same stage can plausibly succeed.
    ///
    /// Missing inputs, schema violations and local worker-pool failures are
    /// never retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PipelineError::UniverseFetch { .. }
                | PipelineError::StagingWrite { .. }
                | PipelineError::RemotePublish { .. }
                | PipelineError::Load { .. }
        )
    }
}
