//! Run context: the run's identity plus the handoff values each stage records
//! for the next one.
//!
//! A `RunContext` is never mutated. A stage receives `&RunContext` and returns
//! a new context carrying the keys it produced.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use sp500_core::error::{PipelineError, Stage};
use sp500_core::staging::run_stamp;

/// Keys a stage may record for its successors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffKey {
    /// Local path of the staged raw artifact.
    RawLocation,
    /// Remote location of the published raw artifact.
    RemoteLocation,
    /// Local path of the staged transformed artifact.
    TransformedLocation,
}

impl HandoffKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandoffKey::RawLocation => "raw_location",
            HandoffKey::RemoteLocation => "remote_location",
            HandoffKey::TransformedLocation => "transformed_location",
        }
    }
}

impl fmt::Display for HandoffKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// String values keyed by [`HandoffKey`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct HandoffState {
    values: BTreeMap<HandoffKey, String>,
}

impl HandoffState {
    pub fn get(&self, key: HandoffKey) -> Option<&str> {
        self.values.get(&key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (HandoffKey, &str)> {
        self.values.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    started_at: NaiveDateTime,
    run_stamp: String,
    handoff: HandoffState,
}

impl RunContext {
    pub fn new(started_at: NaiveDateTime) -> Self {
        Self {
            started_at,
            run_stamp: run_stamp(started_at),
            handoff: HandoffState::default(),
        }
    }

    pub fn started_at(&self) -> NaiveDateTime {
        self.started_at
    }

    /// `%Y%m%d_%H%M%S` of the run's start, embedded in artifact names.
    pub fn run_stamp(&self) -> &str {
        &self.run_stamp
    }

    pub fn handoff(&self) -> &HandoffState {
        &self.handoff
    }

    /// A new context with `key` set to `value`; `self` is left untouched.
    pub fn with(&self, key: HandoffKey, value: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.handoff.values.insert(key, value.into());
        next
    }

    /// Value recorded by an upstream stage, or `MissingHandoff` naming the
    /// stage that needed it.
    pub fn require(&self, stage: Stage, key: HandoffKey) -> Result<&str, PipelineError> {
        self.handoff
            .get(key)
            .ok_or(PipelineError::MissingHandoff {
                stage,
                key: key.as_str(),
            })
    }
}
