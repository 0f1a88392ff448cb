//! Pipeline coordinator — sequences the four stages and threads the run
//! context between them.
//!
//! ```text
//! Pending ─fetch─▶ Fetched ─publish─▶ Staged ─transform─▶ Transformed ─load─▶ Loaded
//!    └──────────────┴─────────────────┴────────────────────┴──────▶ Failed
//! ```
//!
//! Any fatal error moves the run to `Failed`; nothing already written is
//! rolled back. Each stage is retried as a unit per the [`RetryPolicy`].

use chrono::NaiveDateTime;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use sp500_core::data::{
    fetch_raw_dataset, FetchOptions, FetchReport, MarketDataProvider, UniverseSource,
};
use sp500_core::error::{PipelineError, Stage};
use sp500_core::load::{load, LoadMode, Warehouse};
use sp500_core::staging::{RemotePublisher, StagingWriter, RAW_LOGICAL_NAME};
use sp500_core::transform::{transform, TransformOutcome};

use crate::config::{ConfigError, PipelineConfig};
use crate::context::{HandoffKey, HandoffState, RunContext};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Fetched,
    Staged,
    Transformed,
    Loaded,
    Failed,
}

impl RunState {
    /// Successor on success; `None` once terminal.
    pub fn next(self) -> Option<RunState> {
        match self {
            RunState::Pending => Some(RunState::Fetched),
            RunState::Fetched => Some(RunState::Staged),
            RunState::Staged => Some(RunState::Transformed),
            RunState::Transformed => Some(RunState::Loaded),
            RunState::Loaded | RunState::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.next().is_none()
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Pending => "pending",
            RunState::Fetched => "fetched",
            RunState::Staged => "staged",
            RunState::Transformed => "transformed",
            RunState::Loaded => "loaded",
            RunState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Summary of one run, returned to the caller and logged.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_stamp: String,
    pub state: RunState,
    pub universe_size: usize,
    pub rows_fetched: usize,
    pub failed_symbols: Vec<String>,
    pub rows_loaded: usize,
    pub handoff: HandoffState,
    pub failed_stage: Option<String>,
    pub error: Option<String>,
}

impl RunReport {
    fn new(ctx: &RunContext) -> Self {
        Self {
            run_stamp: ctx.run_stamp().to_string(),
            state: RunState::Pending,
            universe_size: 0,
            rows_fetched: 0,
            failed_symbols: Vec::new(),
            rows_loaded: 0,
            handoff: ctx.handoff().clone(),
            failed_stage: None,
            error: None,
        }
    }

    fn advance(&mut self, ctx: &RunContext) {
        if let Some(next) = self.state.next() {
            self.state = next;
        }
        self.handoff = ctx.handoff().clone();
        info!(run = %self.run_stamp, state = %self.state, "stage complete");
    }

    pub fn succeeded(&self) -> bool {
        self.state == RunState::Loaded
    }
}

/// Settings that are not collaborators.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub staging_dir: PathBuf,
    pub table: String,
    pub mode: LoadMode,
    pub fetch: FetchOptions,
    pub retry: RetryPolicy,
}

pub struct Pipeline {
    universe: Box<dyn UniverseSource>,
    provider: Box<dyn MarketDataProvider>,
    publisher: RemotePublisher,
    warehouse: Box<dyn Warehouse>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        universe: Box<dyn UniverseSource>,
        provider: Box<dyn MarketDataProvider>,
        publisher: RemotePublisher,
        warehouse: Box<dyn Warehouse>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            universe,
            provider,
            publisher,
            warehouse,
            settings,
        }
    }

    /// Wire the production collaborators described by `config`.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            config.universe_source(),
            Box::new(config.provider()?),
            config.publisher()?,
            Box::new(config.warehouse()),
            PipelineSettings {
                staging_dir: config.staging.data_dir.clone(),
                table: config.warehouse.table.clone(),
                mode: config.warehouse.mode,
                fetch: config.fetch_options(),
                retry: config.retry_policy(),
            },
        ))
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    fn writer(&self, ctx: &RunContext) -> StagingWriter {
        StagingWriter::new(&self.settings.staging_dir, ctx.run_stamp())
    }

    // ── Stages ───────────────────────────────────────────────────────

    /// Pending → Fetched: build the raw dataset and stage it as `sp500_raw`.
    pub fn fetch_stage(
        &self,
        ctx: &RunContext,
    ) -> Result<(RunContext, FetchReport), PipelineError> {
        let writer = self.writer(ctx);
        self.settings.retry.run(Stage::Fetch, || {
            let report = fetch_raw_dataset(
                self.universe.as_ref(),
                self.provider.as_ref(),
                &self.settings.fetch,
            )?;
            let location = writer.stage(Stage::Fetch, &report.dataset, RAW_LOGICAL_NAME)?;
            let next = ctx.with(HandoffKey::RawLocation, location.path.display().to_string());
            Ok((next, report))
        })
    }

    /// Fetched → Staged: copy the raw artifact to the remote store.
    pub fn publish_stage(&self, ctx: &RunContext) -> Result<RunContext, PipelineError> {
        let raw = ctx.require(Stage::Publish, HandoffKey::RawLocation)?;
        let remote = self
            .settings
            .retry
            .run(Stage::Publish, || self.publisher.publish_remote(Path::new(raw)))?;
        Ok(ctx.with(HandoffKey::RemoteLocation, remote))
    }

    /// Staged → Transformed: transform the local raw artifact.
    ///
    /// Requires the remote copy to exist, so a run never transforms data
    /// that was not made durable first.
    pub fn transform_stage(
        &self,
        ctx: &RunContext,
    ) -> Result<(RunContext, TransformOutcome), PipelineError> {
        let raw = ctx.require(Stage::Transform, HandoffKey::RawLocation)?;
        ctx.require(Stage::Transform, HandoffKey::RemoteLocation)?;

        let writer = self.writer(ctx);
        let outcome = self
            .settings
            .retry
            .run(Stage::Transform, || transform(Path::new(raw), &writer))?;
        let next = ctx.with(
            HandoffKey::TransformedLocation,
            outcome.location.path.display().to_string(),
        );
        Ok((next, outcome))
    }

    /// Transformed → Loaded: bulk-load the transformed artifact.
    pub fn load_stage(&self, ctx: &RunContext) -> Result<usize, PipelineError> {
        let transformed = ctx.require(Stage::Load, HandoffKey::TransformedLocation)?;
        self.settings.retry.run(Stage::Load, || {
            load(
                Path::new(transformed),
                self.warehouse.as_ref(),
                &self.settings.table,
                self.settings.mode,
            )
        })
    }

    // ── Run ──────────────────────────────────────────────────────────

    /// Execute one full run starting at `started_at`.
    pub fn run(&self, started_at: NaiveDateTime) -> RunReport {
        let ctx = RunContext::new(started_at);
        let mut report = RunReport::new(&ctx);
        info!(
            run = %report.run_stamp,
            universe = self.universe.name(),
            provider = self.provider.name(),
            warehouse = self.warehouse.name(),
            "run started"
        );

        match self.drive(ctx, &mut report) {
            Ok(()) => info!(
                run = %report.run_stamp,
                fetched = report.rows_fetched,
                failed_symbols = report.failed_symbols.len(),
                loaded = report.rows_loaded,
                "run complete"
            ),
            Err(e) => {
                error!(
                    run = %report.run_stamp,
                    stage = %e.stage(),
                    reached = %report.state,
                    error = %e,
                    "run failed"
                );
                report.state = RunState::Failed;
                report.failed_stage = Some(e.stage().to_string());
                report.error = Some(e.to_string());
            }
        }
        report
    }

    fn drive(&self, ctx: RunContext, report: &mut RunReport) -> Result<(), PipelineError> {
        let (ctx, fetched) = self.fetch_stage(&ctx)?;
        report.universe_size = fetched.universe_size;
        report.rows_fetched = fetched.dataset.len();
        report.failed_symbols = fetched.failures.into_iter().map(|f| f.symbol).collect();
        report.advance(&ctx);

        let ctx = self.publish_stage(&ctx)?;
        report.advance(&ctx);

        let (ctx, _) = self.transform_stage(&ctx)?;
        report.advance(&ctx);

        report.rows_loaded = self.load_stage(&ctx)?;
        report.advance(&ctx);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_advance_linearly() {
        let mut state = RunState::Pending;
        let mut seen = vec![state];
        while let Some(next) = state.next() {
            state = next;
            seen.push(state);
        }
        assert_eq!(
            seen,
            vec![
                RunState::Pending,
                RunState::Fetched,
                RunState::Staged,
                RunState::Transformed,
                RunState::Loaded,
            ]
        );
        assert!(RunState::Failed.is_terminal());
        assert!(!RunState::Staged.is_terminal());
    }

    #[test]
    fn state_names_are_lowercase() {
        assert_eq!(RunState::Transformed.to_string(), "transformed");
        assert_eq!(
            serde_json::to_string(&RunState::Failed).unwrap(),
            "\"failed\""
        );
    }
}
