//! sp500 runner — sequences the daily pipeline.
//!
//! This crate builds on `sp500-core` to provide:
//! - The run context and its handoff state
//! - The coordinator state machine (fetch → publish → transform → load)
//! - The fixed-delay stage retry policy
//! - TOML configuration and the production wiring it describes

pub mod config;
pub mod context;
pub mod coordinator;
pub mod retry;

pub use config::{ConfigError, PipelineConfig};
pub use context::{HandoffKey, HandoffState, RunContext};
pub use coordinator::{Pipeline, PipelineSettings, RunReport, RunState};
pub use retry::RetryPolicy;

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn pipeline_is_send_sync() {
        assert_send::<Pipeline>();
        assert_sync::<Pipeline>();
    }

    #[test]
    fn run_artifacts_are_send_sync() {
        assert_send::<RunContext>();
        assert_sync::<RunContext>();
        assert_send::<RunReport>();
        assert_sync::<RunReport>();
        assert_send::<PipelineConfig>();
        assert_sync::<PipelineConfig>();
    }
}
