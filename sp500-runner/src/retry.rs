//! Fixed-delay stage retry.
//!
//! A failed stage is re-run as a whole at most `retries` times, after `delay`.
//! Only transient errors are retried; missing inputs and schema violations
//! fail at once.

use std::time::Duration;
use tracing::warn;

use sp500_core::error::{PipelineError, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 1,
            delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            retries: 0,
            delay: Duration::ZERO,
        }
    }

    /// Run `op`, retrying transient failures per this policy.
    pub fn run<T>(
        &self,
        stage: Stage,
        mut op: impl FnMut() -> Result<T, PipelineError>,
    ) -> Result<T, PipelineError> {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.retries => {
                    attempt += 1;
                    warn!(
                        %stage,
                        attempt,
                        retries = self.retries,
                        delay_secs = self.delay.as_secs(),
                        error = %e,
                        "stage failed, retrying"
                    );
                    if !self.delay.is_zero() {
                        std::thread::sleep(self.delay);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn quick(retries: u32) -> RetryPolicy {
        RetryPolicy {
            retries,
            delay: Duration::ZERO,
        }
    }

    fn transient() -> PipelineError {
        PipelineError::Load {
            table: "SP500_DATA".into(),
            reason: "database is locked".into(),
        }
    }

    #[test]
    fn transient_failure_is_retried_once() {
        let mut calls = 0;
        let result = quick(1).run(Stage::Load, || {
            calls += 1;
            if calls == 1 {
                Err(transient())
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 2);
    }

    #[test]
    fn gives_up_after_retries() {
        let mut calls = 0;
        let result: Result<(), _> = quick(1).run(Stage::Load, || {
            calls += 1;
            Err(transient())
        });
        assert!(result.is_err());
        assert_eq!(calls, 2);
    }

    #[test]
    fn missing_input_is_not_retried() {
        let mut calls = 0;
        let result: Result<(), _> = quick(3).run(Stage::Transform, || {
            calls += 1;
            Err(PipelineError::MissingArtifact {
                stage: Stage::Transform,
                path: PathBuf::from("gone.csv"),
            })
        });
        assert!(result.unwrap_err().is_missing_input());
        assert_eq!(calls, 1);
    }

    #[test]
    fn defaults_match_single_fixed_retry() {
        let p = RetryPolicy::default();
        assert_eq!(p.retries, 1);
        assert_eq!(p.delay, Duration::from_secs(300));
        assert_eq!(RetryPolicy::none().retries, 0);
    }
}
