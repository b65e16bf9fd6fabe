//! Runner collaborator interface.
//!
//! A [`TestRunner`] executes one opaque test unit and reports what happened.
//! The orchestration core never interprets test output itself: framework
//! adapters (Playwright, Selenium, pytest wrappers, plain processes) sit
//! behind this trait, and anything they return as an `Err` is folded into
//! an [`AttemptOutcome::Error`] and handled by retry policy, never
//! crashing the build.
//!
//! The crate ships one concrete adapter, [`process::ProcessRunner`], which
//! spawns a configured command per test unit.

pub mod process;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::catalog::TestUnit;

/// Result type for runner invocations.
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Errors raised by a runner adapter.
///
/// These are per-attempt and retryable (except for cancellation, which the
/// dispatcher treats as a drain signal rather than a test outcome).
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The runner could not be invoked at all (missing binary, spawn
    /// failure, broken adapter transport).
    #[error("runner invocation failed: {0}")]
    Invocation(String),

    /// The attempt was cancelled before it produced an outcome.
    #[error("attempt cancelled")]
    Cancelled,

    /// I/O error talking to the runner.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other adapter-specific errors.
    #[error("runner error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Outcome of a single execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The test passed.
    Passed,

    /// The test ran to completion and failed its assertions.
    Failed,

    /// The per-test deadline expired before the runner finished.
    TimedOut,

    /// The runner itself failed (infrastructure error, not a test
    /// assertion). Retryable like a failure.
    Error,
}

impl AttemptOutcome {
    /// True for outcomes that count as a pass.
    pub fn is_success(self) -> bool {
        self == AttemptOutcome::Passed
    }
}

/// What a runner reports back for one attempt.
#[derive(Debug, Clone)]
pub struct RunnerResponse {
    /// The observed outcome.
    pub outcome: AttemptOutcome,

    /// References to stored artifacts (screenshots, logs), as returned by
    /// the artifact sink. The orchestrator carries these opaquely.
    pub artifact_refs: Vec<String>,
}

impl RunnerResponse {
    /// A response with the given outcome and no artifacts.
    pub fn new(outcome: AttemptOutcome) -> Self {
        Self {
            outcome,
            artifact_refs: Vec::new(),
        }
    }
}

/// Executes a single test unit.
///
/// Implementations must honor `cancel`: when the token fires the runner
/// should stop the underlying test promptly and return
/// [`RunnerError::Cancelled`]. The `attempt` number (1-based) is provided
/// so adapters can tag artifacts per attempt.
#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run(
        &self,
        cancel: &CancellationToken,
        unit: &TestUnit,
        attempt: u32,
    ) -> RunnerResult<RunnerResponse>;
}
