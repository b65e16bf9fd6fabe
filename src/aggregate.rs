//! Result aggregation and the build-level report.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::runner::AttemptOutcome;

/// Terminal status of a test unit within one build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalStatus {
    /// Passed on the first attempt.
    FinalPassed,

    /// Failed at least once but passed within the retry budget. Kept
    /// distinct from a clean pass so flaky rate stays visible.
    FlakyPassed,

    /// Exhausted the retry budget without passing.
    FinalFailed,

    /// The build was cancelled or timed out before the unit reached a
    /// terminal outcome.
    Aborted,
}

impl FinalStatus {
    /// True for statuses that count as a pass.
    pub fn is_success(self) -> bool {
        matches!(self, FinalStatus::FinalPassed | FinalStatus::FlakyPassed)
    }

    /// True for terminal failure or abort.
    pub fn is_failure(self) -> bool {
        !self.is_success()
    }
}

/// One completed (or timed-out, or errored) execution of a test unit.
///
/// Created when the dispatcher assigns work to a slot, owned exclusively
/// by that slot until completion, then appended to the aggregator's
/// attempt log. Immutable once finished.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionAttempt {
    /// Discovered test id.
    pub unit_id: String,

    /// Matrix variant key, if any.
    pub matrix_key: Option<String>,

    /// 1-based attempt number for this unit.
    pub attempt_number: u32,

    /// When the slot invoked the runner.
    pub started_at: DateTime<Utc>,

    /// When the runner returned (or the deadline expired).
    pub finished_at: DateTime<Utc>,

    /// What happened.
    pub outcome: AttemptOutcome,

    /// Opaque refs to stored artifacts for this attempt.
    pub artifact_refs: Vec<String>,
}

impl ExecutionAttempt {
    /// Per-variant key, matching [`TestUnit::qualified_id`](crate::catalog::TestUnit::qualified_id).
    pub fn qualified_id(&self) -> String {
        match &self.matrix_key {
            Some(key) => format!("{}[{}]", self.unit_id, key),
            None => self.unit_id.clone(),
        }
    }

    /// Wall-clock duration of the attempt in milliseconds.
    pub fn duration_ms(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds().max(0) as f64
    }
}

/// Aggregated results of an entire build.
///
/// A consistent snapshot: counts and the per-unit map are taken under one
/// lock, so the totals always add up even while workers are still
/// recording. Serialization to JUnit/HTML is the caller's concern; the
/// struct is plain data (and `Serialize` for a JSON dump).
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    /// Identifier of this build.
    pub build_id: String,

    /// Total number of executable units (matrix variants included).
    pub total: usize,

    /// Units that passed on their first attempt.
    pub passed: usize,

    /// Units that passed only after retrying.
    pub flaky_passed: usize,

    /// Units that exhausted their retry budget.
    pub failed: usize,

    /// Units the build gave up on before a terminal outcome.
    pub aborted: usize,

    /// Attempts in flight at snapshot time.
    pub running: usize,

    /// Units not yet dispatched at snapshot time.
    pub pending: usize,

    /// Wall-clock time since the build started.
    pub duration: Duration,

    /// Terminal status per qualified unit id. Complete (one entry per
    /// executable unit) once the build finishes.
    pub per_unit: BTreeMap<String, FinalStatus>,

    /// Every attempt made during the build, in completion order.
    pub attempts: Vec<ExecutionAttempt>,
}

impl BuildReport {
    /// True if every unit passed, cleanly or after retries.
    pub fn success(&self) -> bool {
        self.failed == 0 && self.aborted == 0
    }

    /// Conventional exit code: 1 on failures or aborts, 34 when green but
    /// flaky, 0 on a clean pass.
    pub fn exit_code(&self) -> i32 {
        if self.failed > 0 || self.aborted > 0 {
            1
        } else if self.flaky_passed > 0 {
            34
        } else {
            0
        }
    }
}

struct AggregatorInner {
    per_unit: BTreeMap<String, FinalStatus>,
    attempts: Vec<ExecutionAttempt>,
    running: usize,
}

/// Collects per-attempt outcomes into a build-level report.
///
/// `record` is idempotent per unit: the first terminal status wins and
/// later writes are no-ops, which shields the report from duplicate
/// completion signals out of a racy runner adapter.
pub struct ResultAggregator {
    build_id: String,
    total: usize,
    started: Instant,
    inner: Mutex<AggregatorInner>,
}

impl ResultAggregator {
    /// Creates an aggregator for a build of `total` executable units.
    pub fn new(build_id: impl Into<String>, total: usize) -> Self {
        Self {
            build_id: build_id.into(),
            total,
            started: Instant::now(),
            inner: Mutex::new(AggregatorInner {
                per_unit: BTreeMap::new(),
                attempts: Vec::new(),
                running: 0,
            }),
        }
    }

    /// Notes that an attempt has begun (live `running` tally).
    pub fn attempt_started(&self) {
        self.inner.lock().unwrap().running += 1;
    }

    /// Appends a finished attempt to the log and drops the running tally.
    pub fn attempt_finished(&self, attempt: ExecutionAttempt) {
        let mut inner = self.inner.lock().unwrap();
        inner.running = inner.running.saturating_sub(1);
        inner.attempts.push(attempt);
    }

    /// Records a unit's terminal status.
    ///
    /// Returns `true` if this call established the status, `false` if the
    /// unit already had one (the write is discarded).
    pub fn record(&self, qualified_id: &str, status: FinalStatus) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.per_unit.contains_key(qualified_id) {
            return false;
        }
        inner.per_unit.insert(qualified_id.to_string(), status);
        true
    }

    /// Number of units with a terminal status so far.
    pub fn finalized(&self) -> usize {
        self.inner.lock().unwrap().per_unit.len()
    }

    /// A consistent snapshot of the build state. Safe to call while
    /// workers are recording.
    pub fn summary(&self) -> BuildReport {
        let inner = self.inner.lock().unwrap();

        let mut passed = 0;
        let mut flaky_passed = 0;
        let mut failed = 0;
        let mut aborted = 0;
        for status in inner.per_unit.values() {
            match status {
                FinalStatus::FinalPassed => passed += 1,
                FinalStatus::FlakyPassed => flaky_passed += 1,
                FinalStatus::FinalFailed => failed += 1,
                FinalStatus::Aborted => aborted += 1,
            }
        }

        let finalized = inner.per_unit.len();
        BuildReport {
            build_id: self.build_id.clone(),
            total: self.total,
            passed,
            flaky_passed,
            failed,
            aborted,
            running: inner.running,
            pending: self.total.saturating_sub(finalized + inner.running),
            duration: self.started.elapsed(),
            per_unit: inner.per_unit.clone(),
            attempts: inner.attempts.clone(),
        }
    }
}
