//! Test catalog: discovered test units and their outcome history.
//!
//! The catalog holds the full ordered list of discovered test unit ids for
//! one build, plus per-unit history (failure streaks, rolling average
//! duration) that feeds smart ordering. History is keyed by the bare unit
//! id: matrix variants of the same unit fold into a single history entry,
//! which is what the orderer consumes before expansion.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::runner::AttemptOutcome;

/// Smoothing factor for the rolling average duration.
const EMA_ALPHA: f64 = 0.3;

/// Result type for catalog operations.
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Errors raised while ingesting discovered test ids.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// Discovery produced no test ids at all.
    #[error("no test units discovered")]
    Empty,

    /// The same test id was discovered more than once.
    #[error("duplicate test unit id: {0}")]
    DuplicateUnit(String),
}

/// One discoverable, independently runnable test case.
///
/// The identity is immutable: the discovered `id` plus an optional matrix
/// key assigned during shard planning (e.g. `chrome+linux`). Everything
/// mutable about a unit lives in [`UnitHistory`] or in the aggregator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TestUnit {
    /// Unique identifier as reported by discovery.
    pub id: String,

    /// Matrix variant key, set when the planner expands the unit across
    /// matrix dimensions. `None` outside matrix mode.
    pub matrix_key: Option<String>,
}

impl TestUnit {
    /// Creates a test unit with no matrix variant.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            matrix_key: None,
        }
    }

    /// Sets the matrix variant key.
    pub fn with_matrix_key(mut self, key: impl Into<String>) -> Self {
        self.matrix_key = Some(key.into());
        self
    }

    /// The key used wherever a unit must be unique per executable variant:
    /// `id[matrix_key]` in matrix mode, the bare id otherwise.
    pub fn qualified_id(&self) -> String {
        match &self.matrix_key {
            Some(key) => format!("{}[{}]", self.id, key),
            None => self.id.clone(),
        }
    }
}

/// Per-unit outcome history, persisted across builds for smart ordering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitHistory {
    /// Outcome of the most recent completed attempt.
    pub last_status: Option<AttemptOutcome>,

    /// Number of consecutive non-passing attempts, reset on any pass.
    pub consecutive_failures: u32,

    /// Exponential moving average of attempt duration in milliseconds.
    /// Zero means no duration has been observed yet.
    pub average_duration_ms: f64,
}

impl UnitHistory {
    /// Folds one completed attempt into the history.
    pub fn record(&mut self, outcome: AttemptOutcome, duration_ms: f64) {
        if outcome == AttemptOutcome::Passed {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
        }
        self.last_status = Some(outcome);

        if self.average_duration_ms == 0.0 {
            self.average_duration_ms = duration_ms;
        } else {
            self.average_duration_ms =
                EMA_ALPHA * duration_ms + (1.0 - EMA_ALPHA) * self.average_duration_ms;
        }
    }
}

/// The full set of test units discovered for one build.
///
/// Created once at build start from the discovery collaborator's id list
/// and never shrinks within a build. Outcome bookkeeping is guarded by a
/// mutex so worker loops can record attempts concurrently.
#[derive(Debug)]
pub struct Catalog {
    units: Vec<TestUnit>,
    history: Mutex<HashMap<String, UnitHistory>>,
}

impl Catalog {
    /// Builds a catalog from discovered test ids.
    ///
    /// The ids must be non-empty and free of duplicates; discovery order is
    /// preserved and later used as the ordering tiebreaker.
    ///
    /// # Errors
    ///
    /// [`CatalogError::Empty`] if `ids` is empty, [`CatalogError::DuplicateUnit`]
    /// on the first repeated id.
    pub fn load(ids: impl IntoIterator<Item = String>) -> CatalogResult<Self> {
        let mut seen = HashMap::new();
        let mut units = Vec::new();

        for id in ids {
            if seen.insert(id.clone(), ()).is_some() {
                return Err(CatalogError::DuplicateUnit(id));
            }
            units.push(TestUnit::new(id));
        }

        if units.is_empty() {
            return Err(CatalogError::Empty);
        }

        Ok(Self {
            units,
            history: Mutex::new(HashMap::new()),
        })
    }

    /// Seeds history loaded from a persistent store, replacing any
    /// previously seeded entries.
    pub fn seed_history(&self, histories: HashMap<String, UnitHistory>) {
        *self.history.lock().unwrap() = histories;
    }

    /// The discovered units, in discovery order.
    pub fn units(&self) -> &[TestUnit] {
        &self.units
    }

    /// Number of discovered units.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// True if no units were discovered (unreachable after a successful
    /// [`load`](Self::load)).
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Records one completed attempt for a unit.
    ///
    /// Updates the rolling average duration and the failure streak used by
    /// smart ordering. Pure bookkeeping; retry decisions live elsewhere.
    pub fn record_outcome(&self, id: &str, outcome: AttemptOutcome, duration_ms: f64) {
        let mut history = self.history.lock().unwrap();
        history.entry(id.to_string()).or_default().record(outcome, duration_ms);
    }

    /// A point-in-time copy of all unit histories.
    pub fn snapshot_history(&self) -> HashMap<String, UnitHistory> {
        self.history.lock().unwrap().clone()
    }
}
