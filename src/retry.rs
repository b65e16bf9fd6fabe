//! Retry policy and flakiness accounting.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::aggregate::{ExecutionAttempt, FinalStatus};
use crate::runner::AttemptOutcome;

/// What to do with a unit after a completed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Re-enqueue at the front of the pending queue, no backoff.
    Retry,

    /// The unit is done; record this status.
    Terminal(FinalStatus),
}

/// Per-unit ledger: (attempts started, attempts passed).
type Ledger = HashMap<String, (u32, u32)>;

/// Decides whether failed attempts are retried and tracks attempt counts.
///
/// A unit is retried while `attempt_number <= max_retries`, so it makes at
/// most `max_retries + 1` attempts. A unit that passes on any attempt
/// after the first is terminal as [`FinalStatus::FlakyPassed`], keeping
/// the instability visible instead of folding it into a clean pass.
#[derive(Clone)]
pub struct RetryManager {
    max_retries: u32,
    attempts: Arc<Mutex<Ledger>>,
}

impl RetryManager {
    /// Creates a manager allowing `max_retries` retries per unit.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            attempts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Maximum retries per unit.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Registers the start of an attempt and returns its 1-based number.
    pub fn begin_attempt(&self, qualified_id: &str) -> u32 {
        let mut attempts = self.attempts.lock().unwrap();
        let entry = attempts.entry(qualified_id.to_string()).or_insert((0, 0));
        entry.0 += 1;
        entry.0
    }

    /// Attempts started so far for a unit.
    pub fn attempts_for(&self, qualified_id: &str) -> u32 {
        let attempts = self.attempts.lock().unwrap();
        attempts.get(qualified_id).map(|(count, _)| *count).unwrap_or(0)
    }

    /// Routes a completed attempt: retry, or terminal with which status.
    pub fn decide(&self, attempt: &ExecutionAttempt) -> Decision {
        let key = attempt.qualified_id();

        if attempt.outcome == AttemptOutcome::Passed {
            if let Some(entry) = self.attempts.lock().unwrap().get_mut(&key) {
                entry.1 += 1;
            }
            return if attempt.attempt_number > 1 {
                Decision::Terminal(FinalStatus::FlakyPassed)
            } else {
                Decision::Terminal(FinalStatus::FinalPassed)
            };
        }

        if attempt.attempt_number <= self.max_retries {
            Decision::Retry
        } else {
            Decision::Terminal(FinalStatus::FinalFailed)
        }
    }

    /// True if the unit both failed and passed at least once.
    pub fn is_flaky(&self, qualified_id: &str) -> bool {
        let attempts = self.attempts.lock().unwrap();
        match attempts.get(qualified_id) {
            Some((count, passes)) => *count > 1 && *passes > 0 && *passes < *count,
            None => false,
        }
    }

    /// All units that needed a retry to pass.
    pub fn flaky_units(&self) -> Vec<String> {
        let attempts = self.attempts.lock().unwrap();
        attempts
            .iter()
            .filter(|(_, (count, passes))| *count > 1 && *passes > 0 && *passes < *count)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Aggregate retry statistics.
    pub fn stats(&self) -> RetryStats {
        let attempts = self.attempts.lock().unwrap();

        let units_attempted = attempts.len();
        let total_retries: u32 = attempts.values().map(|(count, _)| count.saturating_sub(1)).sum();
        let flaky_units = attempts
            .values()
            .filter(|(count, passes)| *count > 1 && *passes > 0 && *passes < *count)
            .count();

        RetryStats {
            units_attempted,
            total_retries,
            flaky_units,
        }
    }
}

/// Statistics about retry activity in one build.
#[derive(Debug, Clone)]
pub struct RetryStats {
    /// Unique units that started at least one attempt.
    pub units_attempted: usize,

    /// Attempts beyond each unit's first.
    pub total_retries: u32,

    /// Units that failed and then passed.
    pub flaky_units: usize,
}
