//! Failure-aware queue ordering.
//!
//! Units that failed in recent builds are scheduled first so regressions
//! surface as early as possible, and among equally-suspect units the
//! quicker ones go first so feedback is not starved by a single slow flaky
//! test. Ordering only sets queue priority; it makes no guarantee about
//! global completion order once units run in parallel.

use std::collections::HashMap;

use crate::catalog::{TestUnit, UnitHistory};

/// Reorders the pending queue using historical failure data.
///
/// Pure and deterministic: identical `(units, history)` input produces
/// identical output across calls. Units without history sort as
/// zero-history (no failures, no observed duration).
pub struct SmartOrderer;

impl SmartOrderer {
    /// Orders units by descending failure streak, then ascending average
    /// duration, with discovery order as the final tiebreaker (the sort is
    /// stable).
    pub fn order(units: &[TestUnit], history: &HashMap<String, UnitHistory>) -> Vec<TestUnit> {
        let zero = UnitHistory::default();
        let mut ordered: Vec<TestUnit> = units.to_vec();

        ordered.sort_by(|a, b| {
            let ha = history.get(&a.id).unwrap_or(&zero);
            let hb = history.get(&b.id).unwrap_or(&zero);
            hb.consecutive_failures
                .cmp(&ha.consecutive_failures)
                .then(ha.average_duration_ms.total_cmp(&hb.average_duration_ms))
        });

        ordered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::AttemptOutcome;

    fn history_entry(failures: u32, avg_ms: f64) -> UnitHistory {
        UnitHistory {
            last_status: Some(if failures > 0 {
                AttemptOutcome::Failed
            } else {
                AttemptOutcome::Passed
            }),
            consecutive_failures: failures,
            average_duration_ms: avg_ms,
        }
    }

    fn units(ids: &[&str]) -> Vec<TestUnit> {
        ids.iter().map(|id| TestUnit::new(*id)).collect()
    }

    #[test]
    fn test_failing_units_run_first() {
        let units = units(&["a", "b", "c"]);
        let mut history = HashMap::new();
        history.insert("b".to_string(), history_entry(2, 500.0));
        history.insert("c".to_string(), history_entry(1, 100.0));

        let ordered = SmartOrderer::order(&units, &history);
        let ids: Vec<_> = ordered.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, ["b", "c", "a"]);
    }

    #[test]
    fn test_fast_failures_before_slow_failures() {
        let units = units(&["slow", "fast"]);
        let mut history = HashMap::new();
        history.insert("slow".to_string(), history_entry(1, 90_000.0));
        history.insert("fast".to_string(), history_entry(1, 800.0));

        let ordered = SmartOrderer::order(&units, &history);
        assert_eq!(ordered[0].id, "fast");
        assert_eq!(ordered[1].id, "slow");
    }

    #[test]
    fn test_discovery_order_breaks_ties() {
        let units = units(&["x", "y", "z"]);
        let history = HashMap::new();

        let ordered = SmartOrderer::order(&units, &history);
        let ids: Vec<_> = ordered.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, ["x", "y", "z"]);
    }

    #[test]
    fn test_deterministic_across_calls() {
        let units = units(&["a", "b", "c", "d", "e"]);
        let mut history = HashMap::new();
        history.insert("c".to_string(), history_entry(3, 40.0));
        history.insert("e".to_string(), history_entry(3, 40.0));
        history.insert("a".to_string(), history_entry(0, 10.0));

        let first = SmartOrderer::order(&units, &history);
        let second = SmartOrderer::order(&units, &history);
        assert_eq!(first, second);

        // Equal history: discovery order decides.
        let ids: Vec<_> = first.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids[0], "c");
        assert_eq!(ids[1], "e");
    }

    #[test]
    fn test_missing_history_is_zero_history() {
        let units = units(&["seen", "unseen"]);
        let mut history = HashMap::new();
        history.insert("seen".to_string(), history_entry(0, 200.0));

        // Same streak; the unseen unit has no observed duration and sorts
        // ahead of the known 200ms one.
        let ordered = SmartOrderer::order(&units, &history);
        assert_eq!(ordered[0].id, "unseen");
    }
}
