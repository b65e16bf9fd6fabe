//! Shard planning: matrix expansion and batching.
//!
//! The planner turns the (already ordered) unit list into shards sized for
//! the configured concurrency. In matrix mode each unit is first expanded
//! into the cartesian product of the configured dimensions (e.g. 3
//! browsers x 2 platforms = 6 variants per unit). With autosplit enabled,
//! variants are chunked into `ceil(total / concurrency)` sized batches;
//! with it disabled every variant becomes its own shard, which is the
//! granularity retries always use.

use serde::Serialize;

use crate::catalog::TestUnit;

/// Result type for planning operations.
pub type PlanResult<T> = Result<T, PlanError>;

/// Errors raised while planning shards.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// Concurrency must be at least 1.
    #[error("invalid concurrency {0}: must be at least 1")]
    InvalidConcurrency(usize),

    /// A matrix dimension with no values would erase every unit.
    #[error("matrix dimension {0} is empty")]
    EmptyMatrixDimension(usize),
}

/// A batch of test units dispatched together to one worker slot.
///
/// Shards are consumed exactly once by the dispatcher; retries re-enter
/// the queue as fresh singleton shards.
#[derive(Debug, Clone, Serialize)]
pub struct Shard {
    /// The units in this shard, in execution order.
    pub units: Vec<TestUnit>,

    /// Target platform descriptor, set when every unit in the shard shares
    /// one matrix key. Passed through to the runner, never interpreted.
    pub descriptor: Option<String>,
}

impl Shard {
    /// A shard holding a single unit, as used for retries.
    pub fn singleton(unit: TestUnit) -> Self {
        let descriptor = unit.matrix_key.clone();
        Self {
            units: vec![unit],
            descriptor,
        }
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// Partitions the catalog into shards for a target concurrency.
pub struct ShardPlanner {
    concurrency: usize,
    autosplit: bool,
    matrix_dims: Vec<Vec<String>>,
}

impl ShardPlanner {
    /// Creates a planner for the given concurrency.
    ///
    /// With `autosplit` enabled, units are batched so roughly one shard
    /// exists per worker slot; disabled, each unit (or matrix variant)
    /// becomes its own shard for accurate retry isolation.
    pub fn new(concurrency: usize, autosplit: bool) -> Self {
        Self {
            concurrency,
            autosplit,
            matrix_dims: Vec::new(),
        }
    }

    /// Enables matrix mode with the given dimensions.
    pub fn with_matrix(mut self, dims: Vec<Vec<String>>) -> Self {
        self.matrix_dims = dims;
        self
    }

    /// Plans shards for the given units.
    ///
    /// # Errors
    ///
    /// [`PlanError::InvalidConcurrency`] if the planner was built with
    /// concurrency 0, [`PlanError::EmptyMatrixDimension`] if any matrix
    /// dimension has no values.
    pub fn plan(&self, units: &[TestUnit]) -> PlanResult<Vec<Shard>> {
        if self.concurrency == 0 {
            return Err(PlanError::InvalidConcurrency(self.concurrency));
        }
        if let Some(idx) = self.matrix_dims.iter().position(|d| d.is_empty()) {
            return Err(PlanError::EmptyMatrixDimension(idx));
        }

        let expanded = self.expand(units);
        if expanded.is_empty() {
            return Ok(Vec::new());
        }

        if !self.autosplit {
            return Ok(expanded.into_iter().map(Shard::singleton).collect());
        }

        let batch_size = expanded.len().div_ceil(self.concurrency).max(1);
        let shards = expanded
            .chunks(batch_size)
            .map(|chunk| {
                let descriptor = uniform_key(chunk);
                Shard {
                    units: chunk.to_vec(),
                    descriptor,
                }
            })
            .collect();

        Ok(shards)
    }

    /// Expands units into matrix variants; unit order is the major key so
    /// the orderer's priority survives expansion.
    fn expand(&self, units: &[TestUnit]) -> Vec<TestUnit> {
        if self.matrix_dims.is_empty() {
            return units.to_vec();
        }

        let keys = matrix_keys(&self.matrix_dims);
        let mut expanded = Vec::with_capacity(units.len() * keys.len());
        for unit in units {
            for key in &keys {
                expanded.push(unit.clone().with_matrix_key(key.clone()));
            }
        }
        expanded
    }
}

/// Cartesian product of the dimensions, joined with `+`.
fn matrix_keys(dims: &[Vec<String>]) -> Vec<String> {
    let mut keys = vec![String::new()];
    for dim in dims {
        let mut next = Vec::with_capacity(keys.len() * dim.len());
        for prefix in &keys {
            for value in dim {
                if prefix.is_empty() {
                    next.push(value.clone());
                } else {
                    next.push(format!("{prefix}+{value}"));
                }
            }
        }
        keys = next;
    }
    keys
}

fn uniform_key(units: &[TestUnit]) -> Option<String> {
    let first = units.first()?.matrix_key.clone()?;
    units
        .iter()
        .all(|u| u.matrix_key.as_deref() == Some(first.as_str()))
        .then_some(first)
}
