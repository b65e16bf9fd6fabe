//! Build orchestration.
//!
//! The orchestrator coordinates one build end to end: discovery, smart
//! ordering, shard planning, concurrent dispatch, retries, and result
//! aggregation.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                         Orchestrator                               │
//! │                                                                    │
//! │  Discovery ──► Catalog ──► SmartOrderer ──► ShardPlanner           │
//! │                                                  │                 │
//! │                                                  ▼                 │
//! │  ┌──────────────────────── Dispatcher ─────────────────────────┐   │
//! │  │  ShardQueue ──► WorkerPool slots ──► TestRunner (external)  │   │
//! │  │        ▲                                   │                │   │
//! │  │        └──────── RetryManager ◄────────────┘                │   │
//! │  └──────────────────────────┬────────────────────────────────-─┘   │
//! │                             ▼                                      │
//! │                     ResultAggregator ──► BuildReport               │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each orchestrator instance owns its queue, pool, and aggregator, so
//! multiple independent builds can run in one process.
//!
//! # Example
//!
//! ```no_run
//! use gridrun::config::BuildConfig;
//! use gridrun::discovery::StaticDiscovery;
//! use gridrun::history::MemoryHistoryStore;
//! use gridrun::orchestrator::Orchestrator;
//! use gridrun::report::NullReporter;
//! use gridrun::runner::process::ProcessRunner;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let orchestrator = Orchestrator::new(
//!         BuildConfig::default(),
//!         StaticDiscovery::new(vec!["tests::login".into(), "tests::checkout".into()]),
//!         ProcessRunner::from_command("pytest {id}")?,
//!         MemoryHistoryStore::new(),
//!         NullReporter,
//!     );
//!
//!     let report = orchestrator.run().await?;
//!     std::process::exit(report.exit_code());
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::aggregate::{BuildReport, FinalStatus};
use crate::catalog::{Catalog, CatalogError, TestUnit};
use crate::config::{BuildConfig, ConfigError};
use crate::discovery::{Discovery, DiscoveryError};
use crate::dispatch::Dispatcher;
use crate::history::HistoryStore;
use crate::ordering::SmartOrderer;
use crate::report::Reporter;
use crate::runner::TestRunner;
use crate::sharding::{PlanError, ShardPlanner};

/// Fatal build errors, raised before any test attempt runs.
///
/// Per-attempt problems (runner errors, timeouts) never appear here; they
/// are converted into attempt outcomes and handled by retry policy.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The discovery collaborator failed.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// Discovery produced an unusable id list.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Shard planning failed.
    #[error(transparent)]
    Plan(#[from] PlanError),
}

/// Coordinates one build across the collaborators.
///
/// # Type Parameters
///
/// - `D`: the discovery collaborator
/// - `R`: the runner collaborator
/// - `H`: the history store
/// - `Rp`: the reporter
pub struct Orchestrator<D, R, H, Rp> {
    config: BuildConfig,
    discovery: D,
    runner: Arc<R>,
    history: H,
    reporter: Arc<Rp>,
    cancel: CancellationToken,
}

impl<D, R, H, Rp> Orchestrator<D, R, H, Rp>
where
    D: Discovery,
    R: TestRunner + 'static,
    H: HistoryStore,
    Rp: Reporter + 'static,
{
    /// Creates an orchestrator with the given collaborators.
    pub fn new(config: BuildConfig, discovery: D, runner: R, history: H, reporter: Rp) -> Self {
        Self {
            config,
            discovery,
            runner: Arc::new(runner),
            history,
            reporter: Arc::new(reporter),
            cancel: CancellationToken::new(),
        }
    }

    /// Token cancelling this build. Cancellation stops new dispatch and
    /// drains in-flight attempts per the configured drain timeout.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs the build to completion and returns the final report.
    ///
    /// The report contains a terminal status for every planned unit:
    /// passed, flaky-passed, failed, or aborted if the build was cancelled
    /// or timed out first. No unit is silently dropped.
    ///
    /// # Errors
    ///
    /// Only fatal pre-dispatch errors: invalid configuration, discovery
    /// failure, duplicate/empty id lists, or an unplannable shard layout.
    pub async fn run(&self) -> Result<BuildReport, BuildError> {
        self.config.validate()?;

        let build_id = format!("build-{}", Uuid::new_v4());
        info!(build = %build_id, "starting discovery");

        let ids = self.discovery.discover().await?;
        info!(build = %build_id, "discovered {} test units", ids.len());

        let catalog = Arc::new(Catalog::load(ids)?);

        let histories = self.load_histories(&catalog).await;
        catalog.seed_history(histories.clone());

        let units: Vec<TestUnit> = if self.config.smart_ordering {
            SmartOrderer::order(catalog.units(), &histories)
        } else {
            catalog.units().to_vec()
        };

        let planner = ShardPlanner::new(self.config.concurrency, self.config.autosplit)
            .with_matrix(self.config.matrix_dims.clone());
        let shards = planner.plan(&units)?;

        let planned: Vec<TestUnit> = shards.iter().flat_map(|s| s.units.clone()).collect();
        info!(
            build = %build_id,
            "scheduled {} executable units into {} shards across {} slots",
            planned.len(),
            shards.len(),
            self.config.concurrency
        );
        self.reporter.on_discovery_complete(&planned).await;

        let dispatcher = Dispatcher::new(
            &self.config,
            &build_id,
            shards,
            Arc::clone(&catalog),
            Arc::clone(&self.runner),
            Arc::clone(&self.reporter),
            self.cancel.clone(),
        );
        let aggregator = dispatcher.aggregator();

        dispatcher.run().await;

        // Whatever never reached a terminal status was cut off by
        // cancellation or the build timeout.
        for unit in &planned {
            let key = unit.qualified_id();
            if aggregator.record(&key, FinalStatus::Aborted) {
                warn!(unit = %key, "aborted before reaching a terminal status");
                self.reporter.on_unit_finalized(&key, FinalStatus::Aborted).await;
            }
        }

        self.persist_histories(&catalog).await;

        let report = aggregator.summary();
        info!(
            build = %build_id,
            "build finished: {} passed, {} flaky, {} failed, {} aborted ({} attempts)",
            report.passed,
            report.flaky_passed,
            report.failed,
            report.aborted,
            report.attempts.len()
        );
        self.reporter.on_build_complete(&report).await;

        Ok(report)
    }

    /// Fetches prior history for every discovered unit. Store failures
    /// degrade to zero-history instead of failing the build.
    async fn load_histories(
        &self,
        catalog: &Catalog,
    ) -> HashMap<String, crate::catalog::UnitHistory> {
        let mut histories = HashMap::new();
        for unit in catalog.units() {
            match self.history.get(&unit.id).await {
                Ok(Some(history)) => {
                    histories.insert(unit.id.clone(), history);
                }
                Ok(None) => {}
                Err(e) => warn!(unit = %unit.id, "history lookup failed: {e}"),
            }
        }
        histories
    }

    /// Writes the end-of-build history snapshot back to the store.
    /// Best-effort: losing ordering hints never fails a finished build.
    async fn persist_histories(&self, catalog: &Catalog) {
        for (id, history) in catalog.snapshot_history() {
            if let Err(e) = self.history.put(&id, history).await {
                warn!(unit = %id, "failed to persist history: {e}");
            }
        }
        if let Err(e) = self.history.flush().await {
            warn!("failed to flush history store: {e}");
        }
    }
}
