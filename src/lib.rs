//! gridrun: a parallel test execution orchestrator.
//!
//! This crate schedules a large, dynamically discovered set of test units
//! across a bounded pool of parallel workers, with automatic sharding,
//! retry-on-failure, and failure-aware reordering.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Catalog**: discovered test units and their outcome history
//! - **SmartOrderer / ShardPlanner**: failure-first ordering and batching
//! - **Dispatcher / WorkerPool**: bounded concurrent execution
//! - **RetryManager / ResultAggregator**: retries and the build report
//!
//! Test execution itself is external: framework adapters plug in through
//! the [`runner::TestRunner`] trait, discovery through
//! [`discovery::Discovery`], and cross-build state through
//! [`history::HistoryStore`].
//!
//! # Example
//!
//! ```no_run
//! use gridrun::config::load_config;
//! use gridrun::discovery::StaticDiscovery;
//! use gridrun::history::JsonHistoryStore;
//! use gridrun::orchestrator::Orchestrator;
//! use gridrun::report::ConsoleReporter;
//! use gridrun::runner::process::ProcessRunner;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config(std::path::Path::new("gridrun.toml"))?;
//!
//!     let orchestrator = Orchestrator::new(
//!         config.build.clone(),
//!         StaticDiscovery::from_config(&config.discovery),
//!         ProcessRunner::from_config(&config.runner)?,
//!         JsonHistoryStore::open(&config.history.path),
//!         ConsoleReporter::new(false),
//!     );
//!
//!     let report = orchestrator.run().await?;
//!     std::process::exit(report.exit_code());
//! }
//! ```

pub mod aggregate;
pub mod artifact;
pub mod catalog;
pub mod config;
pub mod discovery;
pub mod dispatch;
pub mod history;
pub mod ordering;
pub mod orchestrator;
pub mod pool;
pub mod report;
pub mod retry;
pub mod runner;
pub mod sharding;

// Re-export commonly used types
pub use aggregate::{BuildReport, ExecutionAttempt, FinalStatus, ResultAggregator};
pub use catalog::{Catalog, TestUnit, UnitHistory};
pub use config::{load_config, load_config_str, BuildConfig, Config};
pub use discovery::Discovery;
pub use history::HistoryStore;
pub use orchestrator::{BuildError, Orchestrator};
pub use pool::{WorkerPool, WorkerSlot};
pub use report::Reporter;
pub use retry::RetryManager;
pub use runner::{AttemptOutcome, RunnerResponse, TestRunner};
pub use sharding::{Shard, ShardPlanner};
