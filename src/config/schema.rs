//! Configuration schema definitions.
//!
//! All settings deserialize from TOML. The `[build]` section is the
//! orchestration surface consumed by the core; `[runner]`, `[discovery]`
//! and `[history]` configure the bundled collaborators and are only read
//! at the edge (CLI) when wiring those up.
//!
//! ```text
//! Config (root)
//! ├── BuildConfig      - concurrency, retries, timeouts, matrix, ordering
//! ├── RunnerConfig     - command template for the process runner
//! ├── DiscoveryConfig  - static id list and/or id file
//! └── HistoryConfig    - where cross-build history persists
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Root configuration structure.
///
/// # TOML Structure
///
/// ```toml
/// [build]
/// concurrency = 4
/// max_retries = 2
/// per_test_timeout_secs = 300
///
/// [runner]
/// command = "pytest {id}"
///
/// [discovery]
/// ids = ["tests/test_login.py::test_ok"]
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Orchestration settings (parallelism, timeouts, retries, matrix).
    #[serde(default)]
    pub build: BuildConfig,

    /// Process runner settings.
    #[serde(default)]
    pub runner: RunnerConfig,

    /// Test discovery settings.
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// History store settings.
    #[serde(default)]
    pub history: HistoryConfig,
}

impl Config {
    /// Validates every section. Fatal: a build must not start on a config
    /// that fails here.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.build.validate()?;
        if self.runner.command.trim().is_empty() {
            return Err(ConfigError::InvalidRunnerCommand("empty command".to_string()));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            build: BuildConfig::default(),
            runner: RunnerConfig::default(),
            discovery: DiscoveryConfig::default(),
            history: HistoryConfig::default(),
        }
    }
}

/// Core orchestration settings.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `concurrency` | 4 |
/// | `max_retries` | 2 |
/// | `per_test_timeout_secs` | 300 |
/// | `build_timeout_secs` | unset (no build deadline) |
/// | `drain_timeout_secs` | 30 |
/// | `autosplit` | true |
/// | `smart_ordering` | true |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BuildConfig {
    /// Number of parallel worker slots. This bounds concurrent runner
    /// invocations, protecting downstream grid/device-farm capacity.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Retries per test unit beyond its first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Hard per-test deadline, independent of the runner's own timeouts,
    /// bounding worst-case slot occupancy.
    #[serde(default = "default_per_test_timeout")]
    pub per_test_timeout_secs: u64,

    /// Optional whole-build deadline. When it expires the build stops
    /// dispatching and enters drain mode.
    pub build_timeout_secs: Option<u64>,

    /// Grace period for in-flight attempts after a shutdown signal before
    /// they are forcibly cancelled.
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,

    /// Batch units into roughly one shard per worker slot. Disabled, each
    /// unit is its own shard (finest granularity).
    #[serde(default = "default_true")]
    pub autosplit: bool,

    /// Matrix dimensions; each unit is expanded into their cartesian
    /// product (e.g. browsers x platforms). Empty means no expansion.
    #[serde(default)]
    pub matrix_dims: Vec<Vec<String>>,

    /// Reorder the queue so historically failing tests run first.
    #[serde(default = "default_true")]
    pub smart_ordering: bool,
}

impl BuildConfig {
    /// Validates the orchestration surface.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency(self.concurrency));
        }
        if self.per_test_timeout_secs == 0 {
            return Err(ConfigError::InvalidPerTestTimeout);
        }
        if self.build_timeout_secs == Some(0) {
            return Err(ConfigError::InvalidBuildTimeout);
        }
        if let Some(idx) = self.matrix_dims.iter().position(|d| d.is_empty()) {
            return Err(ConfigError::EmptyMatrixDimension(idx));
        }
        Ok(())
    }

    pub fn per_test_timeout(&self) -> Duration {
        Duration::from_secs(self.per_test_timeout_secs)
    }

    pub fn build_timeout(&self) -> Option<Duration> {
        self.build_timeout_secs.map(Duration::from_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            per_test_timeout_secs: default_per_test_timeout(),
            build_timeout_secs: None,
            drain_timeout_secs: default_drain_timeout(),
            autosplit: true,
            matrix_dims: Vec::new(),
            smart_ordering: true,
        }
    }
}

/// Settings for the bundled process runner.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunnerConfig {
    /// Command template; `{id}` and `{matrix}` are substituted per unit.
    #[serde(default = "default_runner_command")]
    pub command: String,

    /// Extra environment variables for each invocation.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Working directory for invocations.
    pub working_dir: Option<PathBuf>,

    /// Directory for captured stdout/stderr artifacts. Unset disables
    /// artifact capture.
    pub artifact_dir: Option<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            command: default_runner_command(),
            env: BTreeMap::new(),
            working_dir: None,
            artifact_dir: None,
        }
    }
}

/// Settings for static test discovery.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DiscoveryConfig {
    /// Inline list of test ids.
    #[serde(default)]
    pub ids: Vec<String>,

    /// Newline separated id file, merged after `ids`. Blank lines and
    /// `#` comments are skipped.
    pub file: Option<PathBuf>,
}

/// Settings for cross-build history persistence.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HistoryConfig {
    /// Path of the JSON history file.
    #[serde(default = "default_history_path")]
    pub path: PathBuf,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: default_history_path(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}

fn default_max_retries() -> u32 {
    2
}

fn default_per_test_timeout() -> u64 {
    300
}

fn default_drain_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_runner_command() -> String {
    "echo {id}".to_string()
}

fn default_history_path() -> PathBuf {
    PathBuf::from(".gridrun/history.json")
}
