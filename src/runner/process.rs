//! Process runner adapter.
//!
//! Runs each test unit as a local child process built from a command
//! template. Useful for development and for wrapping any test framework
//! that exposes a per-test CLI invocation. The template may contain
//! `{id}` and `{matrix}` placeholders, substituted per unit:
//!
//! ```toml
//! [runner]
//! command = "pytest {id} --browser {matrix}"
//! ```

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{AttemptOutcome, RunnerError, RunnerResponse, RunnerResult, TestRunner};
use crate::artifact::{Artifact, ArtifactSink};
use crate::catalog::TestUnit;
use crate::config::{ConfigError, RunnerConfig};

/// Runs test units as local child processes.
pub struct ProcessRunner {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    working_dir: Option<PathBuf>,
    artifact_sink: Option<Arc<dyn ArtifactSink>>,
}

impl ProcessRunner {
    /// Builds a runner from a command template string.
    ///
    /// The string is split with shell quoting rules, so templates like
    /// `sh -c "run-one {id}"` work as expected.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidRunnerCommand`] if the template is empty or
    /// not splittable.
    pub fn from_command(command: &str) -> Result<Self, ConfigError> {
        let words = shell_words::split(command)
            .map_err(|e| ConfigError::InvalidRunnerCommand(e.to_string()))?;

        let mut words = words.into_iter();
        let program = words
            .next()
            .ok_or_else(|| ConfigError::InvalidRunnerCommand("empty command".to_string()))?;

        Ok(Self {
            program,
            args: words.collect(),
            env: Vec::new(),
            working_dir: None,
            artifact_sink: None,
        })
    }

    /// Builds a runner from the `[runner]` config section.
    pub fn from_config(config: &RunnerConfig) -> Result<Self, ConfigError> {
        let mut runner = Self::from_command(&config.command)?;
        runner.env = config.env.clone().into_iter().collect();
        runner.working_dir = config.working_dir.clone();
        Ok(runner)
    }

    /// Stores captured stdout/stderr through the given sink after each
    /// attempt, attaching the returned refs to the attempt.
    pub fn with_artifact_sink(mut self, sink: Arc<dyn ArtifactSink>) -> Self {
        self.artifact_sink = Some(sink);
        self
    }

    fn substitute(&self, arg: &str, unit: &TestUnit) -> String {
        arg.replace("{id}", &unit.id)
            .replace("{matrix}", unit.matrix_key.as_deref().unwrap_or(""))
    }
}

#[async_trait]
impl TestRunner for ProcessRunner {
    async fn run(
        &self,
        cancel: &CancellationToken,
        unit: &TestUnit,
        attempt: u32,
    ) -> RunnerResult<RunnerResponse> {
        let mut cmd = tokio::process::Command::new(&self.program);
        for arg in &self.args {
            cmd.arg(self.substitute(arg, unit));
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        // Dropping the in-flight future (timeout, forced drain) must not
        // leak the child.
        cmd.kill_on_drop(true);

        debug!(unit = %unit.qualified_id(), attempt, "spawning runner process");

        let output = tokio::select! {
            output = cmd.output() => {
                output.map_err(|e| RunnerError::Invocation(format!(
                    "failed to spawn {}: {}", self.program, e
                )))?
            }
            _ = cancel.cancelled() => return Err(RunnerError::Cancelled),
        };

        let outcome = if output.status.success() {
            AttemptOutcome::Passed
        } else {
            AttemptOutcome::Failed
        };

        let mut artifact_refs = Vec::new();
        if let Some(sink) = &self.artifact_sink {
            let artifacts = [
                Artifact::new("stdout.log", output.stdout),
                Artifact::new("stderr.log", output.stderr),
            ];
            artifact_refs = sink
                .store(unit, attempt, &artifacts)
                .await
                .map_err(RunnerError::Other)?;
        }

        Ok(RunnerResponse {
            outcome,
            artifact_refs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    #[test]
    fn test_from_command_rejects_empty() {
        assert!(ProcessRunner::from_command("").is_err());
    }

    #[test]
    fn test_substitution() {
        let runner = ProcessRunner::from_command("run {id} --on {matrix}").unwrap();
        let unit = TestUnit::new("t1").with_matrix_key("chrome");
        assert_eq!(runner.substitute("{id}", &unit), "t1");
        assert_eq!(runner.substitute("--on={matrix}", &unit), "--on=chrome");
    }

    #[tokio::test]
    async fn test_exit_status_maps_to_outcome() {
        let unit = TestUnit::new("t1");

        let pass = ProcessRunner::from_command("true").unwrap();
        let response = pass.run(&token(), &unit, 1).await.unwrap();
        assert_eq!(response.outcome, AttemptOutcome::Passed);

        let fail = ProcessRunner::from_command("false").unwrap();
        let response = fail.run(&token(), &unit, 1).await.unwrap();
        assert_eq!(response.outcome, AttemptOutcome::Failed);
    }

    #[tokio::test]
    async fn test_missing_binary_is_invocation_error() {
        let runner = ProcessRunner::from_command("definitely-not-a-real-binary-xyz").unwrap();
        let err = runner.run(&token(), &TestUnit::new("t1"), 1).await.unwrap_err();
        assert!(matches!(err, RunnerError::Invocation(_)));
    }

    #[tokio::test]
    async fn test_cancellation() {
        let runner = ProcessRunner::from_command("sleep 30").unwrap();
        let cancel = token();
        cancel.cancel();
        let err = runner.run(&cancel, &TestUnit::new("t1"), 1).await.unwrap_err();
        assert!(matches!(err, RunnerError::Cancelled));
    }
}
