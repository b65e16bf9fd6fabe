//! Build progress reporting.

use async_trait::async_trait;

use crate::aggregate::{BuildReport, ExecutionAttempt, FinalStatus};
use crate::catalog::TestUnit;

/// A reporter receives events during build execution.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Called once after discovery and planning, with every executable
    /// unit (matrix variants included).
    async fn on_discovery_complete(&self, units: &[TestUnit]);

    /// Called when a slot starts an attempt.
    async fn on_attempt_start(&self, unit: &TestUnit, attempt: u32);

    /// Called when an attempt finishes, times out, or errors.
    async fn on_attempt_complete(&self, attempt: &ExecutionAttempt);

    /// Called when a unit reaches its terminal status.
    async fn on_unit_finalized(&self, qualified_id: &str, status: FinalStatus);

    /// Called once with the final report.
    async fn on_build_complete(&self, report: &BuildReport);
}

/// A reporter that does nothing (for tests or embedding).
pub struct NullReporter;

#[async_trait]
impl Reporter for NullReporter {
    async fn on_discovery_complete(&self, _units: &[TestUnit]) {}
    async fn on_attempt_start(&self, _unit: &TestUnit, _attempt: u32) {}
    async fn on_attempt_complete(&self, _attempt: &ExecutionAttempt) {}
    async fn on_unit_finalized(&self, _qualified_id: &str, _status: FinalStatus) {}
    async fn on_build_complete(&self, _report: &BuildReport) {}
}

/// Fans events out to multiple reporters.
pub struct MultiReporter {
    reporters: Vec<Box<dyn Reporter>>,
}

impl MultiReporter {
    pub fn new() -> Self {
        Self {
            reporters: Vec::new(),
        }
    }

    pub fn with_reporter<R: Reporter + 'static>(mut self, reporter: R) -> Self {
        self.reporters.push(Box::new(reporter));
        self
    }
}

impl Default for MultiReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Reporter for MultiReporter {
    async fn on_discovery_complete(&self, units: &[TestUnit]) {
        for reporter in &self.reporters {
            reporter.on_discovery_complete(units).await;
        }
    }

    async fn on_attempt_start(&self, unit: &TestUnit, attempt: u32) {
        for reporter in &self.reporters {
            reporter.on_attempt_start(unit, attempt).await;
        }
    }

    async fn on_attempt_complete(&self, attempt: &ExecutionAttempt) {
        for reporter in &self.reporters {
            reporter.on_attempt_complete(attempt).await;
        }
    }

    async fn on_unit_finalized(&self, qualified_id: &str, status: FinalStatus) {
        for reporter in &self.reporters {
            reporter.on_unit_finalized(qualified_id, status).await;
        }
    }

    async fn on_build_complete(&self, report: &BuildReport) {
        for reporter in &self.reporters {
            reporter.on_build_complete(report).await;
        }
    }
}

/// Console reporter with a progress bar and a final summary.
pub struct ConsoleReporter {
    progress: std::sync::Mutex<Option<indicatif::ProgressBar>>,
    verbose: bool,
}

impl ConsoleReporter {
    pub fn new(verbose: bool) -> Self {
        Self {
            progress: std::sync::Mutex::new(None),
            verbose,
        }
    }
}

#[async_trait]
impl Reporter for ConsoleReporter {
    async fn on_discovery_complete(&self, units: &[TestUnit]) {
        println!("Scheduled {} test units", units.len());

        let pb = indicatif::ProgressBar::new(units.len() as u64);
        pb.set_style(
            indicatif::ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
                )
                .unwrap()
                .progress_chars("#>-"),
        );

        *self.progress.lock().unwrap() = Some(pb);
    }

    async fn on_attempt_start(&self, unit: &TestUnit, attempt: u32) {
        if self.verbose {
            if attempt > 1 {
                println!("Retrying: {} (attempt {})", unit.qualified_id(), attempt);
            } else {
                println!("Running: {}", unit.qualified_id());
            }
        }
    }

    async fn on_attempt_complete(&self, attempt: &ExecutionAttempt) {
        if self.verbose && !attempt.outcome.is_success() {
            if let Some(pb) = self.progress.lock().unwrap().as_ref() {
                pb.println(format!(
                    "attempt {} of {} finished: {:?}",
                    attempt.attempt_number,
                    attempt.qualified_id(),
                    attempt.outcome
                ));
            }
        }
    }

    async fn on_unit_finalized(&self, qualified_id: &str, status: FinalStatus) {
        if let Some(pb) = self.progress.lock().unwrap().as_ref() {
            pb.inc(1);

            let label = match status {
                FinalStatus::FinalPassed => console::style("PASS ").green(),
                FinalStatus::FlakyPassed => console::style("FLAKY").yellow(),
                FinalStatus::FinalFailed => console::style("FAIL ").red(),
                FinalStatus::Aborted => console::style("ABORT").red().bold(),
            };

            if self.verbose || status.is_failure() || status == FinalStatus::FlakyPassed {
                pb.println(format!("{label} {qualified_id}"));
            }
        }
    }

    async fn on_build_complete(&self, report: &BuildReport) {
        if let Some(pb) = self.progress.lock().unwrap().take() {
            pb.finish_and_clear();
        }

        println!();
        println!("Build {} results:", report.build_id);
        println!("  Total:    {}", report.total);
        println!("  Passed:   {}", console::style(report.passed).green());
        println!("  Failed:   {}", console::style(report.failed).red());

        if report.flaky_passed > 0 {
            println!("  Flaky:    {}", console::style(report.flaky_passed).yellow());
        }
        if report.aborted > 0 {
            println!("  Aborted:  {}", console::style(report.aborted).red().bold());
        }

        println!("  Attempts: {}", report.attempts.len());
        println!("  Duration: {:?}", report.duration);

        if report.success() {
            println!();
            println!("{}", console::style("All tests passed!").green().bold());
        } else {
            println!();
            println!("{}", console::style("Some tests did not pass.").red().bold());
            println!();
            println!("Non-passing units:");
            for (id, status) in &report.per_unit {
                if status.is_failure() {
                    println!("  - {id} ({status:?})");
                }
            }
        }
    }
}
