//! Run report

use std::path::Path;

use colored::Colorize;
use serde::Serialize;

use crate::common::{Error, Result};

use super::case::{TestOutcome, Verdict};

/// Everything a run produced
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub suite: String,
    pub scenario: String,
    pub outcomes: Vec<TestOutcome>,
    /// Why the scenario could not be set up, if it could not
    pub scenario_error: Option<String>,
    /// Scenario teardown problems and other run-wide warnings
    pub warnings: Vec<String>,
    /// The run was cut short by a signal
    pub interrupted: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub skipped: usize,
}

impl RunReport {
    pub fn new(suite: impl Into<String>, scenario: impl Into<String>) -> Self {
        Self {
            suite: suite.into(),
            scenario: scenario.into(),
            outcomes: Vec::new(),
            scenario_error: None,
            warnings: Vec::new(),
            interrupted: false,
        }
    }

    pub fn counts(&self) -> Counts {
        let mut counts = Counts::default();
        for outcome in &self.outcomes {
            match outcome.verdict {
                Verdict::Pass => counts.passed += 1,
                Verdict::Fail => counts.failed += 1,
                Verdict::Error => counts.errors += 1,
                Verdict::Skipped => counts.skipped += 1,
            }
        }
        counts
    }

    /// No test failed or errored, and the run was not interrupted
    pub fn success(&self) -> bool {
        !self.interrupted
            && self.scenario_error.is_none()
            && !self.outcomes.iter().any(|o| o.verdict.is_failure())
    }

    pub fn outcome(&self, name: &str) -> Option<&TestOutcome> {
        self.outcomes.iter().find(|o| o.name == name)
    }

    /// Print the human readable summary on stdout
    pub fn print_summary(&self) {
        println!(
            "\n{} {} / {}",
            "Summary:".blue().bold(),
            self.suite.white().bold(),
            self.scenario.white().bold()
        );
        if let Some(err) = &self.scenario_error {
            println!("  {} {}", "✗".red(), err);
        }

        for outcome in &self.outcomes {
            let (icon, label) = match outcome.verdict {
                Verdict::Pass => ("✓".green(), "pass".green()),
                Verdict::Fail => ("✗".red(), "FAIL".red().bold()),
                Verdict::Error => ("✗".red(), "ERROR".red().bold()),
                Verdict::Skipped => ("-".dimmed(), "skipped".dimmed()),
            };
            println!(
                "  {} {:32} {:8} {:>7.1}s",
                icon,
                outcome.name,
                label,
                outcome.duration.as_secs_f64()
            );
            if let Some(reason) = &outcome.reason {
                println!("      {}", reason.dimmed());
            }
            for artifact in &outcome.artifacts {
                println!("      output: {}", artifact.display());
            }
            for warning in &outcome.warnings {
                println!("      {} {}", "warning:".yellow(), warning);
            }
        }
        for warning in &self.warnings {
            println!("  {} {}", "warning:".yellow(), warning);
        }

        let c = self.counts();
        let line = format!(
            "{} passed, {} failed, {} errors, {} skipped",
            c.passed, c.failed, c.errors, c.skipped
        );
        if self.interrupted {
            println!("\n{} ({})", line, "interrupted".yellow());
        } else if self.success() {
            println!("\n{}", line.green().bold());
        } else {
            println!("\n{}", line.red().bold());
        }
    }

    /// Write the report as JSON
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| {
            Error::Config(format!(
                "Failed to write report '{}': {}",
                path.display(),
                e
            ))
        })
    }
}
