//! Test case lifecycle
//!
//! A test case runs `setup → test → teardown` on the live cluster. Assertion
//! failures of the test body become a failed outcome; everything else that
//! goes wrong, panics included, becomes an error outcome. Neither stops the run, and teardown
//! is always attempted once setup was.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::Instant;

use crate::common::{catch_panic, Error, Result};

use super::context::TestContext;

/// The hooks of a resource agent test
#[async_trait]
pub trait TestBody: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Evaluated once before setup; a non applicable test is skipped
    fn is_applicable(&self, _ctx: &TestContext) -> bool {
        true
    }

    async fn setup_test(&self, _ctx: &TestContext, _node: &str) -> Result<()> {
        Ok(())
    }

    async fn test(&self, ctx: &TestContext, target: &str) -> Result<()>;

    async fn teardown_test(&self, _ctx: &TestContext, _node: &str) -> Result<()> {
        Ok(())
    }

    /// Log patterns the audits must tolerate while this test runs
    fn errors_to_ignore(&self, _ctx: &TestContext) -> Vec<String> {
        Vec::new()
    }
}

/// Final verdict of a test case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Fail,
    Error,
    Skipped,
}

impl Verdict {
    pub fn is_failure(self) -> bool {
        matches!(self, Verdict::Fail | Verdict::Error)
    }
}

/// Result of one test case
#[derive(Debug, Clone, Serialize)]
pub struct TestOutcome {
    pub name: String,
    pub verdict: Verdict,
    /// Why the test did not pass
    pub reason: Option<String>,
    /// Assertion log, in order
    pub assertions: Vec<String>,
    /// Problems that did not change the verdict (teardown, audits)
    pub warnings: Vec<String>,
    /// Output saved from failed commands
    pub artifacts: Vec<PathBuf>,
    #[serde(rename = "duration_secs", serialize_with = "as_secs")]
    pub duration: Duration,
}

fn as_secs<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

impl TestOutcome {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            verdict: Verdict::Pass,
            reason: None,
            assertions: Vec::new(),
            warnings: Vec::new(),
            artifacts: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    /// Outcome of a test that did not run
    pub fn skipped(name: &str, reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Skipped,
            reason: Some(reason.into()),
            ..Self::new(name)
        }
    }

    /// Outcome of a test that could not run because of the harness
    pub fn errored(name: &str, reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Error,
            reason: Some(reason.into()),
            ..Self::new(name)
        }
    }

    /// Record a failure; the first failure sets the verdict, later ones are
    /// kept as warnings
    pub fn record(&mut self, verdict: Verdict, phase: &str, error: &Error) {
        if let Some(artifact) = error.artifact() {
            self.artifacts.push(artifact.to_path_buf());
        }
        let message = format!("{}: {}", phase, error);
        if self.verdict == Verdict::Pass {
            self.assertions.push(message.clone());
            self.verdict = verdict;
            self.reason = Some(message);
        } else {
            self.warnings.push(message);
        }
    }

    /// Merge audit findings into the outcome
    pub fn record_audit(&mut self, audit: &str, findings: &[String]) {
        let message = format!("audit {}: {}", audit, findings.join("; "));
        if self.verdict == Verdict::Pass {
            self.verdict = Verdict::Fail;
            self.reason = Some(message.clone());
            self.assertions.push(message);
        } else {
            self.warnings.push(message);
        }
    }
}

/// Registration status of a test
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestStatus {
    Enabled,
    /// Kept in the registry but never run, typically because it is flaky
    KnownDisabled { reason: &'static str },
}

/// Lifecycle state of a test case
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseState {
    Created,
    SettingUp,
    Running,
    TearingDown,
    Done,
}

/// One registered test, driven through its lifecycle
pub struct TestCase {
    body: Arc<dyn TestBody>,
    status: TestStatus,
    state: CaseState,
}

impl TestCase {
    pub fn new(body: Arc<dyn TestBody>, status: TestStatus) -> Self {
        Self {
            body,
            status,
            state: CaseState::Created,
        }
    }

    pub fn name(&self) -> &str {
        self.body.name()
    }

    pub fn state(&self) -> CaseState {
        self.state
    }

    pub fn body(&self) -> &Arc<dyn TestBody> {
        &self.body
    }

    /// Why the test will not run, if it will not
    pub fn skip_reason(&self, ctx: &TestContext) -> Option<String> {
        match &self.status {
            TestStatus::KnownDisabled { reason } => Some(format!("known disabled: {}", reason)),
            TestStatus::Enabled if !self.body.is_applicable(ctx) => {
                Some("not applicable to this configuration".to_string())
            }
            TestStatus::Enabled => None,
        }
    }

    /// Run the whole lifecycle
    ///
    /// Setup and test run against the first cluster node. The test step is
    /// skipped when setup failed; teardown always runs.
    pub async fn execute(&mut self, ctx: &TestContext) -> TestOutcome {
        let name = self.body.name().to_string();
        if let Some(reason) = self.skip_reason(ctx) {
            tracing::info!(test = %name, "skipped: {}", reason);
            self.state = CaseState::Done;
            return TestOutcome::skipped(&name, reason);
        }

        let start = Instant::now();
        let node = ctx.config().first_node().to_string();
        let mut outcome = TestOutcome::new(&name);
        tracing::info!(test = %name, "running test");

        self.state = CaseState::SettingUp;
        let set_up = match catch_panic(self.body.setup_test(ctx, &node)).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(test = %name, "setup failed: {}", e);
                outcome.record(Verdict::Error, "setup", &e);
                false
            }
        };

        self.state = CaseState::Running;
        if set_up {
            if let Err(e) = catch_panic(self.body.test(ctx, &node)).await {
                let verdict = if e.is_assertion() {
                    Verdict::Fail
                } else {
                    Verdict::Error
                };
                tracing::error!(test = %name, "test failed: {}", e);
                outcome.record(verdict, "test", &e);
            }
        }

        self.state = CaseState::TearingDown;
        if let Err(e) = catch_panic(self.body.teardown_test(ctx, &node)).await {
            tracing::warn!(test = %name, "teardown failed: {}", e);
            outcome.record(Verdict::Error, "teardown", &e);
        }
        self.state = CaseState::Done;

        let mut notes = ctx.take_notes();
        notes.append(&mut outcome.assertions);
        outcome.assertions = notes;
        outcome.duration = start.elapsed();
        outcome
    }
}
