//! Test run orchestration
//!
//! Sets the scenario up, runs every test case in order with the audits
//! around it, and always tears the scenario down. Signals are watched for
//! the whole run: a summary request prints the results so far, an abort
//! stops the current step and goes straight to scenario teardown.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::common::{catch_panic, Result};

use super::audit::Audit;
use super::case::{TestCase, TestOutcome};
use super::context::{Harness, TestContext};
use super::report::RunReport;
use super::scenario::Scenario;

/// External request received while running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// Print the results so far and keep going
    Summary,
    /// Stop now, tear the scenario down
    Abort,
}

/// Source of interrupts
pub struct Interrupts {
    rx: Option<mpsc::UnboundedReceiver<Interrupt>>,
}

impl Interrupts {
    /// Never interrupted
    pub fn none() -> Self {
        Self { rx: None }
    }

    /// Interrupts sent by hand, for embedding and tests
    pub fn channel() -> (mpsc::UnboundedSender<Interrupt>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx: Some(rx) })
    }

    /// SIGUSR1 requests a summary, SIGTERM and SIGINT abort the run
    #[cfg(unix)]
    pub fn from_signals() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigusr1 = signal(SignalKind::user_defined1())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let (tx, interrupts) = Self::channel();

        tokio::spawn(async move {
            loop {
                let interrupt = tokio::select! {
                    _ = sigusr1.recv() => Interrupt::Summary,
                    _ = sigterm.recv() => {
                        tracing::warn!("Received SIGTERM, aborting the run");
                        Interrupt::Abort
                    }
                    _ = sigint.recv() => {
                        tracing::warn!("Received SIGINT (Ctrl+C), aborting the run");
                        Interrupt::Abort
                    }
                };
                if tx.send(interrupt).is_err() {
                    break;
                }
            }
        });
        Ok(interrupts)
    }

    /// Next interrupt; `None` once no more can arrive
    async fn recv(&mut self) -> Option<Interrupt> {
        match self.rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }
}

enum Supervised<T> {
    Done(T),
    Aborted,
}

/// Drive `step` to completion unless an abort arrives first
async fn supervise<T>(
    interrupts: &mut Interrupts,
    report: &RunReport,
    step: impl Future<Output = T>,
) -> Supervised<T> {
    tokio::pin!(step);
    loop {
        tokio::select! {
            biased;
            out = &mut step => return Supervised::Done(out),
            interrupt = interrupts.recv() => match interrupt {
                Some(Interrupt::Summary) => report.print_summary(),
                Some(Interrupt::Abort) => return Supervised::Aborted,
                None => {
                    interrupts.rx = None;
                    return Supervised::Done(step.await);
                }
            },
        }
    }
}

/// Runs one scenario and its tests
pub struct Runner {
    harness: Harness,
    audits: Vec<Arc<dyn Audit>>,
    interrupts: Interrupts,
}

impl Runner {
    pub fn new(harness: Harness, interrupts: Interrupts) -> Self {
        Self {
            harness,
            audits: Vec::new(),
            interrupts,
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn Audit>) -> Self {
        self.audits.push(audit);
        self
    }

    /// Run `tests` in order under `scenario`
    ///
    /// Scenario teardown runs exactly once whatever happens before it.
    pub async fn run(&mut self, suite: &str, scenario: &mut Scenario, tests: Vec<TestCase>) -> RunReport {
        let Self {
            harness,
            audits,
            interrupts,
        } = self;
        let harness = &*harness;
        let mut report = RunReport::new(suite, scenario.name());

        tracing::info!(scenario = scenario.name(), "setting up scenario");
        match supervise(interrupts, &report, scenario.setup(harness)).await {
            Supervised::Aborted => {
                report.outcomes = tests
                    .iter()
                    .map(|case| TestOutcome::errored(case.name(), "interrupted"))
                    .collect();
                report.interrupted = true;
            }
            Supervised::Done(Err(e)) => {
                tracing::error!(scenario = scenario.name(), "scenario setup failed: {}", e);
                let ctx = TestContext::new(harness.clone(), Arc::new(scenario.facts().clone()));
                report.outcomes = tests
                    .iter()
                    .map(|case| match case.skip_reason(&ctx) {
                        Some(reason) => TestOutcome::skipped(case.name(), reason),
                        None => TestOutcome::errored(case.name(), format!("not run: {}", e)),
                    })
                    .collect();
                report.scenario_error = Some(e.to_string());
            }
            Supervised::Done(Ok(())) => {
                let ctx = TestContext::new(harness.clone(), Arc::new(scenario.facts().clone()));
                for mut case in tests {
                    let test_ctx = ctx.for_next_test();
                    if let Some(reason) = case.skip_reason(&test_ctx) {
                        tracing::info!(test = case.name(), "skipped: {}", reason);
                        report.outcomes.push(TestOutcome::skipped(case.name(), reason));
                        continue;
                    }
                    let name = case.name().to_string();
                    let step = run_case(harness, audits, &mut case, &test_ctx);
                    match supervise(interrupts, &report, step).await {
                        Supervised::Done(outcome) => report.outcomes.push(outcome),
                        Supervised::Aborted => {
                            report.outcomes.push(TestOutcome::errored(&name, "interrupted"));
                            report.interrupted = true;
                            break;
                        }
                    }
                }
            }
        }

        if report.interrupted {
            tracing::warn!("run interrupted, tearing down scenario");
        }
        for failure in scenario.teardown(harness).await {
            report.warnings.push(failure.to_string());
        }
        report
    }
}

/// One test case with the audits around it
async fn run_case(
    harness: &Harness,
    audits: &[Arc<dyn Audit>],
    case: &mut TestCase,
    ctx: &TestContext,
) -> TestOutcome {
    for audit in audits {
        if let Err(e) = catch_panic(audit.prepare(harness)).await {
            tracing::warn!(audit = audit.name(), "audit preparation failed: {}", e);
        }
    }

    let mut outcome = case.execute(ctx).await;

    let mut ignore = case.body().errors_to_ignore(ctx);
    ignore.extend(harness.caps.containers.errors_to_ignore());
    for audit in audits {
        match catch_panic(audit.run(harness, &ignore)).await {
            Ok(report) if report.passed() => {}
            Ok(report) => {
                tracing::error!(audit = audit.name(), test = %outcome.name, "audit failed");
                outcome.record_audit(&report.audit, &report.findings);
            }
            Err(e) => outcome
                .warnings
                .push(format!("audit {} could not run: {}", audit.name(), e)),
        }
    }
    outcome
}
