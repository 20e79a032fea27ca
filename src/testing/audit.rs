//! Sanity checks run after every test

use async_trait::async_trait;
use regex::RegexSet;
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::common::{Error, Result};
use crate::remote::LogTail;

use super::context::Harness;

/// Lines that mean something went wrong in the cluster
const BAD_NEWS: &[&str] = &[
    r"\b(crit|error|emerg):",
    r"\bERROR:",
    r"\bCRIT:",
    r"Shutting down\.\.\.NOW",
    r"input=I_ERROR",
    r"input=I_FAIL",
    r"Child process .* terminated with signal",
];

/// Result of one audit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditReport {
    pub audit: String,
    pub findings: Vec<String>,
}

impl AuditReport {
    pub fn passed(&self) -> bool {
        self.findings.is_empty()
    }
}

/// A post-test check of the cluster
#[async_trait]
pub trait Audit: Send + Sync {
    fn name(&self) -> &str;

    /// Called right before a test starts
    async fn prepare(&self, _harness: &Harness) -> Result<()> {
        Ok(())
    }

    /// Check the cluster after a test; lines matching `ignore` are noise
    async fn run(&self, harness: &Harness, ignore: &[String]) -> Result<AuditReport>;
}

fn compile_ignore(ignore: &[String]) -> Result<RegexSet> {
    RegexSet::new(ignore).map_err(|e| Error::InvalidPattern {
        pattern: ignore.join(" | "),
        reason: e.to_string(),
    })
}

/// Reports error lines logged on any node while a test ran
pub struct BadNewsAudit {
    bad_news: RegexSet,
    tails: Mutex<Vec<Box<dyn LogTail>>>,
}

impl BadNewsAudit {
    pub fn new() -> Result<Self> {
        let bad_news = RegexSet::new(BAD_NEWS).map_err(|e| Error::InvalidPattern {
            pattern: BAD_NEWS.join(" | "),
            reason: e.to_string(),
        })?;
        Ok(Self {
            bad_news,
            tails: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Audit for BadNewsAudit {
    fn name(&self) -> &str {
        "BadNews"
    }

    async fn prepare(&self, harness: &Harness) -> Result<()> {
        let limit = harness.config.timeouts.host_poll_timeout();
        let mut tails = Vec::new();
        for node in harness.nodes() {
            match timeout(limit, harness.logs.open(node)).await {
                Ok(Ok(tail)) => tails.push(tail),
                Ok(Err(e)) => tracing::debug!(node = %node, "bad news audit cannot read log: {}", e),
                Err(_) => tracing::debug!(node = %node, "bad news audit: log did not open in time"),
            }
        }
        *self.tails.lock().await = tails;
        Ok(())
    }

    async fn run(&self, harness: &Harness, ignore: &[String]) -> Result<AuditReport> {
        let ignore = compile_ignore(ignore)?;
        let limit = harness.config.timeouts.host_poll_timeout();
        let tails = std::mem::take(&mut *self.tails.lock().await);

        let mut findings = Vec::new();
        for mut tail in tails {
            let lines = match timeout(limit, tail.tail()).await {
                Ok(Ok(lines)) => lines,
                Ok(Err(e)) => {
                    tracing::debug!(host = tail.host(), "bad news audit skipped: {}", e);
                    continue;
                }
                Err(_) => {
                    tracing::debug!(host = tail.host(), "bad news audit skipped: no answer");
                    continue;
                }
            };
            findings.extend(
                lines
                    .into_iter()
                    .filter(|l| self.bad_news.is_match(l) && !ignore.is_match(l))
                    .map(|l| format!("{}: {}", tail.host(), l)),
            );
        }
        Ok(AuditReport {
            audit: self.name().to_string(),
            findings,
        })
    }
}

/// Nodes without a running pacemaker must not keep libqb shared memory
pub struct ShmAudit;

#[async_trait]
impl Audit for ShmAudit {
    fn name(&self) -> &str {
        "Shm"
    }

    async fn run(&self, harness: &Harness, _ignore: &[String]) -> Result<AuditReport> {
        let actions = &harness.actions;
        let mut findings = Vec::new();
        for node in harness.nodes() {
            let active = match actions.run(node, "systemctl is-active -q pacemaker").await {
                Ok(code) => code == 0,
                Err(e) if e.is_unreachable() => {
                    tracing::debug!(node = %node, "shm audit skipped: {}", e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            if active {
                continue;
            }
            let leftovers = actions
                .run_output(node, "ls /dev/shm | grep qb-")
                .await?
                .stdout;
            if leftovers.trim().is_empty() {
                continue;
            }
            if let Ok(ps) = actions
                .run_output(node, "ps axf | grep -e pacemaker -e corosync")
                .await
            {
                for line in ps.stdout.lines() {
                    tracing::debug!("ps[{}]: {}", node, line);
                }
            }
            findings.extend(
                leftovers
                    .lines()
                    .map(|f| format!("{}: stale /dev/shm/{}", node, f.trim())),
            );
            actions.run(node, "rm -f /dev/shm/qb-*").await?;
        }
        Ok(AuditReport {
            audit: self.name().to_string(),
            findings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::CommandOutput;
    use crate::testing::context::harness_fixture;

    #[tokio::test]
    async fn test_bad_news_reports_unignored_errors() {
        let (_, logs, harness) = harness_fixture(&["node-1", "node-2"]);
        let audit = BadNewsAudit::new().unwrap();
        logs.push_line("node-1", "pacemaker-controld[1]: error: stale line from before");
        audit.prepare(&harness).await.unwrap();

        logs.push_line("node-1", "pacemaker-execd[2]: error: Could not fix addr for dummy");
        logs.push_line("node-1", "pengine[3]: error: Could not fix addr for dummy");
        logs.push_line("node-2", "pacemaker-controld[4]: notice: all good");
        logs.push_line("node-2", "dummy(dummy)[5]: ERROR: monitor failed");

        let report = audit
            .run(&harness, &[r"pengine.*error: Could not fix addr for ".to_string()])
            .await
            .unwrap();
        assert!(!report.passed());
        assert_eq!(
            report.findings,
            vec![
                "node-1: pacemaker-execd[2]: error: Could not fix addr for dummy",
                "node-2: dummy(dummy)[5]: ERROR: monitor failed",
            ]
        );
    }

    #[tokio::test]
    async fn test_bad_news_without_prepare_passes() {
        let (_, _, harness) = harness_fixture(&["node-1"]);
        let report = BadNewsAudit::new().unwrap().run(&harness, &[]).await.unwrap();
        assert!(report.passed());
    }

    #[tokio::test]
    async fn test_invalid_ignore_pattern() {
        let (_, _, harness) = harness_fixture(&["node-1"]);
        let err = BadNewsAudit::new()
            .unwrap()
            .run(&harness, &["(".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPattern { .. }));
    }

    #[tokio::test]
    async fn test_shm_audit_cleans_stopped_nodes() {
        let (mock, _, harness) = harness_fixture(&["node-1", "node-2"]);
        mock.exit_when("systemctl is-active -q pacemaker", 3);
        mock.reply_on("node-1", "systemctl is-active -q pacemaker", CommandOutput::with_code(0));
        mock.reply_on(
            "node-2",
            "ls /dev/shm",
            CommandOutput {
                code: 0,
                stdout: "qb-cib_rw-header\n".into(),
                stderr: String::new(),
            },
        );

        let report = ShmAudit.run(&harness, &[]).await.unwrap();
        assert_eq!(report.findings, vec!["node-2: stale /dev/shm/qb-cib_rw-header"]);
        assert!(mock.commands_for("node-2").contains(&"rm -f /dev/shm/qb-*".to_string()));
        assert!(!mock.commands_for("node-1").iter().any(|c| c.contains("ls /dev/shm")));
    }
}
