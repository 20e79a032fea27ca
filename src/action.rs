//! Remote actions used by scenarios and tests
//!
//! [`ActionRunner`] wraps the [`RemoteExecutor`] with the conventions of a
//! test run: commands are logged, checked commands keep their output around
//! when they fail, and the waiting primitives are bounded by a timeout.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::time::{sleep, Instant};

use crate::common::config::Config;
use crate::common::{shell_quote, Error, Result};
use crate::remote::{CommandOutput, RemoteExecutor};
use crate::watch::{LogTailWatch, Pattern, WatchHandle};

/// Pause between two liveness checks of a rebooting host
const RESTART_CHECK_INTERVAL: Duration = Duration::from_secs(3);

/// Longest command excerpt kept in an artifact file name
const ARTIFACT_NAME_MAX: usize = 60;

/// Command helpers shared by every component of a run
#[derive(Clone)]
pub struct ActionRunner {
    executor: Arc<dyn RemoteExecutor>,
    watches: LogTailWatch,
    config: Arc<Config>,
}

impl ActionRunner {
    pub fn new(executor: Arc<dyn RemoteExecutor>, watches: LogTailWatch, config: Arc<Config>) -> Self {
        Self {
            executor,
            watches,
            config,
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn executor(&self) -> &Arc<dyn RemoteExecutor> {
        &self.executor
    }

    /// Configured cluster nodes
    pub fn nodes(&self) -> &[String] {
        &self.config.cluster.nodes
    }

    fn trace_command(&self, host: &str, command: &str) {
        if self.config.run.verbose {
            tracing::info!("> [{}] {}", host, command);
        } else {
            tracing::debug!("> [{}] {}", host, command);
        }
    }

    /// Run a command and return its exit code
    pub async fn run(&self, host: &str, command: &str) -> Result<i32> {
        Ok(self.run_output(host, command).await?.code)
    }

    /// Run a command and return its captured output
    pub async fn run_output(&self, host: &str, command: &str) -> Result<CommandOutput> {
        self.trace_command(host, command);
        self.executor.run(host, command).await
    }

    /// Run a command that must succeed
    pub async fn run_checked(&self, host: &str, command: &str) -> Result<()> {
        self.run_expect(host, command, 0).await
    }

    /// Run a command that must exit with `expected`
    ///
    /// The output goes to a temporary file on the host. When the exit code
    /// differs, the file is renamed after the command and its exit code, a
    /// copy is saved in the local artifact directory, and the call fails with
    /// [`Error::CommandFailed`]. Otherwise the file is removed.
    pub async fn run_expect(&self, host: &str, command: &str, expected: i32) -> Result<()> {
        self.trace_command(host, command);
        let temp = temp_name();
        let wrapped = format!("( {} ) >{} 2>&1", command, temp);
        let code = self.executor.run(host, &wrapped).await?.code;

        if code == expected {
            self.executor.run(host, &format!("rm -f {}", temp)).await?;
            return Ok(());
        }

        let saved = format!("{}-{}-{}", temp, sanitize(command), code);
        let artifact = self.collect_artifact(host, &temp, &saved).await;
        Err(Error::CommandFailed {
            host: host.to_string(),
            command: command.to_string(),
            code,
            expected,
            artifact,
        })
    }

    /// Keep the output of a failed command on the host and locally
    async fn collect_artifact(&self, host: &str, temp: &str, saved: &str) -> Option<PathBuf> {
        let saved_quoted = shell_quote(saved);
        let moved = self
            .executor
            .run(host, &format!("mv {} {}", temp, saved_quoted))
            .await;
        if !matches!(moved, Ok(ref out) if out.success()) {
            tracing::warn!(host, "could not keep output of failed command in {}", saved);
            return None;
        }

        let output = match self.executor.run(host, &format!("cat {}", saved_quoted)).await {
            Ok(out) => out.stdout,
            Err(e) => {
                tracing::warn!(host, "could not fetch output of failed command: {}", e);
                return None;
            }
        };

        let dir = self.config.artifact_dir();
        let local = dir.join(format!("{}-{}", host, saved));
        match write_artifact(&dir, &local, &output).await {
            Ok(()) => {
                tracing::debug!(host, "saved failed command output to {}", local.display());
                Some(local)
            }
            Err(e) => {
                tracing::warn!("could not write artifact {}: {}", local.display(), e);
                None
            }
        }
    }

    /// Start a long-lived command in a detached screen session
    pub async fn run_background(&self, host: &str, session: &str, command: &str) -> Result<()> {
        let command = format!("screen -S {} -d -m {}", shell_quote(session), command);
        self.trace_command(host, &command);
        self.executor.run_async(host, &command).await
    }

    /// Run `command` on `hosts` until it succeeds on one of them
    pub async fn poll_until(&self, hosts: &[String], command: &str, timeout: Duration) -> Result<()> {
        self.poll_until_exit(hosts, command, 0, timeout).await
    }

    /// Run `command` on `hosts` until one of them exits with `expected`
    ///
    /// Each round tries every host at once. An attempt is bounded by the
    /// host poll timeout and by what is left of `timeout`; a host that does
    /// not answer in time, or is unreachable, is skipped for the round.
    pub async fn poll_until_exit(
        &self,
        hosts: &[String],
        command: &str,
        expected: i32,
        timeout: Duration,
    ) -> Result<()> {
        if self.config.run.verbose {
            tracing::info!("> [{}] {} -> UNTIL $? == {}", hosts.join(","), command, expected);
        }
        let deadline = Instant::now() + timeout;
        let interval = self.config.timeouts.poll_until_interval();
        loop {
            let bound = deadline
                .saturating_duration_since(Instant::now())
                .min(self.config.timeouts.host_poll_timeout());
            let mut attempts: FuturesUnordered<_> = hosts
                .iter()
                .map(|host| async move {
                    (host, tokio::time::timeout(bound, self.executor.run(host, command)).await)
                })
                .collect();
            while let Some((host, attempt)) = attempts.next().await {
                match attempt {
                    Ok(Ok(out)) if out.code == expected => return Ok(()),
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) if e.is_unreachable() => {
                        tracing::debug!(host = %host, "not answering yet: {}", e);
                    }
                    Ok(Err(e)) => return Err(e),
                    Err(_) => {
                        tracing::debug!(host = %host, "no answer within {:?}", bound);
                    }
                }
            }
            if Instant::now() + interval > deadline {
                return Err(Error::PollTimeout {
                    command: command.to_string(),
                    hosts: hosts.join(","),
                    secs: timeout.as_secs(),
                });
            }
            sleep(interval).await;
        }
    }

    /// Wait for a rebooted host to answer again
    pub async fn wait_until_restarted(&self, host: &str, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            sleep(RESTART_CHECK_INTERVAL).await;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::assertion(format!(
                    "{} did not come back within {} seconds",
                    host,
                    timeout.as_secs()
                )));
            }
            let check = remaining.min(self.config.timeouts.host_poll_timeout());
            if tokio::time::timeout(check, self.executor.is_reachable(host))
                .await
                .unwrap_or(false)
            {
                tracing::info!(host, "back online");
                return Ok(());
            }
        }
    }

    /// Set a reboot-lifetime node attribute
    pub async fn attribute_set(&self, node: &str, name: &str, value: &str, expected: i32) -> Result<()> {
        let command = format!(
            "crm_attribute -N {} -l reboot --name {} -v {}",
            node,
            name,
            shell_quote(value)
        );
        self.attribute_command(node, &command, "set", name, expected).await
    }

    /// Query a node attribute; with the configured "absent" exit code as
    /// `expected`, asserts that the attribute does not exist
    pub async fn attribute_get(&self, node: &str, name: &str, expected: i32) -> Result<()> {
        let command = format!("crm_attribute -N {} -l reboot --name {} -Q", node, name);
        self.attribute_command(node, &command, "get", name, expected).await
    }

    /// Delete a node attribute
    pub async fn attribute_delete(&self, node: &str, name: &str, expected: i32) -> Result<()> {
        let command = format!("crm_attribute -N {} -l reboot --name {} -D", node, name);
        self.attribute_command(node, &command, "del", name, expected).await
    }

    /// Assert that a node attribute is not set
    pub async fn attribute_absent(&self, node: &str, name: &str) -> Result<()> {
        let absent = self.config.attribute_absent_exit_code()?;
        self.attribute_get(node, name, absent).await
    }

    async fn attribute_command(
        &self,
        node: &str,
        command: &str,
        verb: &str,
        name: &str,
        expected: i32,
    ) -> Result<()> {
        let code = self.run(node, &format!("{} &>/dev/null", command)).await?;
        if code != expected {
            return Err(Error::assertion(format!(
                "{} crm attribute \"{}\" returned {} (expected {})",
                verb, name, code, expected
            )));
        }
        Ok(())
    }

    /// Whether `path` exists on every host
    pub async fn exists_on_all(&self, path: &str, hosts: &[String]) -> Result<bool> {
        let command = format!("test -e {}", shell_quote(path));
        for host in hosts {
            if self.run(host, &command).await? != 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Check that the tools a scenario relies on are installed on every node
    pub async fn check_prerequisites(&self, paths: &[&str]) -> Result<()> {
        let mut missing = Vec::new();
        for path in paths {
            if !self.exists_on_all(path, self.nodes()).await? {
                tracing::error!(
                    "{} could not be found on remote nodes, install the necessary package to run the tests",
                    path
                );
                missing.push(path.to_string());
            }
        }
        if !missing.is_empty() {
            return Err(Error::assertion(format!(
                "missing prerequisites: {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }

    /// Arm a watch on every cluster node with the configured dead time
    pub async fn make_watch(&self, patterns: Vec<Pattern>) -> Result<WatchHandle> {
        self.create_watch(patterns, self.nodes(), self.config.timeouts.dead_time())
            .await
    }

    /// Arm a watch on chosen hosts with an explicit deadline
    pub async fn create_watch(
        &self,
        patterns: Vec<Pattern>,
        hosts: &[String],
        deadline: Duration,
    ) -> Result<WatchHandle> {
        self.watches.arm(patterns, hosts, deadline).await
    }
}

/// Per-call remote temp file name
fn temp_name() -> String {
    let micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros())
        .unwrap_or_default();
    format!("ratester-tmp{}", micros)
}

/// Make a command usable as part of a file name
fn sanitize(command: &str) -> String {
    let mut name: String = command
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect();
    name.truncate(ARTIFACT_NAME_MAX);
    name
}

async fn write_artifact(dir: &Path, path: &Path, content: &str) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(path, content).await
}
