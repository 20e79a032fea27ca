//! SSH transport for remote commands

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;

use super::{CommandOutput, RemoteExecutor};
use crate::common::{Config, Error, Result};

/// ssh reserves this exit status for its own failures
const SSH_FAILURE: i32 = 255;

/// Runs commands on cluster nodes through the system `ssh` client
#[derive(Debug, Clone)]
pub struct SshExecutor {
    ssh: PathBuf,
    user: String,
    identity_file: Option<PathBuf>,
    connect_timeout: Duration,
    options: Vec<String>,
    command_timeout: Duration,
}

impl SshExecutor {
    /// Build an executor from the configuration, locating `ssh` in PATH
    pub fn from_config(config: &Config) -> Result<Self> {
        let ssh = which::which("ssh")
            .map_err(|e| Error::Config(format!("ssh client not found in PATH: {}", e)))?;
        Ok(Self {
            ssh,
            user: config.ssh.user.clone(),
            identity_file: config.ssh.identity_file.clone(),
            connect_timeout: Duration::from_secs(config.ssh.connect_timeout_secs),
            options: config.ssh.options.clone(),
            command_timeout: config.timeouts.command_timeout(),
        })
    }

    fn destination(&self, host: &str) -> String {
        if self.user.is_empty() {
            host.to_string()
        } else {
            format!("{}@{}", self.user, host)
        }
    }

    fn command(&self, host: &str, remote: &str) -> Command {
        let mut cmd = Command::new(&self.ssh);
        cmd.args(["-o", "BatchMode=yes"])
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout.as_secs()))
            .args(["-o", "StrictHostKeyChecking=no"]);
        if let Some(identity) = &self.identity_file {
            cmd.arg("-i").arg(identity);
        }
        for option in &self.options {
            cmd.arg("-o").arg(option);
        }
        cmd.arg(self.destination(host))
            .arg(remote)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Connection check run before each command
    ///
    /// A node that was just fenced must be reported as gone rather than
    /// leave the caller waiting on a half-open connection.
    async fn ensure_connection(&self, host: &str) -> Result<()> {
        let limit = self.connect_timeout + Duration::from_secs(2);
        let probe = self.command(host, "true").output();
        match timeout(limit, probe).await {
            Ok(Ok(out)) if out.status.success() => Ok(()),
            Ok(Ok(out)) => Err(Error::unreachable(
                host,
                String::from_utf8_lossy(&out.stderr).trim().to_string(),
            )),
            Ok(Err(e)) => Err(Error::RemoteSpawn {
                host: host.to_string(),
                source: e,
            }),
            Err(_) => Err(Error::unreachable(
                host,
                format!("no answer within {}s", limit.as_secs()),
            )),
        }
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(&self, host: &str, command: &str) -> Result<CommandOutput> {
        self.ensure_connection(host).await?;

        tracing::trace!(host, command, "ssh exec");
        let output = timeout(self.command_timeout, self.command(host, command).output())
            .await
            .map_err(|_| Error::RemoteTimeout {
                host: host.to_string(),
                secs: self.command_timeout.as_secs(),
            })?
            .map_err(|e| Error::RemoteSpawn {
                host: host.to_string(),
                source: e,
            })?;

        // Killed by a signal: the connection dropped under us
        let code = output.status.code().unwrap_or(SSH_FAILURE);
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if code == SSH_FAILURE {
            return Err(Error::unreachable(host, stderr.trim().to_string()));
        }

        Ok(CommandOutput {
            code,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr,
        })
    }

    async fn run_async(&self, host: &str, command: &str) -> Result<()> {
        self.ensure_connection(host).await?;

        let mut cmd = self.command(host, command);
        cmd.stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);
        let mut child = cmd.spawn().map_err(|e| Error::RemoteSpawn {
            host: host.to_string(),
            source: e,
        })?;

        let host = host.to_string();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => tracing::debug!(host, ?status, "background command finished"),
                Err(e) => tracing::warn!(host, "background command lost: {}", e),
            }
        });
        Ok(())
    }
}
