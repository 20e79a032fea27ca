//! Remote execution and log streaming
//!
//! The tester never talks to cluster nodes directly: every command goes
//! through a [`RemoteExecutor`] and every log line comes from a
//! [`LogSource`]. Production runs use SSH; unit tests use the in-memory
//! fakes from [`mock`].

mod logsource;
pub mod mock;
mod ssh;

use async_trait::async_trait;

use crate::common::Result;

pub use logsource::{LogSource, LogTail, RemoteLogSource};
pub use ssh::SshExecutor;

/// Outcome of a remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit status of the remote command
    pub code: i32,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl CommandOutput {
    /// Build an output with only an exit code
    pub fn with_code(code: i32) -> Self {
        Self {
            code,
            ..Default::default()
        }
    }

    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// stdout followed by stderr
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&self.stderr);
        }
        out
    }
}

/// Runs shell commands on named hosts
///
/// Implementations must be safe to call concurrently for distinct hosts.
/// An unreachable host is reported as `Error::HostUnreachable`, never as a
/// hang longer than the executor's own timeout.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run a command and wait for its completion
    async fn run(&self, host: &str, command: &str) -> Result<CommandOutput>;

    /// Start a command and return without waiting for it
    async fn run_async(&self, host: &str, command: &str) -> Result<()>;

    /// Whether the host currently answers a trivial command
    async fn is_reachable(&self, host: &str) -> bool {
        matches!(self.run(host, "true").await, Ok(out) if out.success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_output() {
        let out = CommandOutput {
            code: 1,
            stdout: "line".into(),
            stderr: "boom".into(),
        };
        assert_eq!(out.combined(), "line\nboom");
        assert!(!out.success());
        assert!(CommandOutput::with_code(0).success());
    }
}
