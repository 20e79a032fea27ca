//! Per-host log streams with read cursors

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use super::RemoteExecutor;
use crate::common::config::{LogConfig, LogKind};
use crate::common::{shell_quote, Error, Result};

/// Produces log tails for hosts
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Open a tail of `host`'s log, positioned at the current end of the stream
    async fn open(&self, host: &str) -> Result<Box<dyn LogTail>>;
}

/// A read cursor over one host's log stream
///
/// Each call to [`LogTail::tail`] returns the complete lines appended since
/// the previous call, in file order. A line is never returned twice.
#[async_trait]
pub trait LogTail: Send {
    fn host(&self) -> &str;

    async fn tail(&mut self) -> Result<Vec<String>>;
}

/// Log source reading cluster logs over a [`RemoteExecutor`]
pub struct RemoteLogSource {
    executor: Arc<dyn RemoteExecutor>,
    kind: LogKind,
    path: PathBuf,
}

impl RemoteLogSource {
    pub fn new(executor: Arc<dyn RemoteExecutor>, config: &LogConfig) -> Self {
        Self {
            executor,
            kind: config.kind,
            path: config.path.clone(),
        }
    }
}

#[async_trait]
impl LogSource for RemoteLogSource {
    async fn open(&self, host: &str) -> Result<Box<dyn LogTail>> {
        match self.kind {
            LogKind::File => {
                let path = shell_quote(&self.path.to_string_lossy());
                let out = self
                    .executor
                    .run(host, &format!("wc -l < {} 2>/dev/null || echo 0", path))
                    .await?;
                let lines = out.stdout.trim().parse().unwrap_or(0);
                Ok(Box::new(FileTail {
                    host: host.to_string(),
                    executor: self.executor.clone(),
                    path,
                    lines,
                }))
            }
            LogKind::Journal => {
                let position = journal_position(self.executor.as_ref(), host).await?;
                Ok(Box::new(JournalTail {
                    host: host.to_string(),
                    executor: self.executor.clone(),
                    position,
                }))
            }
        }
    }
}

/// Where a journal tail resumes reading
#[derive(Debug, Clone, PartialEq, Eq)]
enum JournalPosition {
    /// After this entry
    Cursor(String),
    /// From this remote wall clock time, for a journal with no entry yet
    Since(String),
}

/// Current end of `host`'s journal
///
/// `-n 0` does not print a cursor on every journald release; the last entry
/// is then read and discarded to get one. An empty journal falls back to
/// the remote clock.
async fn journal_position(executor: &dyn RemoteExecutor, host: &str) -> Result<JournalPosition> {
    for command in [
        "journalctl -q --no-pager -n 0 --show-cursor",
        "journalctl -q --no-pager -n 1 --show-cursor",
    ] {
        let out = executor.run(host, command).await?;
        if let (_, Some(cursor)) = split_journal_output(&out.stdout) {
            return Ok(JournalPosition::Cursor(cursor));
        }
    }

    let out = executor.run(host, "date '+%Y-%m-%d %H:%M:%S'").await?;
    let now = out.stdout.trim();
    if !out.success() || now.is_empty() {
        return Err(Error::LogStream {
            host: host.to_string(),
            reason: "cannot find the end of the journal".to_string(),
        });
    }
    tracing::debug!(host, "journal returned no cursor, reading from {}", now);
    Ok(JournalPosition::Since(now.to_string()))
}

/// Tail of a plain file, tracked by line count
struct FileTail {
    host: String,
    executor: Arc<dyn RemoteExecutor>,
    path: String,
    lines: u64,
}

#[async_trait]
impl LogTail for FileTail {
    fn host(&self) -> &str {
        &self.host
    }

    async fn tail(&mut self) -> Result<Vec<String>> {
        let command = format!(
            "wc -l < {path} 2>/dev/null || echo 0; tail -n +{next} {path} 2>/dev/null",
            path = self.path,
            next = self.lines + 1
        );
        let out = self.executor.run(&self.host, &command).await?;

        let (count, body) = out
            .stdout
            .split_once('\n')
            .unwrap_or((out.stdout.as_str(), ""));
        let count: u64 = count.trim().parse().map_err(|_| Error::LogStream {
            host: self.host.clone(),
            reason: format!("unexpected line count '{}'", count.trim()),
        })?;

        if count < self.lines {
            tracing::debug!(host = %self.host, "log file shrank, restarting from the top");
            self.lines = 0;
            return Ok(Vec::new());
        }

        let lines = complete_lines(body);
        self.lines += lines.len() as u64;
        Ok(lines)
    }
}

/// Tail of the systemd journal, tracked by journal cursor
struct JournalTail {
    host: String,
    executor: Arc<dyn RemoteExecutor>,
    position: JournalPosition,
}

#[async_trait]
impl LogTail for JournalTail {
    fn host(&self) -> &str {
        &self.host
    }

    async fn tail(&mut self) -> Result<Vec<String>> {
        let from = match &self.position {
            JournalPosition::Cursor(cursor) => format!("--after-cursor={}", shell_quote(cursor)),
            JournalPosition::Since(time) => format!("--since={}", shell_quote(time)),
        };
        let command = format!("journalctl -q --no-pager -o short --show-cursor {}", from);
        let out = self.executor.run(&self.host, &command).await?;
        let (lines, cursor) = split_journal_output(&out.stdout);
        if let Some(cursor) = cursor {
            self.position = JournalPosition::Cursor(cursor);
        }
        Ok(lines)
    }
}

/// Split text into lines, dropping a trailing line still being written
fn complete_lines(body: &str) -> Vec<String> {
    let mut lines: Vec<String> = body.split('\n').map(str::to_string).collect();
    // Either the empty string after the final newline, or a partial line
    lines.pop();
    lines
}

/// Separate journal entries from the trailing `-- cursor: ...` marker
fn split_journal_output(stdout: &str) -> (Vec<String>, Option<String>) {
    let mut lines = Vec::new();
    let mut cursor = None;
    for line in stdout.lines() {
        if let Some(c) = line.strip_prefix("-- cursor: ") {
            cursor = Some(c.trim().to_string());
        } else {
            lines.push(line.to_string());
        }
    }
    (lines, cursor)
}
