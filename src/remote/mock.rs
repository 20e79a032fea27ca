//! In-memory fakes of the remote layer
//!
//! `MockExecutor` answers commands from scripted rules and records what was
//! run; `MemoryLogSource` serves per-host logs whose lines can be scheduled
//! in (tokio) time and whose hosts can be made to stop answering, which is
//! how fencing looks from the tester's side.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{CommandOutput, LogSource, LogTail, RemoteExecutor};
use crate::common::{Error, Result};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Rule {
    host: Option<String>,
    needle: String,
    replies: VecDeque<CommandOutput>,
}

#[derive(Default)]
struct MockState {
    rules: Vec<Rule>,
    unreachable: HashSet<String>,
    hanging: HashSet<String>,
    executed: Vec<(String, String)>,
    background: Vec<(String, String)>,
}

/// Scripted [`RemoteExecutor`]
///
/// Commands matching no rule succeed with empty output. Rules are checked
/// newest first; a rule with several replies hands them out in order and
/// keeps repeating the last one.
#[derive(Default, Clone)]
pub struct MockExecutor {
    state: Arc<Mutex<MockState>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply with `output` to any command containing `needle`
    pub fn reply_when(&self, needle: &str, output: CommandOutput) {
        self.push_rule(None, needle, vec![output]);
    }

    /// Reply with an exit code to any command containing `needle`
    pub fn exit_when(&self, needle: &str, code: i32) {
        self.reply_when(needle, CommandOutput::with_code(code));
    }

    /// Reply to commands containing `needle` on `host` only
    pub fn reply_on(&self, host: &str, needle: &str, output: CommandOutput) {
        self.push_rule(Some(host), needle, vec![output]);
    }

    /// Hand out a sequence of exit codes to successive matching commands
    pub fn exit_sequence(&self, needle: &str, codes: &[i32]) {
        let replies = codes.iter().map(|c| CommandOutput::with_code(*c)).collect();
        self.push_rule(None, needle, replies);
    }

    fn push_rule(&self, host: Option<&str>, needle: &str, replies: Vec<CommandOutput>) {
        lock(&self.state).rules.push(Rule {
            host: host.map(str::to_string),
            needle: needle.to_string(),
            replies: replies.into(),
        });
    }

    /// Make every command on `host` fail as unreachable
    pub fn set_unreachable(&self, host: &str, unreachable: bool) {
        let mut state = lock(&self.state);
        if unreachable {
            state.unreachable.insert(host.to_string());
        } else {
            state.unreachable.remove(host);
        }
    }

    /// Make every command on `host` block forever
    pub fn set_hanging(&self, host: &str) {
        lock(&self.state).hanging.insert(host.to_string());
    }

    /// All synchronous commands, in execution order
    pub fn commands(&self) -> Vec<(String, String)> {
        lock(&self.state).executed.clone()
    }

    /// Synchronous commands run on one host
    pub fn commands_for(&self, host: &str) -> Vec<String> {
        lock(&self.state)
            .executed
            .iter()
            .filter(|(h, _)| h == host)
            .map(|(_, c)| c.clone())
            .collect()
    }

    /// Commands started in the background
    pub fn background_commands(&self) -> Vec<(String, String)> {
        lock(&self.state).background.clone()
    }

    fn reply(&self, host: &str, command: &str) -> CommandOutput {
        let mut state = lock(&self.state);
        state.executed.push((host.to_string(), command.to_string()));
        let rule = state.rules.iter_mut().rev().find(|r| {
            command.contains(&r.needle) && r.host.as_deref().map_or(true, |h| h == host)
        });
        match rule {
            Some(rule) if rule.replies.len() > 1 => rule.replies.pop_front().unwrap_or_default(),
            Some(rule) => rule.replies.front().cloned().unwrap_or_default(),
            None => CommandOutput::default(),
        }
    }

    fn availability(&self, host: &str) -> (bool, bool) {
        let state = lock(&self.state);
        (state.unreachable.contains(host), state.hanging.contains(host))
    }
}

#[async_trait]
impl RemoteExecutor for MockExecutor {
    async fn run(&self, host: &str, command: &str) -> Result<CommandOutput> {
        let (unreachable, hanging) = self.availability(host);
        if hanging {
            std::future::pending::<()>().await;
        }
        if unreachable {
            return Err(Error::unreachable(host, "mock host down"));
        }
        Ok(self.reply(host, command))
    }

    async fn run_async(&self, host: &str, command: &str) -> Result<()> {
        if self.availability(host).0 {
            return Err(Error::unreachable(host, "mock host down"));
        }
        lock(&self.state)
            .background
            .push((host.to_string(), command.to_string()));
        Ok(())
    }
}

#[derive(Default)]
struct HostLog {
    /// Lines with the instant they become readable, in insertion order
    entries: Vec<(Instant, String)>,
    dies_at: Option<Instant>,
    polls: usize,
}

impl HostLog {
    fn visible(&self, now: Instant) -> Vec<&str> {
        let mut visible: Vec<&(Instant, String)> =
            self.entries.iter().filter(|(at, _)| *at <= now).collect();
        visible.sort_by_key(|(at, _)| *at);
        visible.into_iter().map(|(_, l)| l.as_str()).collect()
    }

    fn is_dead(&self, now: Instant) -> bool {
        self.dies_at.is_some_and(|t| t <= now)
    }
}

/// In-memory [`LogSource`] driven by tokio time
#[derive(Default, Clone)]
pub struct MemoryLogSource {
    hosts: Arc<Mutex<HashMap<String, HostLog>>>,
}

impl MemoryLogSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a line readable right away
    pub fn push_line(&self, host: &str, line: &str) {
        self.schedule_line(host, Duration::ZERO, line);
    }

    /// Append a line that becomes readable after `delay`
    pub fn schedule_line(&self, host: &str, delay: Duration, line: &str) {
        let at = Instant::now() + delay;
        lock(&self.hosts)
            .entry(host.to_string())
            .or_default()
            .entries
            .push((at, line.to_string()));
    }

    /// Stop answering for `host` after `delay`; reads then block forever
    pub fn kill_after(&self, host: &str, delay: Duration) {
        lock(&self.hosts).entry(host.to_string()).or_default().dies_at =
            Some(Instant::now() + delay);
    }

    /// Number of tail reads served for `host`
    pub fn polls(&self, host: &str) -> usize {
        lock(&self.hosts).get(host).map_or(0, |h| h.polls)
    }

    fn is_dead(&self, host: &str) -> bool {
        lock(&self.hosts)
            .get(host)
            .is_some_and(|h| h.is_dead(Instant::now()))
    }
}

#[async_trait]
impl LogSource for MemoryLogSource {
    async fn open(&self, host: &str) -> Result<Box<dyn LogTail>> {
        if self.is_dead(host) {
            std::future::pending::<()>().await;
        }
        let cursor = lock(&self.hosts)
            .entry(host.to_string())
            .or_default()
            .visible(Instant::now())
            .len();
        Ok(Box::new(MemoryTail {
            host: host.to_string(),
            source: self.clone(),
            cursor,
        }))
    }
}

struct MemoryTail {
    host: String,
    source: MemoryLogSource,
    cursor: usize,
}

#[async_trait]
impl LogTail for MemoryTail {
    fn host(&self) -> &str {
        &self.host
    }

    async fn tail(&mut self) -> Result<Vec<String>> {
        if self.source.is_dead(&self.host) {
            std::future::pending::<()>().await;
        }
        let mut hosts = lock(&self.source.hosts);
        let log = hosts.entry(self.host.clone()).or_default();
        log.polls += 1;
        let fresh: Vec<String> = log
            .visible(Instant::now())
            .into_iter()
            .skip(self.cursor)
            .map(str::to_string)
            .collect();
        self.cursor += fresh.len();
        Ok(fresh)
    }
}
