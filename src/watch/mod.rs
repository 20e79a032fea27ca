//! Log pattern watches
//!
//! A watch is the synchronization barrier of the tester: it is armed before
//! an action, then awaited until the expected log lines showed up on the
//! expected hosts, or until its deadline.
//!
//! Every host is polled by its own task, so a slow host never delays the
//! others. A host whose poll does not answer within the poll timeout is
//! dropped from the watch for good: tests fence and reboot nodes on purpose,
//! and losing sight of such a node must never turn into a hang. Patterns
//! that can only be satisfied by dropped hosts are reported unmatched as
//! soon as the host is gone instead of at the deadline.

mod pattern;
pub mod templates;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, timeout, Instant};

use crate::common::config::Timeouts;
use crate::common::{Error, Result};
use crate::remote::{LogSource, LogTail};

pub use pattern::{HostScope, Pattern};

/// One log line that satisfied a pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub host: String,
    pub line: String,
    /// Index of the pattern in the armed list
    pub pattern: usize,
    pub description: String,
    pub captures: BTreeMap<String, String>,
}

/// How a watch resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchStatus {
    /// Everything that was awaited matched
    Matched,
    /// Remaining patterns could only come from hosts that were dropped
    HostsLost,
    /// The deadline elapsed first
    Expired,
}

/// Final state of a watch
#[derive(Debug, Clone)]
pub struct Resolution {
    pub status: WatchStatus,
    /// Matches in arrival order; file order within one host
    pub matched: Vec<Match>,
    pub unmatched: Vec<Pattern>,
    /// Hosts dropped because they stopped answering
    pub dropped_hosts: Vec<String>,
}

impl Resolution {
    pub fn is_complete(&self) -> bool {
        self.unmatched.is_empty()
    }

    pub fn unmatched_descriptions(&self) -> Vec<String> {
        self.unmatched.iter().map(|p| p.description().to_string()).collect()
    }

    /// Turn unmatched patterns into an assertion failure
    pub fn ensure_complete(&self) -> Result<()> {
        if self.is_complete() {
            Ok(())
        } else {
            Err(Error::WatchUnmatched(self.unmatched_descriptions()))
        }
    }
}

/// Arms watches against a log source
#[derive(Clone)]
pub struct LogTailWatch {
    source: Arc<dyn LogSource>,
    poll_interval: Duration,
    host_timeout: Duration,
}

impl LogTailWatch {
    pub fn new(source: Arc<dyn LogSource>, poll_interval: Duration, host_timeout: Duration) -> Self {
        Self {
            source,
            poll_interval,
            host_timeout,
        }
    }

    pub fn from_timeouts(source: Arc<dyn LogSource>, timeouts: &Timeouts) -> Self {
        Self::new(source, timeouts.poll_interval(), timeouts.host_poll_timeout())
    }

    /// Start watching `hosts` for `patterns`
    ///
    /// Only lines logged after this call are considered. The deadline is
    /// counted from now. Hosts that cannot even be opened are dropped right
    /// away.
    pub async fn arm(
        &self,
        patterns: Vec<Pattern>,
        hosts: &[String],
        deadline: Duration,
    ) -> Result<WatchHandle> {
        if hosts.is_empty() {
            return Err(Error::NoLogSources);
        }
        let deadline = Instant::now() + deadline;

        let opened = join_all(hosts.iter().map(|host| async move {
            let opened = timeout(self.host_timeout, self.source.open(host)).await;
            (host.clone(), opened)
        }))
        .await;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = WatchState::new(patterns);
        let mut pollers = Vec::new();
        for (host, opened) in opened {
            match opened {
                Ok(Ok(tail)) => {
                    state.active.insert(host);
                    pollers.push(tokio::spawn(poll_host(
                        tail,
                        tx.clone(),
                        self.poll_interval,
                        self.host_timeout,
                    )));
                }
                Ok(Err(e)) => {
                    tracing::debug!(host = %host, "cannot open log stream: {}", e);
                    state.dropped.push(host);
                }
                Err(_) => {
                    tracing::debug!(host = %host, "log stream did not open within {:?}", self.host_timeout);
                    state.dropped.push(host);
                }
            }
        }

        Ok(WatchHandle {
            state,
            events: rx,
            pollers,
            deadline,
        })
    }
}

/// What a host poller reports to the watch owner
enum HostEvent {
    Lines { host: String, lines: Vec<String> },
    Lost { host: String, reason: String },
}

/// Poll one host until it goes away or the watch is resolved
async fn poll_host(
    mut tail: Box<dyn LogTail>,
    events: mpsc::UnboundedSender<HostEvent>,
    interval: Duration,
    host_timeout: Duration,
) {
    let host = tail.host().to_string();
    loop {
        match timeout(host_timeout, tail.tail()).await {
            Ok(Ok(lines)) => {
                if !lines.is_empty() {
                    let event = HostEvent::Lines {
                        host: host.clone(),
                        lines,
                    };
                    if events.send(event).is_err() {
                        return;
                    }
                }
            }
            Ok(Err(e)) if e.is_unreachable() => {
                let _ = events.send(HostEvent::Lost {
                    host,
                    reason: e.to_string(),
                });
                return;
            }
            Ok(Err(e)) => {
                tracing::warn!(host = %host, "log poll failed: {}", e);
            }
            Err(_) => {
                let _ = events.send(HostEvent::Lost {
                    host,
                    reason: format!("did not answer within {:?}", host_timeout),
                });
                return;
            }
        }
        if events.is_closed() {
            return;
        }
        sleep(interval).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    All,
    Any,
}

struct Tracked {
    pattern: Pattern,
    seen_on: BTreeSet<String>,
    done: bool,
}

struct WatchState {
    patterns: Vec<Tracked>,
    active: BTreeSet<String>,
    dropped: Vec<String>,
    matched: Vec<Match>,
}

impl WatchState {
    fn new(patterns: Vec<Pattern>) -> Self {
        Self {
            patterns: patterns
                .into_iter()
                .map(|pattern| Tracked {
                    pattern,
                    seen_on: BTreeSet::new(),
                    done: false,
                })
                .collect(),
            active: BTreeSet::new(),
            dropped: Vec::new(),
            matched: Vec::new(),
        }
    }

    /// Whether a pattern can still be satisfied by the hosts left
    fn satisfiable(&self, tracked: &Tracked) -> bool {
        match tracked.pattern.scope() {
            HostScope::Any | HostScope::All => !self.active.is_empty(),
            HostScope::AnyOf(hosts) => hosts.iter().any(|h| self.active.contains(h)),
            HostScope::Host(h) => self.active.contains(h),
        }
    }

    /// An all-hosts pattern is done once every remaining host logged it
    fn refresh_all_scoped(&mut self) {
        let active = &self.active;
        for tracked in &mut self.patterns {
            if !tracked.done
                && tracked.pattern.scope() == &HostScope::All
                && !active.is_empty()
                && active.is_subset(&tracked.seen_on)
            {
                tracked.done = true;
            }
        }
    }

    fn first_match(&self) -> bool {
        !self.matched.is_empty()
    }

    fn resolved(&self, mode: Mode) -> Option<WatchStatus> {
        let pending: Vec<&Tracked> = self.patterns.iter().filter(|t| !t.done).collect();
        match mode {
            Mode::Any if self.first_match() || self.patterns.is_empty() => {
                Some(WatchStatus::Matched)
            }
            Mode::All if pending.is_empty() => Some(WatchStatus::Matched),
            _ if pending.iter().all(|t| !self.satisfiable(t)) => Some(WatchStatus::HostsLost),
            _ => None,
        }
    }

    /// Feed lines of one host, in order; stop as soon as the watch resolves
    fn ingest(&mut self, host: &str, lines: Vec<String>, mode: Mode) {
        for line in lines {
            let candidate = self.patterns.iter().position(|t| {
                !t.done
                    && t.pattern.scope().admits(host)
                    && !t.seen_on.contains(host)
                    && t.pattern.is_match(&line)
            });
            let Some(index) = candidate else { continue };

            let tracked = &mut self.patterns[index];
            let captures = tracked.pattern.captures(&line).unwrap_or_default();
            tracing::debug!(host, pattern = %tracked.pattern, "matched: {}", line);
            tracked.seen_on.insert(host.to_string());
            if tracked.pattern.scope() != &HostScope::All {
                tracked.done = true;
            }
            self.matched.push(Match {
                host: host.to_string(),
                line,
                pattern: index,
                description: tracked.pattern.description().to_string(),
                captures,
            });
            self.refresh_all_scoped();

            if self.resolved(mode).is_some() {
                return;
            }
        }
    }

    fn drop_host(&mut self, host: &str, reason: &str) {
        if self.active.remove(host) {
            tracing::info!(host, "forgetting host for this watch: {}", reason);
            self.dropped.push(host.to_string());
            self.refresh_all_scoped();
        }
    }

    fn into_resolution(self, status: WatchStatus, mode: Mode) -> Resolution {
        let unmatched = if mode == Mode::Any && status == WatchStatus::Matched {
            Vec::new()
        } else {
            self.patterns
                .into_iter()
                .filter(|t| !t.done)
                .map(|t| t.pattern)
                .collect()
        };
        Resolution {
            status,
            matched: self.matched,
            unmatched,
            dropped_hosts: self.dropped,
        }
    }
}

/// An armed watch
///
/// Awaiting consumes the handle: a watch resolves exactly once. Dropping the
/// handle stops its pollers.
pub struct WatchHandle {
    state: WatchState,
    events: mpsc::UnboundedReceiver<HostEvent>,
    pollers: Vec<JoinHandle<()>>,
    deadline: Instant,
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("active", &self.state.active)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl WatchHandle {
    /// Hosts still observed by this watch
    pub fn active_hosts(&self) -> Vec<String> {
        self.state.active.iter().cloned().collect()
    }

    /// Wait until every pattern matched on its required hosts
    pub async fn await_all(self) -> Resolution {
        self.resolve(Mode::All).await
    }

    /// Wait until any pattern matched on any host
    pub async fn await_any(self) -> Resolution {
        self.resolve(Mode::Any).await
    }

    async fn resolve(mut self, mode: Mode) -> Resolution {
        let status = loop {
            if let Some(status) = self.state.resolved(mode) {
                break status;
            }
            if Instant::now() >= self.deadline {
                break WatchStatus::Expired;
            }
            tokio::select! {
                biased;
                event = self.events.recv() => match event {
                    Some(HostEvent::Lines { host, lines }) => self.state.ingest(&host, lines, mode),
                    Some(HostEvent::Lost { host, reason }) => self.state.drop_host(&host, &reason),
                    None => {
                        // Every poller has exited; nothing more can arrive
                        break self.state.resolved(mode).unwrap_or(WatchStatus::HostsLost);
                    }
                },
                _ = sleep_until(self.deadline) => break WatchStatus::Expired,
            }
        };

        for poller in &self.pollers {
            poller.abort();
        }
        let state = std::mem::replace(&mut self.state, WatchState::new(Vec::new()));
        let resolution = state.into_resolution(status, mode);
        if !resolution.is_complete() {
            tracing::info!(
                status = ?resolution.status,
                "watch resolved with unmatched patterns: {:?}",
                resolution.unmatched_descriptions()
            );
        }
        resolution
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        for poller in &self.pollers {
            poller.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::mock::MemoryLogSource;

    fn nodes(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn watcher(source: &MemoryLogSource) -> LogTailWatch {
        LogTailWatch::new(
            Arc::new(source.clone()),
            Duration::from_secs(1),
            Duration::from_secs(8),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_patterns_across_hosts() {
        let source = MemoryLogSource::new();
        let watch = watcher(&source)
            .arm(
                Pattern::all(&["node-1.*stopped", "node-2.*stopped"]).unwrap(),
                &nodes(&["node-1", "node-2"]),
                Duration::from_secs(30),
            )
            .await
            .unwrap();
        source.schedule_line("node-1", Duration::from_secs(1), "rsc on node-1 stopped");
        source.schedule_line("node-2", Duration::from_secs(3), "rsc on node-2 stopped");

        let start = Instant::now();
        let res = watch.await_all().await;
        let elapsed = start.elapsed();

        assert_eq!(res.status, WatchStatus::Matched);
        assert!(res.unmatched.is_empty());
        assert_eq!(res.matched.len(), 2);
        assert_eq!(res.matched[0].host, "node-1");
        assert_eq!(res.matched[1].host, "node-2");
        assert!(elapsed >= Duration::from_secs(3) && elapsed < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_required_host_resolves_before_deadline() {
        let source = MemoryLogSource::new();
        let hosts = nodes(&["node-1", "node-2", "node-3"]);
        let watch = watcher(&source)
            .arm(
                vec![Pattern::new("node-2.*promoted").unwrap().on_host("node-2")],
                &hosts,
                Duration::from_secs(30),
            )
            .await
            .unwrap();
        source.kill_after("node-2", Duration::from_secs(2));

        let start = Instant::now();
        let res = watch.await_all().await;
        let elapsed = start.elapsed();

        assert_eq!(res.status, WatchStatus::HostsLost);
        assert_eq!(res.unmatched_descriptions(), vec!["node-2.*promoted"]);
        assert_eq!(res.dropped_hosts, vec!["node-2"]);
        assert!(elapsed <= Duration::from_secs(12), "took {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_host_does_not_block_other_patterns() {
        let source = MemoryLogSource::new();
        let hosts = nodes(&["node-1", "node-2"]);
        let watch = watcher(&source)
            .arm(
                vec![Pattern::new("recovered").unwrap().on_host("node-1")],
                &hosts,
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        source.kill_after("node-2", Duration::ZERO);
        source.schedule_line("node-1", Duration::from_secs(20), "resource recovered");

        let res = watch.await_all().await;
        assert_eq!(res.status, WatchStatus::Matched);
        assert_eq!(res.matched[0].line, "resource recovered");
        assert_eq!(res.dropped_hosts, vec!["node-2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires() {
        let source = MemoryLogSource::new();
        let watch = watcher(&source)
            .arm(
                Pattern::all(&["never"]).unwrap(),
                &nodes(&["node-1"]),
                Duration::from_secs(10),
            )
            .await
            .unwrap();
        source.schedule_line("node-1", Duration::from_secs(1), "something else");

        let start = Instant::now();
        let res = watch.await_all().await;
        assert_eq!(res.status, WatchStatus::Expired);
        assert_eq!(res.unmatched.len(), 1);
        assert!(start.elapsed() <= Duration::from_secs(10) + Duration::from_millis(10));
        assert!(matches!(res.ensure_complete(), Err(Error::WatchUnmatched(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_line_is_never_counted_twice() {
        let source = MemoryLogSource::new();
        let watch = watcher(&source)
            .arm(
                Pattern::all(&["promoted", "promoted"]).unwrap(),
                &nodes(&["node-1"]),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        source.push_line("node-1", "galera promoted");

        let res = watch.await_all().await;
        assert_eq!(res.matched.len(), 1);
        assert_eq!(res.unmatched.len(), 1);
        assert_eq!(res.status, WatchStatus::Expired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lines_before_arm_are_ignored() {
        let source = MemoryLogSource::new();
        source.push_line("node-1", "old stopped");
        let watch = watcher(&source)
            .arm(
                Pattern::all(&["stopped"]).unwrap(),
                &nodes(&["node-1"]),
                Duration::from_secs(3),
            )
            .await
            .unwrap();
        let res = watch.await_all().await;
        assert_eq!(res.status, WatchStatus::Expired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_any_returns_first_match() {
        let source = MemoryLogSource::new();
        let watch = watcher(&source)
            .arm(
                Pattern::all(&["started", "failed"]).unwrap(),
                &nodes(&["node-1", "node-2"]),
                Duration::from_secs(30),
            )
            .await
            .unwrap();
        source.schedule_line("node-2", Duration::from_secs(2), "dummy failed");
        source.schedule_line("node-1", Duration::from_secs(5), "dummy started");

        let res = watch.await_any().await;
        assert_eq!(res.status, WatchStatus::Matched);
        assert_eq!(res.matched.len(), 1);
        assert_eq!(res.matched[0].pattern, 1);
        assert!(res.is_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_any_gives_up_when_candidate_hosts_die() {
        let source = MemoryLogSource::new();
        let watch = watcher(&source)
            .arm(
                vec![
                    Pattern::new("dummy started").unwrap().on_host("node-2"),
                    Pattern::new("dummy started").unwrap().on_host("node-3"),
                ],
                &nodes(&["node-1", "node-2", "node-3"]),
                Duration::from_secs(120),
            )
            .await
            .unwrap();
        assert_eq!(watch.active_hosts(), nodes(&["node-1", "node-2", "node-3"]));
        source.kill_after("node-2", Duration::from_secs(1));
        source.kill_after("node-3", Duration::from_secs(2));
        source.schedule_line("node-1", Duration::from_secs(3), "dummy started");

        let start = Instant::now();
        let res = watch.await_any().await;
        assert_eq!(res.status, WatchStatus::HostsLost);
        assert!(res.matched.is_empty());
        assert_eq!(res.unmatched.len(), 2);
        let mut dropped = res.dropped_hosts.clone();
        dropped.sort();
        assert_eq!(dropped, nodes(&["node-2", "node-3"]));
        assert!(start.elapsed() < Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_hosts_scope_relaxes_on_drop() {
        let source = MemoryLogSource::new();
        let watch = watcher(&source)
            .arm(
                vec![Pattern::new(r"(?P<who>node-\d) up").unwrap().on_all_hosts()],
                &nodes(&["node-1", "node-2", "node-3"]),
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        source.push_line("node-1", "node-1 up");
        source.push_line("node-3", "node-3 up");
        source.kill_after("node-2", Duration::from_secs(1));

        let res = watch.await_all().await;
        assert_eq!(res.status, WatchStatus::Matched);
        let mut who: Vec<&str> = res.matched.iter().map(|m| m.captures["who"].as_str()).collect();
        who.sort();
        assert_eq!(who, vec!["node-1", "node-3"]);
        assert_eq!(res.dropped_hosts, vec!["node-2"]);
    }

    #[tokio::test]
    async fn test_arm_without_hosts_fails() {
        let source = MemoryLogSource::new();
        let err = watcher(&source)
            .arm(Vec::new(), &[], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoLogSources));
    }
}
