//! End-to-end tests of the orchestration engine
//!
//! A scripted cluster answers the commands of a run and writes the log lines
//! a real controller would, so whole runs of the dummy suite can execute in
//! virtual time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ratester::common::Config;
use ratester::remote::mock::{MemoryLogSource, MockExecutor};
use ratester::remote::{CommandOutput, RemoteExecutor};
use ratester::testing::{
    BadNewsAudit, Harness, Interrupt, Interrupts, Registry, Runner, ScenarioState, ShmAudit,
    Suite,
};
use ratester::{Result, Verdict};

const CONTROLLER: &str = "pacemaker-controld[1024]: notice:";

/// Scripted executor that logs what pacemaker would log for each command
#[derive(Clone)]
struct SimulatedCluster {
    mock: MockExecutor,
    logs: MemoryLogSource,
    nodes: Vec<String>,
    /// Resource name as it appears in probe operations
    probed: String,
    /// Where the resource starts
    start_node: String,
    /// Enabling the resource never produces a start
    stuck: Arc<AtomicBool>,
    /// Enabling the resource also logs a monitor failure
    noisy: Arc<AtomicBool>,
}

impl SimulatedCluster {
    fn new(nodes: &[&str]) -> Self {
        Self {
            mock: MockExecutor::new(),
            logs: MemoryLogSource::new(),
            nodes: nodes.iter().map(|n| n.to_string()).collect(),
            probed: "dummy".to_string(),
            start_node: nodes[0].to_string(),
            stuck: Arc::default(),
            noisy: Arc::default(),
        }
    }

    fn bundled(mut self) -> Self {
        self.probed = "dummy-bundle-podman-0".to_string();
        self.start_node = "dummy-bundle-0".to_string();
        self
    }

    fn log(&self, line: String) {
        self.logs.push_line(&self.nodes[0], &line);
    }

    fn probes(&self) {
        for node in &self.nodes {
            self.log(format!(
                "{} Result of probe operation for {} on {}: 7 (not running)",
                CONTROLLER, self.probed, node
            ));
        }
    }

    fn react(&self, command: &str) {
        if command.contains("pcs cluster start --all") {
            self.log(format!("{} State transition S_STARTING -> S_PENDING", CONTROLLER));
            self.log(format!("{} State transition S_POLICY_ENGINE -> S_IDLE", CONTROLLER));
        } else if command.contains("pcs resource create dummy") {
            self.log(format!("{} State transition S_POLICY_ENGINE -> S_IDLE", CONTROLLER));
            self.probes();
        } else if command.contains("pcs resource refresh") {
            self.probes();
        } else if command.contains("pcs resource enable") {
            if self.noisy.load(Ordering::SeqCst) {
                self.logs
                    .push_line(&self.nodes[1], "pacemaker-execd[7]: error: dummy_monitor_0 failed");
            }
            if !self.stuck.load(Ordering::SeqCst) {
                self.log(format!(
                    "{} Result of start operation for dummy on {}: 0 (ok)",
                    CONTROLLER, self.start_node
                ));
            }
        } else if command.contains("pcs resource disable") {
            self.log(format!(
                "{} Initiating stop operation dummy_stop_0 locally on {}",
                CONTROLLER, self.start_node
            ));
            self.log(format!(
                "{} Result of stop operation for dummy on {}: 0 (ok)",
                CONTROLLER, self.start_node
            ));
        }
    }
}

#[async_trait]
impl RemoteExecutor for SimulatedCluster {
    async fn run(&self, host: &str, command: &str) -> Result<CommandOutput> {
        let output = self.mock.run(host, command).await?;
        if output.success() {
            self.react(command);
        }
        Ok(output)
    }

    async fn run_async(&self, host: &str, command: &str) -> Result<()> {
        self.mock.run_async(host, command).await
    }
}

fn config(nodes: &[&str], artifacts: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.cluster.nodes = nodes.iter().map(|n| n.to_string()).collect();
    config.cluster.attribute_absent_exit_code = Some(105);
    config.timeouts.dead_time_secs = 30;
    config.run.artifact_dir = Some(artifacts.to_path_buf());
    config.validate().unwrap();
    config
}

fn harness(config: Config, cluster: &SimulatedCluster) -> Harness {
    Harness::new(
        Arc::new(config),
        Arc::new(cluster.clone()),
        Arc::new(cluster.logs.clone()),
    )
    .unwrap()
}

fn runner(harness: Harness, interrupts: Interrupts) -> Runner {
    Runner::new(harness, interrupts)
        .with_audit(Arc::new(BadNewsAudit::new().unwrap()))
        .with_audit(Arc::new(ShmAudit))
}

fn dummy() -> Arc<dyn Suite> {
    Registry::builtin().suite("dummy").unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_dummy_suite_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = SimulatedCluster::new(&["node-1", "node-2", "node-3"]);
    let config = config(&["node-1", "node-2", "node-3"], dir.path());
    let suite = dummy();
    let mut scenario = suite.scenario(None).unwrap().build(&config).unwrap();
    let cases = suite.select_tests(&[]).unwrap();

    let report = runner(harness(config, &cluster), Interrupts::none())
        .run(suite.name(), &mut scenario, cases)
        .await;

    assert!(report.success(), "{:#?}", report);
    assert_eq!(report.outcome("ClusterStart").unwrap().verdict, Verdict::Pass);
    assert_eq!(report.outcome("ClusterStop").unwrap().verdict, Verdict::Pass);
    let disabled = report.outcome("RecoverAfterStateLoss").unwrap();
    assert_eq!(disabled.verdict, Verdict::Skipped);
    assert!(disabled.reason.as_deref().unwrap().starts_with("known disabled"));
    assert_eq!(report.counts().passed, 2);
    assert_eq!(report.counts().skipped, 1);
    assert_eq!(scenario.state(), ScenarioState::TornDown);

    let deletes = cluster
        .mock
        .commands_for("node-1")
        .iter()
        .filter(|c| c.contains("pcs resource delete dummy"))
        .count();
    assert_eq!(deletes, 2);
    assert_eq!(
        report.outcome("ClusterStart").unwrap().assertions,
        vec!["dummy started on node-1"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_bundle_scenario_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = SimulatedCluster::new(&["node-1", "node-2"]).bundled();
    let config = config(&["node-1", "node-2"], dir.path());
    let suite = dummy();
    let mut scenario = suite.scenario(Some("BundleSetup")).unwrap().build(&config).unwrap();
    let cases = suite.select_tests(&["ClusterStart".to_string()]).unwrap();

    let report = runner(harness(config, &cluster), Interrupts::none())
        .run(suite.name(), &mut scenario, cases)
        .await;

    assert!(report.success(), "{:#?}", report);
    let cmds = cluster.mock.commands_for("node-1");
    assert!(cmds.iter().any(|c| c.contains("podman pull docker.io/tripleoqueens/")));
    assert!(cmds
        .iter()
        .any(|c| c.contains("pcs resource bundle create dummy-bundle container podman")));
    assert!(cmds.iter().any(|c| c.contains("meta bundle dummy-bundle")));
}

#[tokio::test(start_paused = true)]
async fn test_setup_error_does_not_stop_next_test() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = SimulatedCluster::new(&["node-1", "node-2"]);
    cluster.mock.exit_sequence("pcs resource create dummy", &[1, 0]);
    let config = config(&["node-1", "node-2"], dir.path());
    let suite = dummy();
    let mut scenario = suite.scenario(None).unwrap().build(&config).unwrap();
    let cases = suite.select_tests(&[]).unwrap();

    let report = runner(harness(config, &cluster), Interrupts::none())
        .run(suite.name(), &mut scenario, cases)
        .await;

    let start = report.outcome("ClusterStart").unwrap();
    assert_eq!(start.verdict, Verdict::Error);
    assert!(start.reason.as_deref().unwrap().starts_with("setup:"));
    assert_eq!(start.artifacts.len(), 1);
    assert!(start.artifacts[0].starts_with(dir.path()));
    assert_eq!(report.outcome("ClusterStop").unwrap().verdict, Verdict::Pass);
    assert!(!report.success());

    // teardown ran for the test whose setup failed
    let deletes = cluster
        .mock
        .commands_for("node-1")
        .iter()
        .filter(|c| c.contains("pcs resource delete dummy"))
        .count();
    assert_eq!(deletes, 2);
}

#[tokio::test(start_paused = true)]
async fn test_scenario_failure_errors_every_test() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = SimulatedCluster::new(&["node-1", "node-2"]);
    cluster.mock.exit_when("pcs cluster start --all", 1);
    let config = config(&["node-1", "node-2"], dir.path());
    let suite = dummy();
    let mut scenario = suite.scenario(None).unwrap().build(&config).unwrap();
    let cases = suite.select_tests(&[]).unwrap();

    let report = runner(harness(config, &cluster), Interrupts::none())
        .run(suite.name(), &mut scenario, cases)
        .await;

    assert!(report.scenario_error.as_deref().unwrap().contains("ClusterBootstrap"));
    assert_eq!(report.outcome("ClusterStart").unwrap().verdict, Verdict::Error);
    assert_eq!(report.outcome("ClusterStop").unwrap().verdict, Verdict::Error);
    assert_eq!(
        report.outcome("RecoverAfterStateLoss").unwrap().verdict,
        Verdict::Skipped
    );
    assert_eq!(scenario.state(), ScenarioState::TornDown);
    assert!(!cluster
        .mock
        .commands()
        .iter()
        .any(|(_, c)| c.contains("pcs resource create")));
}

#[tokio::test(start_paused = true)]
async fn test_abort_tears_scenario_down() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = SimulatedCluster::new(&["node-1", "node-2"]);
    cluster.stuck.store(true, Ordering::SeqCst);
    let mut config = config(&["node-1", "node-2"], dir.path());
    config.run.stonith = true;
    let suite = dummy();
    let mut scenario = suite.scenario(None).unwrap().build(&config).unwrap();
    let cases = suite.select_tests(&[]).unwrap();

    let (tx, interrupts) = Interrupts::channel();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        tx.send(Interrupt::Summary).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(Interrupt::Abort).unwrap();
    });
    let started = tokio::time::Instant::now();
    let report = runner(harness(config, &cluster), interrupts)
        .run(suite.name(), &mut scenario, cases)
        .await;

    assert!(started.elapsed() < Duration::from_secs(30));
    assert!(report.interrupted);
    assert!(!report.success());
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].name, "ClusterStart");
    assert_eq!(report.outcomes[0].verdict, Verdict::Error);
    assert!(report.outcome("ClusterStop").is_none());
    assert_eq!(scenario.state(), ScenarioState::TornDown);

    let cmds = cluster.mock.commands_for("node-1");
    let enable = cmds.iter().position(|c| c.contains("pcs resource enable dummy"));
    let delete_fence = cmds.iter().position(|c| c.contains("pcs stonith delete fence"));
    assert!(enable.unwrap() < delete_fence.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_watch_timeout_fails_the_test() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = SimulatedCluster::new(&["node-1", "node-2"]);
    cluster.stuck.store(true, Ordering::SeqCst);
    let config = config(&["node-1", "node-2"], dir.path());
    let suite = dummy();
    let mut scenario = suite.scenario(None).unwrap().build(&config).unwrap();
    let cases = suite.select_tests(&["ClusterStart".to_string()]).unwrap();

    let report = runner(harness(config, &cluster), Interrupts::none())
        .run(suite.name(), &mut scenario, cases)
        .await;

    let start = report.outcome("ClusterStart").unwrap();
    assert_eq!(start.verdict, Verdict::Fail);
    assert!(start.reason.as_deref().unwrap().contains("start of dummy on node-1 (ok)"));
}

#[tokio::test(start_paused = true)]
async fn test_unexpected_error_lines_fail_the_test() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = SimulatedCluster::new(&["node-1", "node-2"]);
    cluster.noisy.store(true, Ordering::SeqCst);
    let config = config(&["node-1", "node-2"], dir.path());
    let suite = dummy();
    let mut scenario = suite.scenario(None).unwrap().build(&config).unwrap();
    let cases = suite.select_tests(&["ClusterStart".to_string()]).unwrap();

    let report = runner(harness(config, &cluster), Interrupts::none())
        .run(suite.name(), &mut scenario, cases)
        .await;

    let start = report.outcome("ClusterStart").unwrap();
    assert_eq!(start.verdict, Verdict::Fail, "{:#?}", start);
    let reason = start.reason.as_deref().unwrap();
    assert!(reason.starts_with("audit BadNews"));
    assert!(reason.contains("node-2: pacemaker-execd[7]: error: dummy_monitor_0 failed"));
}
