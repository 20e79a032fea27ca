//! Explicit run context handed to scenarios, tests and audits

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::action::ActionRunner;
use crate::capability::Capabilities;
use crate::common::config::Config;
use crate::common::Result;
use crate::remote::{LogSource, RemoteExecutor};
use crate::watch::LogTailWatch;

use super::resource::ResourceConfig;

/// Everything a run talks to, built once from the configuration
#[derive(Clone)]
pub struct Harness {
    pub config: Arc<Config>,
    pub actions: ActionRunner,
    pub caps: Capabilities,
    pub logs: Arc<dyn LogSource>,
}

impl Harness {
    /// Wire the harness on top of a transport and a log source
    pub fn new(
        config: Arc<Config>,
        executor: Arc<dyn RemoteExecutor>,
        logs: Arc<dyn LogSource>,
    ) -> Result<Self> {
        let watches = LogTailWatch::from_timeouts(logs.clone(), &config.timeouts);
        let actions = ActionRunner::new(executor, watches, config.clone());
        let caps = Capabilities::from_config(&actions)?;
        Ok(Self {
            config,
            actions,
            caps,
            logs,
        })
    }

    pub fn nodes(&self) -> &[String] {
        &self.config.cluster.nodes
    }
}

/// Values established by scenario setup
///
/// Components return the facts they establish; the scenario merges them in
/// component order, later values winning.
#[derive(Debug, Clone, Default)]
pub struct ScenarioFacts {
    /// Resource the tests of the scenario operate on
    pub resource: Option<ResourceConfig>,
    /// Other discovered values (node addresses, arbitrator host...)
    pub values: BTreeMap<String, String>,
}

impl ScenarioFacts {
    pub fn with_resource(resource: ResourceConfig) -> Self {
        Self {
            resource: Some(resource),
            ..Default::default()
        }
    }

    pub fn merge(&mut self, other: ScenarioFacts) {
        if other.resource.is_some() {
            self.resource = other.resource;
        }
        self.values.extend(other.values);
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

/// Context of a single test case
#[derive(Clone)]
pub struct TestContext {
    pub harness: Harness,
    pub facts: Arc<ScenarioFacts>,
    notes: Arc<Mutex<Vec<String>>>,
}

impl TestContext {
    pub fn new(harness: Harness, facts: Arc<ScenarioFacts>) -> Self {
        Self {
            harness,
            facts,
            notes: Arc::default(),
        }
    }

    /// Fresh context sharing the harness and facts, with an empty assertion log
    pub fn for_next_test(&self) -> Self {
        Self::new(self.harness.clone(), self.facts.clone())
    }

    pub fn actions(&self) -> &ActionRunner {
        &self.harness.actions
    }

    pub fn config(&self) -> &Config {
        &self.harness.config
    }

    pub fn nodes(&self) -> &[String] {
        self.harness.nodes()
    }

    /// Resource set up by the scenario
    pub fn resource(&self) -> Result<&ResourceConfig> {
        self.facts.resource.as_ref().ok_or_else(|| {
            crate::common::Error::ResourceConfig(
                "the scenario did not define a resource under test".to_string(),
            )
        })
    }

    /// Append to the assertion log of the current test
    pub fn note(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!("{}", message);
        if let Ok(mut notes) = self.notes.lock() {
            notes.push(message);
        }
    }

    pub(crate) fn take_notes(&self) -> Vec<String> {
        self.notes
            .lock()
            .map(|mut n| std::mem::take(&mut *n))
            .unwrap_or_default()
    }
}

/// Mocked harness pieces for unit tests
#[cfg(test)]
pub(crate) fn fixture(
    nodes: &[&str],
) -> (
    crate::remote::mock::MockExecutor,
    crate::remote::mock::MemoryLogSource,
    ActionRunner,
) {
    let (mock, logs, harness) = harness_fixture(nodes);
    (mock, logs, harness.actions)
}

#[cfg(test)]
pub(crate) fn harness_fixture(
    nodes: &[&str],
) -> (
    crate::remote::mock::MockExecutor,
    crate::remote::mock::MemoryLogSource,
    Harness,
) {
    use crate::remote::mock::{MemoryLogSource, MockExecutor};

    let mut config = Config::default();
    config.cluster.nodes = nodes.iter().map(|n| n.to_string()).collect();
    config.cluster.attribute_absent_exit_code = Some(105);
    config.timeouts.dead_time_secs = 30;
    let mock = MockExecutor::new();
    let logs = MemoryLogSource::new();
    let harness = Harness::new(Arc::new(config), Arc::new(mock.clone()), Arc::new(logs.clone()))
        .unwrap_or_else(|e| panic!("fixture harness: {}", e));
    (mock, logs, harness)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_facts_merge_later_wins() {
        let mut facts = ScenarioFacts::default();
        facts.values.insert("arbitrator".into(), "node-3".into());
        let dummy = ResourceConfig::new("dummy", "dummy", "pcs resource create dummy ocf:pacemaker:Dummy")
            .unwrap();
        let mut later = ScenarioFacts::with_resource(dummy);
        later.values.insert("arbitrator".into(), "node-4".into());
        facts.merge(later);

        assert_eq!(facts.value("arbitrator"), Some("node-4"));
        assert_eq!(facts.resource.as_ref().map(|r| r.name.as_str()), Some("dummy"));

        facts.merge(ScenarioFacts::default());
        assert!(facts.resource.is_some());
    }

    #[test]
    fn test_notes_are_per_test() {
        let (_, _, harness) = harness_fixture(&["node-1"]);
        let ctx = TestContext::new(harness, Arc::default());
        ctx.note("probe seen on node-1");
        let next = ctx.for_next_test();
        next.note("other");
        assert_eq!(ctx.take_notes(), vec!["probe seen on node-1"]);
        assert!(ctx.take_notes().is_empty());
        assert_eq!(next.take_notes(), vec!["other"]);
    }
}
