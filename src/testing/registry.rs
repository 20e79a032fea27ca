//! Suite registry
//!
//! A suite bundles the scenarios a resource type can be tested under with
//! the tests written for it.

use std::sync::Arc;

use crate::common::{Config, Error, Result};

use super::case::{TestBody, TestCase, TestStatus};
use super::scenario::{Scenario, ScenarioComponent};

/// Builds the components of a scenario from the configuration
pub type ComponentsBuilder = fn(&Config) -> Result<Vec<Arc<dyn ScenarioComponent>>>;

/// A named scenario of a suite
#[derive(Clone)]
pub struct ScenarioDef {
    pub name: &'static str,
    pub description: &'static str,
    build: ComponentsBuilder,
}

impl ScenarioDef {
    pub fn new(name: &'static str, description: &'static str, build: ComponentsBuilder) -> Self {
        Self {
            name,
            description,
            build,
        }
    }

    pub fn build(&self, config: &Config) -> Result<Scenario> {
        Ok(Scenario::new(self.name, (self.build)(config)?))
    }
}

/// A registered test with its status
#[derive(Clone)]
pub struct TestEntry {
    pub body: Arc<dyn TestBody>,
    pub status: TestStatus,
}

impl TestEntry {
    pub fn enabled(body: impl TestBody + 'static) -> Self {
        Self {
            body: Arc::new(body),
            status: TestStatus::Enabled,
        }
    }

    pub fn known_disabled(body: impl TestBody + 'static, reason: &'static str) -> Self {
        Self {
            body: Arc::new(body),
            status: TestStatus::KnownDisabled { reason },
        }
    }

    pub fn name(&self) -> &str {
        self.body.name()
    }

    pub fn to_case(&self) -> TestCase {
        TestCase::new(self.body.clone(), self.status.clone())
    }
}

/// Tests of one resource type
pub trait Suite: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Scenarios, the first one being the default
    fn scenarios(&self) -> Vec<ScenarioDef>;

    /// Tests, in run order
    fn tests(&self) -> Vec<TestEntry>;

    fn scenario(&self, name: Option<&str>) -> Result<ScenarioDef> {
        let scenarios = self.scenarios();
        match name {
            Some(name) => scenarios
                .into_iter()
                .find(|s| s.name.eq_ignore_ascii_case(name))
                .ok_or_else(|| Error::unknown("scenario", name)),
            None => scenarios
                .into_iter()
                .next()
                .ok_or_else(|| Error::Internal(format!("suite {} has no scenario", self.name()))),
        }
    }

    /// Test cases selected by name, all of them when `names` is empty
    ///
    /// Selected tests keep the suite order.
    fn select_tests(&self, names: &[String]) -> Result<Vec<TestCase>> {
        let tests = self.tests();
        if let Some(missing) = names
            .iter()
            .find(|n| !tests.iter().any(|t| t.name().eq_ignore_ascii_case(n)))
        {
            return Err(Error::unknown("test", missing));
        }
        Ok(tests
            .iter()
            .filter(|t| names.is_empty() || names.iter().any(|n| t.name().eq_ignore_ascii_case(n)))
            .map(TestEntry::to_case)
            .collect())
    }
}

/// All suites known to the tester
pub struct Registry {
    suites: Vec<Arc<dyn Suite>>,
}

impl Registry {
    pub fn empty() -> Self {
        Self { suites: Vec::new() }
    }

    /// Registry with the suites shipped with the tester
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(crate::suites::dummy::DummySuite));
        registry
    }

    pub fn register(&mut self, suite: Arc<dyn Suite>) {
        self.suites.push(suite);
    }

    pub fn suites(&self) -> &[Arc<dyn Suite>] {
        &self.suites
    }

    pub fn suite(&self, name: &str) -> Result<Arc<dyn Suite>> {
        self.suites
            .iter()
            .find(|s| s.name() == name)
            .cloned()
            .ok_or_else(|| Error::unknown("suite", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_has_dummy() {
        let registry = Registry::builtin();
        assert!(registry.suite("dummy").is_ok());
        assert!(matches!(
            registry.suite("galera").err(),
            Some(Error::Unknown { kind: "suite", .. })
        ));
    }

    #[test]
    fn test_default_scenario_is_first() {
        let suite = Registry::builtin().suite("dummy").unwrap();
        assert_eq!(suite.scenario(None).unwrap().name, "SimpleSetup");
        assert_eq!(suite.scenario(Some("bundlesetup")).unwrap().name, "BundleSetup");
        assert!(suite.scenario(Some("GaleraSetup")).is_err());
    }

    #[test]
    fn test_select_tests_keeps_suite_order() {
        let suite = Registry::builtin().suite("dummy").unwrap();
        let all = suite.select_tests(&[]).unwrap();
        assert_eq!(all.len(), suite.tests().len());

        let names: Vec<String> = suite.tests().iter().rev().map(|t| t.name().to_string()).collect();
        let picked = suite.select_tests(&names).unwrap();
        let picked: Vec<&str> = picked.iter().map(|c| c.name()).collect();
        let expected: Vec<String> = suite.tests().iter().map(|t| t.name().to_string()).collect();
        assert_eq!(picked, expected);
    }

    #[test]
    fn test_select_unknown_test_fails() {
        let suite = Registry::builtin().suite("dummy").unwrap();
        let err = suite.select_tests(&["NoSuchTest".to_string()]).err().unwrap();
        assert!(err.to_string().contains("NoSuchTest"));
    }
}
