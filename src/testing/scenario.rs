//! Cluster-wide scenario setup and teardown

use std::sync::Arc;

use async_trait::async_trait;

use crate::common::{catch_panic, Error, Result};

use super::context::{Harness, ScenarioFacts};

/// One step of cluster-wide preparation
#[async_trait]
pub trait ScenarioComponent: Send + Sync {
    fn name(&self) -> &str;

    fn is_applicable(&self, _harness: &Harness) -> bool {
        true
    }

    /// Prepare the cluster; returns the facts this component established
    async fn setup_scenario(&self, harness: &Harness, facts: &ScenarioFacts) -> Result<ScenarioFacts>;

    async fn teardown_scenario(&self, harness: &Harness, facts: &ScenarioFacts) -> Result<()>;
}

/// Lifecycle state of a scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioState {
    NotStarted,
    SetUp,
    TornDown,
}

/// An ordered list of components set up before the tests and torn down,
/// in reverse order, after them
pub struct Scenario {
    name: String,
    components: Vec<Arc<dyn ScenarioComponent>>,
    state: ScenarioState,
    /// Components whose setup completed, in setup order
    set_up: Vec<Arc<dyn ScenarioComponent>>,
    facts: ScenarioFacts,
}

impl Scenario {
    pub fn new(name: impl Into<String>, components: Vec<Arc<dyn ScenarioComponent>>) -> Self {
        Self {
            name: name.into(),
            components,
            state: ScenarioState::NotStarted,
            set_up: Vec::new(),
            facts: ScenarioFacts::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ScenarioState {
        self.state
    }

    pub fn facts(&self) -> &ScenarioFacts {
        &self.facts
    }

    /// Set up every applicable component in order
    ///
    /// Stops at the first failing component. Components already set up, or
    /// whose setup was started, stay recorded so that [`Scenario::teardown`]
    /// releases them.
    pub async fn setup(&mut self, harness: &Harness) -> Result<()> {
        if self.state != ScenarioState::NotStarted {
            return Err(Error::Internal(format!(
                "scenario {} was already set up",
                self.name
            )));
        }
        for component in self.components.clone() {
            if !component.is_applicable(harness) {
                tracing::debug!(component = component.name(), "not applicable");
                continue;
            }
            tracing::info!(component = component.name(), "setting up");
            // recorded first: a half-configured or interrupted component
            // still needs its teardown
            self.set_up.push(component.clone());
            match catch_panic(component.setup_scenario(harness, &self.facts)).await {
                Ok(facts) => self.facts.merge(facts),
                Err(e) => {
                    return Err(Error::Scenario {
                        component: component.name().to_string(),
                        phase: "setup",
                        reason: e.to_string(),
                    });
                }
            }
        }
        self.state = ScenarioState::SetUp;
        Ok(())
    }

    /// Tear down whatever was set up, in reverse order
    ///
    /// Runs at most once; later calls do nothing. Every component is torn
    /// down even when an earlier one fails; the failures are returned.
    pub async fn teardown(&mut self, harness: &Harness) -> Vec<Error> {
        if self.state == ScenarioState::TornDown {
            return Vec::new();
        }
        self.state = ScenarioState::TornDown;

        let mut failures = Vec::new();
        while let Some(component) = self.set_up.pop() {
            tracing::info!(component = component.name(), "tearing down");
            if let Err(e) = catch_panic(component.teardown_scenario(harness, &self.facts)).await {
                tracing::error!(component = component.name(), "teardown failed: {}", e);
                failures.push(Error::Scenario {
                    component: component.name().to_string(),
                    phase: "teardown",
                    reason: e.to_string(),
                });
            }
        }
        failures
    }
}
