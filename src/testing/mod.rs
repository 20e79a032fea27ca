//! Test orchestration engine
//!
//! Scenarios prepare the cluster once, test cases run one at a time on top
//! of it, and audits check the cluster after every test. Failures are
//! turned into outcomes at the test boundary so a run always completes and
//! always releases the cluster.

pub mod audit;
pub mod case;
pub mod components;
pub mod context;
pub mod registry;
pub mod report;
pub mod resource;
pub mod runner;
pub mod scenario;

pub use audit::{Audit, AuditReport, BadNewsAudit, ShmAudit};
pub use case::{CaseState, TestBody, TestCase, TestOutcome, TestStatus, Verdict};
pub use components::{ClusterBootstrap, ContainerRuntime, Fencing};
pub use context::{Harness, ScenarioFacts, TestContext};
pub use registry::{Registry, ScenarioDef, Suite, TestEntry};
pub use report::{Counts, RunReport};
pub use resource::{BundleSpec, ResourceConfig};
pub use runner::{Interrupt, Interrupts, Runner};
pub use scenario::{Scenario, ScenarioComponent, ScenarioState};
