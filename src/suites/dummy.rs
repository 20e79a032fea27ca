//! Tests of the ocf:pacemaker:Dummy agent
//!
//! The Dummy agent keeps no real service, which makes this suite a cheap
//! check that a cluster and the tester itself work.

use std::sync::Arc;

use async_trait::async_trait;

use crate::check;
use crate::common::{Config, Result};
use crate::testing::resource::{
    default_errors_to_ignore, delete_resource, probe_patterns, resource_target_nodes,
    setup_inactive_resource,
};
use crate::testing::{
    BundleSpec, ClusterBootstrap, ContainerRuntime, Fencing, ResourceConfig, ScenarioComponent,
    ScenarioDef, Suite, TestBody, TestContext, TestEntry,
};
use crate::watch::templates;

const DEFAULT_IMAGE: &str = "docker.io/tripleoqueens/centos-binary-rabbitmq:current-tripleo-rdo";
const CREATE_DUMMY: &str = "pcs resource create dummy ocf:pacemaker:Dummy";

pub struct DummySuite;

impl Suite for DummySuite {
    fn name(&self) -> &'static str {
        "dummy"
    }

    fn description(&self) -> &'static str {
        "ocf:pacemaker:Dummy, plain and bundled"
    }

    fn scenarios(&self) -> Vec<ScenarioDef> {
        vec![
            ScenarioDef::new("SimpleSetup", "dummy resource on the cluster nodes", simple_setup),
            ScenarioDef::new("BundleSetup", "dummy resource inside a container bundle", bundle_setup),
        ]
    }

    fn tests(&self) -> Vec<TestEntry> {
        vec![
            TestEntry::enabled(ClusterStart),
            TestEntry::enabled(ClusterStop),
            TestEntry::known_disabled(
                RecoverAfterStateLoss,
                "recovery depends on the monitor interval and does not show up reliably",
            ),
        ]
    }
}

fn simple_setup(_config: &Config) -> Result<Vec<Arc<dyn ScenarioComponent>>> {
    let resource = ResourceConfig::new("dummy", "dummy", CREATE_DUMMY)?;
    Ok(vec![
        Arc::new(ClusterBootstrap::new(resource)),
        Arc::new(Fencing),
    ])
}

fn bundle_setup(config: &Config) -> Result<Vec<Arc<dyn ScenarioComponent>>> {
    let image = config
        .containers
        .image
        .clone()
        .unwrap_or_else(|| DEFAULT_IMAGE.to_string());
    let resource = ResourceConfig::new("dummy-bundle", "dummy", CREATE_DUMMY)?
        .with_bundle(BundleSpec::new(image.clone())?);
    Ok(vec![
        Arc::new(ContainerRuntime::new(image)),
        Arc::new(ClusterBootstrap::new(resource)),
        Arc::new(Fencing),
    ])
}

/// Refresh the stopped resource, enable it, and return where it started
async fn start_resource(ctx: &TestContext, target: &str) -> Result<String> {
    let resource = ctx.resource()?;
    let actions = ctx.actions();

    // make sure pacemaker knows the resource is stopped before enabling it
    let watch = actions
        .make_watch(probe_patterns(&ctx.harness, resource, "not running")?)
        .await?;
    actions
        .run_checked(target, &format!("pcs resource refresh {}", resource.name))
        .await?;
    watch.await_all().await.ensure_complete()?;

    let nodes = resource_target_nodes(resource, ctx.nodes());
    let patterns = nodes
        .iter()
        .map(|n| templates::rsc_remote_op("start", &resource.ocf_name, n, "ok"))
        .collect::<Result<Vec<_>>>()?;
    let watch = actions.make_watch(patterns).await?;
    actions
        .run_checked(target, &format!("pcs resource enable {}", resource.name))
        .await?;
    let resolution = watch.await_any().await;
    resolution.ensure_complete()?;

    let started = resolution
        .matched
        .first()
        .and_then(|m| nodes.get(m.pattern))
        .cloned()
        .unwrap_or_default();
    ctx.note(format!("{} started on {}", resource.name, started));
    Ok(started)
}

async fn setup_dummy(ctx: &TestContext) -> Result<()> {
    setup_inactive_resource(ctx, ctx.resource()?).await
}

async fn teardown_dummy(ctx: &TestContext) -> Result<()> {
    delete_resource(ctx, ctx.resource()?).await
}

/// Start a dummy resource
pub struct ClusterStart;

#[async_trait]
impl TestBody for ClusterStart {
    fn name(&self) -> &str {
        "ClusterStart"
    }

    fn description(&self) -> &str {
        "Start a dummy resource"
    }

    async fn setup_test(&self, ctx: &TestContext, _node: &str) -> Result<()> {
        setup_dummy(ctx).await
    }

    async fn test(&self, ctx: &TestContext, target: &str) -> Result<()> {
        let started = start_resource(ctx, target).await?;
        check!(!started.is_empty(), "no node reported the start");
        Ok(())
    }

    async fn teardown_test(&self, ctx: &TestContext, _node: &str) -> Result<()> {
        teardown_dummy(ctx).await
    }

    fn errors_to_ignore(&self, ctx: &TestContext) -> Vec<String> {
        default_errors_to_ignore(&ctx.harness)
    }
}

/// Stop a running dummy resource
pub struct ClusterStop;

#[async_trait]
impl TestBody for ClusterStop {
    fn name(&self) -> &str {
        "ClusterStop"
    }

    fn description(&self) -> &str {
        "Stop a running dummy resource"
    }

    async fn setup_test(&self, ctx: &TestContext, _node: &str) -> Result<()> {
        setup_dummy(ctx).await
    }

    async fn test(&self, ctx: &TestContext, target: &str) -> Result<()> {
        let started = start_resource(ctx, target).await?;
        let resource = ctx.resource()?;

        let watch = ctx
            .actions()
            .make_watch(vec![
                templates::init_remote_op("stop", &resource.ocf_name, &started)?,
                templates::rsc_remote_op("stop", &resource.ocf_name, &started, "ok")?,
            ])
            .await?;
        ctx.actions()
            .run_checked(target, &format!("pcs resource disable {}", resource.name))
            .await?;
        watch.await_all().await.ensure_complete()
    }

    async fn teardown_test(&self, ctx: &TestContext, _node: &str) -> Result<()> {
        teardown_dummy(ctx).await
    }

    fn errors_to_ignore(&self, ctx: &TestContext) -> Vec<String> {
        default_errors_to_ignore(&ctx.harness)
    }
}

/// Remove the agent state behind pacemaker's back and expect a restart
pub struct RecoverAfterStateLoss;

#[async_trait]
impl TestBody for RecoverAfterStateLoss {
    fn name(&self) -> &str {
        "RecoverAfterStateLoss"
    }

    fn description(&self) -> &str {
        "Restart the dummy resource after its state file vanished"
    }

    async fn setup_test(&self, ctx: &TestContext, _node: &str) -> Result<()> {
        setup_dummy(ctx).await
    }

    async fn test(&self, ctx: &TestContext, target: &str) -> Result<()> {
        let started = start_resource(ctx, target).await?;
        let resource = ctx.resource()?;

        let watch = ctx
            .actions()
            .make_watch(vec![
                templates::rsc_remote_op("monitor", &resource.ocf_name, &started, "not running")?,
                templates::rsc_remote_op("start", &resource.ocf_name, &started, "ok")?,
            ])
            .await?;
        ctx.actions()
            .run_checked(
                &started,
                &format!("rm -f /var/run/resource-agents/Dummy-{}.state", resource.ocf_name),
            )
            .await?;
        watch.await_all().await.ensure_complete()
    }

    async fn teardown_test(&self, ctx: &TestContext, _node: &str) -> Result<()> {
        teardown_dummy(ctx).await
    }

    fn errors_to_ignore(&self, ctx: &TestContext) -> Vec<String> {
        let mut ignore = default_errors_to_ignore(&ctx.harness);
        ignore.push(r"error: Result of monitor operation for dummy".to_string());
        ignore
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::context::harness_fixture;
    use crate::testing::{ScenarioFacts, Suite};
    use std::time::Duration;

    fn probe(node: &str) -> String {
        format!(
            "pacemaker-controld[11]: notice: Result of probe operation for dummy on {}: 7 (not running)",
            node
        )
    }

    fn dummy_ctx(harness: crate::testing::Harness) -> TestContext {
        let resource = ResourceConfig::new("dummy", "dummy", CREATE_DUMMY).unwrap();
        TestContext::new(harness, Arc::new(ScenarioFacts::with_resource(resource)))
    }

    #[test]
    fn test_bundle_scenario_uses_configured_image() {
        let mut config = Config::default();
        config.containers.image = Some("quay.io/x/dummy:latest".into());
        let scenario = DummySuite.scenario(Some("BundleSetup")).unwrap();
        assert_eq!(scenario.build(&config).unwrap().name(), "BundleSetup");
        assert_eq!(bundle_setup(&config).unwrap().len(), 3);
        assert_eq!(simple_setup(&config).unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cluster_start_reports_start_node() {
        let (mock, logs, harness) = harness_fixture(&["node-1", "node-2"]);
        let ctx = dummy_ctx(harness);
        logs.schedule_line("node-1", Duration::from_secs(2), &probe("node-1"));
        logs.schedule_line("node-1", Duration::from_secs(2), &probe("node-2"));
        logs.schedule_line(
            "node-2",
            Duration::from_secs(10),
            "pacemaker-controld[11]: notice: Result of start operation for dummy on node-2: 0 (ok)",
        );

        ClusterStart.test(&ctx, "node-1").await.unwrap();
        assert_eq!(ctx.take_notes(), vec!["dummy started on node-2"]);
        let cmds = mock.commands_for("node-1");
        let refresh = cmds.iter().position(|c| c.contains("pcs resource refresh dummy"));
        let enable = cmds.iter().position(|c| c.contains("pcs resource enable dummy"));
        assert!(refresh.unwrap() < enable.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cluster_start_fails_without_start() {
        let (_, logs, harness) = harness_fixture(&["node-1"]);
        let ctx = dummy_ctx(harness);
        logs.schedule_line("node-1", Duration::from_secs(2), &probe("node-1"));

        let err = ClusterStart.test(&ctx, "node-1").await.unwrap_err();
        assert!(err.is_assertion());
        assert!(err.to_string().contains("start of dummy on node-1"));
    }

    #[test]
    fn test_recovery_test_is_known_disabled() {
        let tests = DummySuite.tests();
        let disabled: Vec<&str> = tests
            .iter()
            .filter(|t| t.status != crate::testing::TestStatus::Enabled)
            .map(|t| t.name())
            .collect();
        assert_eq!(disabled, vec!["RecoverAfterStateLoss"]);
    }
}
