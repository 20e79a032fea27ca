//! Scenario components shared by every suite

use async_trait::async_trait;

use crate::common::{shell_quote, Result};
use crate::watch::templates;

use super::context::{Harness, ScenarioFacts};
use super::resource::{resource_probe_pattern, ResourceConfig};
use super::scenario::ScenarioComponent;

/// Create a fresh cluster, or reuse the running one
///
/// A fresh cluster is built from scratch and the component waits for the
/// controller to settle. When the cluster is kept, a resource left over by
/// an aborted run is removed instead. Both modes publish the resource under
/// test in the scenario facts.
pub struct ClusterBootstrap {
    resource: ResourceConfig,
    prerequisites: Vec<String>,
}

impl ClusterBootstrap {
    pub fn new(resource: ResourceConfig) -> Self {
        Self {
            resource,
            prerequisites: Vec::new(),
        }
    }

    /// Files that must exist on every node before anything is touched
    pub fn requiring(mut self, paths: &[&str]) -> Self {
        self.prerequisites = paths.iter().map(|p| p.to_string()).collect();
        self
    }

    async fn setup_new_cluster(&self, harness: &Harness) -> Result<()> {
        let actions = &harness.actions;
        let nodes = harness.nodes();

        // leftovers of a previous run; failures are expected here
        for node in nodes {
            tracing::info!(node = %node, "destroying any existing cluster");
            actions.run(node, "pcs cluster destroy").await?;
            actions.run(node, "systemctl enable pacemaker").await?;
            actions.run(node, "systemctl stop pacemaker_remote").await?;
            actions.run(node, "systemctl disable pacemaker_remote").await?;
            actions.run(node, "mkdir -p /var/log/pacemaker").await?;
        }

        harness.caps.cluster.authenticate_nodes(nodes).await?;

        let watch = actions
            .make_watch(vec![templates::cluster_starting()?, templates::cluster_idle()?])
            .await?;
        harness.caps.cluster.create_cluster(nodes).await?;
        let first = harness.config.first_node();
        // cluster setup disables the service
        actions.run_checked(first, "systemctl enable pacemaker").await?;
        actions.run_checked(first, "pcs cluster start --all").await?;
        // the fencing component enables it when asked to
        actions
            .run_checked(first, "pcs property set stonith-enabled=false")
            .await?;
        watch.await_all().await.ensure_complete()
    }

    async fn setup_kept_cluster(&self, harness: &Harness) -> Result<()> {
        let actions = &harness.actions;
        let first = harness.config.first_node();
        let name = &self.resource.name;
        tracing::info!("reusing the running cluster");

        actions
            .run_checked(first, "pcs property set stonith-enabled=false")
            .await?;

        // Re-probe before deleting: a resource deleted before pacemaker
        // knows its state is considered stopped, even if it still runs.
        if actions.run(first, &format!("pcs resource unmanage {}", name)).await? != 0 {
            return Ok(());
        }
        tracing::info!("removing resource {} left by a previous run", name);
        let probe = resource_probe_pattern(harness, &self.resource);
        let patterns = harness
            .nodes()
            .iter()
            .map(|n| templates::rsc_remote_op("probe", &probe, n, ".*"))
            .collect::<Result<Vec<_>>>()?;
        let watch = actions.make_watch(patterns).await?;
        actions
            .run(first, &format!("pcs resource cleanup {}", name))
            .await?;
        watch.await_all().await.ensure_complete()?;

        actions.run(first, &format!("pcs resource disable {}", name)).await?;
        actions.run(first, &format!("pcs resource manage {}", name)).await?;
        actions
            .run(first, &format!("pcs resource delete {} --wait", name))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ScenarioComponent for ClusterBootstrap {
    fn name(&self) -> &str {
        "ClusterBootstrap"
    }

    async fn setup_scenario(&self, harness: &Harness, _facts: &ScenarioFacts) -> Result<ScenarioFacts> {
        if !self.prerequisites.is_empty() {
            let paths: Vec<&str> = self.prerequisites.iter().map(String::as_str).collect();
            harness.actions.check_prerequisites(&paths).await?;
        }
        if harness.config.run.keep_cluster {
            self.setup_kept_cluster(harness).await?;
        } else {
            self.setup_new_cluster(harness).await?;
        }
        Ok(ScenarioFacts::with_resource(self.resource.clone()))
    }

    async fn teardown_scenario(&self, _harness: &Harness, _facts: &ScenarioFacts) -> Result<()> {
        tracing::info!("leaving cluster running on all nodes");
        Ok(())
    }
}

/// Make the container engine and the bundle image available on every node
pub struct ContainerRuntime {
    image: String,
}

impl ContainerRuntime {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
        }
    }
}

#[async_trait]
impl ScenarioComponent for ContainerRuntime {
    fn name(&self) -> &str {
        "ContainerRuntime"
    }

    async fn setup_scenario(&self, harness: &Harness, _facts: &ScenarioFacts) -> Result<ScenarioFacts> {
        let engine = &harness.caps.containers;
        let packages = &harness.caps.packages;
        let nodes = harness.nodes();
        for node in nodes {
            if !packages.is_installed(node, engine.package_name()).await? {
                tracing::info!(node = %node, "installing {}", engine.package_name());
                packages.install(node, engine.package_name()).await?;
            }
        }
        engine.enable_engine(nodes).await?;
        tracing::info!("pulling {} on all nodes", self.image);
        engine.pull_image(nodes, &self.image).await?;

        let mut facts = ScenarioFacts::default();
        facts
            .values
            .insert("container_image".to_string(), self.image.clone());
        Ok(facts)
    }

    async fn teardown_scenario(&self, _harness: &Harness, _facts: &ScenarioFacts) -> Result<()> {
        Ok(())
    }
}

/// Enable fencing for the duration of the scenario
pub struct Fencing;

impl Fencing {
    fn create_command(harness: &Harness) -> String {
        let run = &harness.config.run;
        let mut cmd = format!("pcs stonith create fence {}", shell_quote(&run.stonith_type));
        if !run.stonith_params.is_empty() {
            cmd.push(' ');
            cmd.push_str(&run.stonith_params);
        }
        cmd.push_str(" action=reboot");
        cmd.push_str(&format!(" pcmk_host_list={}", harness.nodes().join(",")));
        cmd
    }
}

#[async_trait]
impl ScenarioComponent for Fencing {
    fn name(&self) -> &str {
        "Fencing"
    }

    fn is_applicable(&self, harness: &Harness) -> bool {
        harness.config.run.stonith
    }

    async fn setup_scenario(&self, harness: &Harness, _facts: &ScenarioFacts) -> Result<ScenarioFacts> {
        let first = harness.config.first_node();
        tracing::info!("enabling fencing in cluster");
        harness
            .actions
            .run_checked(first, &Self::create_command(harness))
            .await?;
        harness
            .actions
            .run_checked(first, "pcs property set stonith-enabled=true")
            .await?;
        Ok(ScenarioFacts::default())
    }

    async fn teardown_scenario(&self, harness: &Harness, _facts: &ScenarioFacts) -> Result<()> {
        if harness.config.run.keep_resources {
            return Ok(());
        }
        let first = harness.config.first_node();
        harness
            .actions
            .run_checked(first, "pcs property set stonith-enabled=false")
            .await?;
        harness
            .actions
            .run_checked(first, "pcs stonith delete fence")
            .await
    }
}
