//! Cluster manager dialects

use async_trait::async_trait;

use crate::action::ActionRunner;
use crate::common::config::ManagerKind;
use crate::common::{shell_quote, Error, Result};

/// Drives the cluster manager CLI
#[async_trait]
pub trait ClusterManager: Send + Sync {
    /// Short identifier ("pcmk1", "pcmk2")
    fn name(&self) -> &'static str;

    /// Whether the nodes run this manager release
    async fn is_detected(&self) -> bool;

    async fn authenticate_nodes(&self, nodes: &[String]) -> Result<()>;

    async fn create_cluster(&self, nodes: &[String]) -> Result<()>;

    async fn set_node_property(&self, nodes: &[String], node: &str, name: &str, value: &str)
        -> Result<()>;

    async fn add_remote_node(&self, cluster_nodes: &[String], node: &str) -> Result<()>;

    /// Name pcs gives to the promotable clone of a resource
    fn meta_promotable_resource_name(&self, ocf_name: &str) -> String;

    /// Meta attributes making a resource promotable
    fn meta_promotable_config(&self, max_promoted: Option<usize>) -> String;
}

fn first(nodes: &[String]) -> Result<&str> {
    nodes
        .first()
        .map(String::as_str)
        .ok_or_else(|| Error::Config("cluster command needs at least one node".to_string()))
}

/// Pacemaker 1.x driven by pcs 0.9
pub struct Pacemaker1 {
    actions: ActionRunner,
}

impl Pacemaker1 {
    pub fn new(actions: ActionRunner) -> Self {
        Self { actions }
    }
}

#[async_trait]
impl ClusterManager for Pacemaker1 {
    fn name(&self) -> &'static str {
        "pcmk1"
    }

    async fn is_detected(&self) -> bool {
        let node = self.actions.config().first_node().to_string();
        matches!(
            self.actions.run(&node, "pacemakerd --version | grep -q 'Pacemaker 1\\.'").await,
            Ok(0)
        )
    }

    async fn authenticate_nodes(&self, nodes: &[String]) -> Result<()> {
        let cluster = &self.actions.config().cluster;
        self.actions
            .run_checked(
                first(nodes)?,
                &format!(
                    "pcs cluster auth -u hacluster -p {} {}",
                    shell_quote(&cluster.password),
                    nodes.join(" ")
                ),
            )
            .await
    }

    async fn create_cluster(&self, nodes: &[String]) -> Result<()> {
        let cluster = &self.actions.config().cluster;
        self.actions
            .run_checked(
                first(nodes)?,
                &format!(
                    "pcs cluster setup --force --name {} {}",
                    shell_quote(&cluster.name),
                    nodes.join(" ")
                ),
            )
            .await
    }

    async fn set_node_property(&self, nodes: &[String], node: &str, name: &str, value: &str) -> Result<()> {
        self.actions
            .run_checked(
                first(nodes)?,
                &format!("pcs property set --node {} {}={}", node, name, shell_quote(value)),
            )
            .await
    }

    async fn add_remote_node(&self, cluster_nodes: &[String], node: &str) -> Result<()> {
        self.actions
            .run_checked(
                first(cluster_nodes)?,
                &format!(
                    "pcs resource create {node} ocf:pacemaker:remote server={node} reconnect_interval=60"
                ),
            )
            .await
    }

    fn meta_promotable_resource_name(&self, ocf_name: &str) -> String {
        format!("{}-master", ocf_name)
    }

    fn meta_promotable_config(&self, max_promoted: Option<usize>) -> String {
        match max_promoted {
            Some(n) => format!("master-max={} notify=true", n),
            None => "notify=true".to_string(),
        }
    }
}

/// Pacemaker 2.x driven by pcs 0.10 and later
pub struct Pacemaker2 {
    actions: ActionRunner,
}

impl Pacemaker2 {
    pub fn new(actions: ActionRunner) -> Self {
        Self { actions }
    }
}

#[async_trait]
impl ClusterManager for Pacemaker2 {
    fn name(&self) -> &'static str {
        "pcmk2"
    }

    async fn is_detected(&self) -> bool {
        let node = self.actions.config().first_node().to_string();
        matches!(
            self.actions.run(&node, "pacemakerd --version | grep -q 'Pacemaker 2\\.'").await,
            Ok(0)
        )
    }

    async fn authenticate_nodes(&self, nodes: &[String]) -> Result<()> {
        let password = shell_quote(&self.actions.config().cluster.password);
        for node in nodes {
            self.actions
                .run_checked(node, &format!("pcs host auth {} -u hacluster -p {}", node, password))
                .await?;
        }
        Ok(())
    }

    async fn create_cluster(&self, nodes: &[String]) -> Result<()> {
        let cluster = &self.actions.config().cluster;
        self.actions
            .run_checked(
                first(nodes)?,
                &format!(
                    "pcs cluster setup {} --force {}",
                    shell_quote(&cluster.name),
                    nodes.join(" ")
                ),
            )
            .await
    }

    async fn set_node_property(&self, nodes: &[String], node: &str, name: &str, value: &str) -> Result<()> {
        self.actions
            .run_checked(
                first(nodes)?,
                &format!("pcs node attribute {} {}={}", node, name, shell_quote(value)),
            )
            .await
    }

    async fn add_remote_node(&self, cluster_nodes: &[String], node: &str) -> Result<()> {
        self.actions
            .run_checked(
                first(cluster_nodes)?,
                &format!("pcs cluster node add-remote {node} {node} reconnect_interval=60"),
            )
            .await
    }

    fn meta_promotable_resource_name(&self, ocf_name: &str) -> String {
        format!("{}-clone", ocf_name)
    }

    fn meta_promotable_config(&self, max_promoted: Option<usize>) -> String {
        match max_promoted {
            Some(n) => format!("promotable promoted-max={} notify=true", n),
            None => "promotable notify=true".to_string(),
        }
    }
}

/// Build the configured cluster manager
pub fn cluster_manager(kind: ManagerKind, actions: ActionRunner) -> Box<dyn ClusterManager> {
    match kind {
        ManagerKind::Pcmk1 => Box::new(Pacemaker1::new(actions)),
        ManagerKind::Pcmk2 => Box::new(Pacemaker2::new(actions)),
    }
}

/// Probe the nodes for a known manager release, newest first
pub async fn detect_cluster_manager(actions: &ActionRunner) -> Result<ManagerKind> {
    for kind in [ManagerKind::Pcmk2, ManagerKind::Pcmk1] {
        if cluster_manager(kind, actions.clone()).is_detected().await {
            return Ok(kind);
        }
    }
    Err(Error::Config(
        "could not detect the cluster manager release on the first node".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::context::fixture;

    #[tokio::test]
    async fn test_pcmk2_authenticates_every_node() {
        let (mock, _, actions) = fixture(&["node-1", "node-2"]);
        let cm = cluster_manager(ManagerKind::Pcmk2, actions.clone());
        cm.authenticate_nodes(actions.nodes()).await.unwrap();

        assert!(mock.commands_for("node-1")[0].contains("pcs host auth node-1 -u hacluster -p ratester"));
        assert!(mock.commands_for("node-2")[0].contains("pcs host auth node-2 -u hacluster -p ratester"));
    }

    #[tokio::test]
    async fn test_pcmk1_authenticates_from_first_node() {
        let (mock, _, actions) = fixture(&["node-1", "node-2"]);
        let cm = cluster_manager(ManagerKind::Pcmk1, actions.clone());
        cm.authenticate_nodes(actions.nodes()).await.unwrap();
        cm.create_cluster(actions.nodes()).await.unwrap();

        let cmds = mock.commands_for("node-1");
        assert!(cmds[0].contains("pcs cluster auth -u hacluster -p ratester node-1 node-2"));
        assert!(cmds
            .iter()
            .any(|c| c.contains("pcs cluster setup --force --name ratester node-1 node-2")));
        assert!(mock.commands_for("node-2").is_empty());
    }

    #[tokio::test]
    async fn test_detect_prefers_newest() {
        let (mock, _, actions) = fixture(&["node-1"]);
        mock.exit_when("Pacemaker 2", 1);
        assert_eq!(detect_cluster_manager(&actions).await.unwrap(), ManagerKind::Pcmk1);

        mock.exit_when("Pacemaker 1", 1);
        assert!(detect_cluster_manager(&actions).await.is_err());
    }

    #[test]
    fn test_promotable_naming() {
        let (_, _, actions) = fixture(&["node-1"]);
        let pcmk1 = Pacemaker1::new(actions.clone());
        let pcmk2 = Pacemaker2::new(actions);
        assert_eq!(pcmk1.meta_promotable_resource_name("redis"), "redis-master");
        assert_eq!(pcmk2.meta_promotable_resource_name("redis"), "redis-clone");
        assert_eq!(
            pcmk2.meta_promotable_config(Some(1)),
            "promotable promoted-max=1 notify=true"
        );
    }

    #[tokio::test]
    async fn test_node_property_dialects() {
        let (mock, _, actions) = fixture(&["node-1", "node-2"]);
        let pcmk1 = cluster_manager(ManagerKind::Pcmk1, actions.clone());
        let pcmk2 = cluster_manager(ManagerKind::Pcmk2, actions.clone());
        pcmk1
            .set_node_property(actions.nodes(), "node-2", "galera-role", "arbitrator")
            .await
            .unwrap();
        pcmk2
            .set_node_property(actions.nodes(), "node-2", "galera-role", "two words")
            .await
            .unwrap();

        let cmds = mock.commands_for("node-1");
        assert!(cmds
            .iter()
            .any(|c| c.contains("pcs property set --node node-2 galera-role=arbitrator")));
        assert!(cmds
            .iter()
            .any(|c| c.contains("pcs node attribute node-2 galera-role='two words'")));
        assert!(mock.commands_for("node-2").is_empty());
    }

    #[tokio::test]
    async fn test_add_remote_node_dialects() {
        let (mock, _, actions) = fixture(&["node-1", "node-2"]);
        cluster_manager(ManagerKind::Pcmk1, actions.clone())
            .add_remote_node(actions.nodes(), "remote-1")
            .await
            .unwrap();
        cluster_manager(ManagerKind::Pcmk2, actions.clone())
            .add_remote_node(actions.nodes(), "remote-2")
            .await
            .unwrap();

        let cmds = mock.commands_for("node-1");
        assert!(cmds.iter().any(|c| c.contains(
            "pcs resource create remote-1 ocf:pacemaker:remote server=remote-1 reconnect_interval=60"
        )));
        assert!(cmds
            .iter()
            .any(|c| c.contains("pcs cluster node add-remote remote-2 remote-2 reconnect_interval=60")));
    }

    #[tokio::test]
    async fn test_add_remote_node_failure_is_reported() {
        let (mock, _, actions) = fixture(&["node-1"]);
        mock.exit_when("add-remote", 1);
        let err = cluster_manager(ManagerKind::Pcmk2, actions.clone())
            .add_remote_node(actions.nodes(), "remote-1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CommandFailed { code: 1, .. }));
        assert!(cluster_manager(ManagerKind::Pcmk2, actions)
            .add_remote_node(&[], "remote-1")
            .await
            .is_err());
    }
}
