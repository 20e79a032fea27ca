//! Container engines hosting bundle resources

use async_trait::async_trait;

use crate::action::ActionRunner;
use crate::common::config::EngineKind;
use crate::common::{shell_quote, Result};

/// Container engine available on the cluster nodes
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Package providing the engine; also the engine name pacemaker uses
    /// in bundle replica names
    fn package_name(&self) -> &'static str;

    async fn is_detected(&self) -> bool;

    /// Start the engine daemon where there is one
    async fn enable_engine(&self, nodes: &[String]) -> Result<()>;

    async fn pull_image(&self, nodes: &[String], image: &str) -> Result<()>;

    /// Log noise of the engine that audits must not report
    fn errors_to_ignore(&self) -> Vec<String> {
        Vec::new()
    }
}

pub struct Docker {
    actions: ActionRunner,
}

impl Docker {
    pub fn new(actions: ActionRunner) -> Self {
        Self { actions }
    }
}

#[async_trait]
impl ContainerEngine for Docker {
    fn package_name(&self) -> &'static str {
        "docker"
    }

    async fn is_detected(&self) -> bool {
        let node = self.actions.config().first_node().to_string();
        matches!(self.actions.run(&node, "docker --version").await, Ok(0))
    }

    async fn enable_engine(&self, nodes: &[String]) -> Result<()> {
        for node in nodes {
            self.actions
                .run_checked(node, "systemctl enable docker --now")
                .await?;
        }
        Ok(())
    }

    async fn pull_image(&self, nodes: &[String], image: &str) -> Result<()> {
        for node in nodes {
            self.actions
                .run_checked(node, &format!("docker pull {}", shell_quote(image)))
                .await?;
        }
        Ok(())
    }

    fn errors_to_ignore(&self) -> Vec<String> {
        [
            // pulling from an insecure registry logs a warning
            r"docker.*Attempting next endpoint for pull after error",
            r"dockerd-current.*:\s*This node is not a swarm manager",
            r"dockerd-current.*:\s*No such container",
            r"dockerd-current.*:\s*No such image",
            r"dockerd-current.*Handler for GET.*/.*returned error: (network|plugin).*not found",
            r"dockerd-current.*Handler for GET.*/.*returned error: get.*no such volume",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }
}

pub struct Podman {
    actions: ActionRunner,
}

impl Podman {
    pub fn new(actions: ActionRunner) -> Self {
        Self { actions }
    }
}

#[async_trait]
impl ContainerEngine for Podman {
    fn package_name(&self) -> &'static str {
        "podman"
    }

    async fn is_detected(&self) -> bool {
        let node = self.actions.config().first_node().to_string();
        matches!(self.actions.run(&node, "podman --version").await, Ok(0))
    }

    async fn enable_engine(&self, _nodes: &[String]) -> Result<()> {
        // daemonless
        Ok(())
    }

    async fn pull_image(&self, nodes: &[String], image: &str) -> Result<()> {
        for node in nodes {
            self.actions
                .run_checked(node, &format!("podman pull {}", shell_quote(image)))
                .await?;
        }
        Ok(())
    }
}

/// Build the configured container engine
pub fn container_engine(kind: EngineKind, actions: ActionRunner) -> Box<dyn ContainerEngine> {
    match kind {
        EngineKind::Docker => Box::new(Docker::new(actions)),
        EngineKind::Podman => Box::new(Podman::new(actions)),
    }
}
