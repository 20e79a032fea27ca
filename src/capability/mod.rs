//! Capabilities of the nodes under test
//!
//! The engine drives the cluster manager, the package manager and the
//! container engine through these traits only; the concrete dialect is
//! picked from the configuration once per run.

pub mod cluster;
pub mod container;
pub mod package;

use std::sync::Arc;

use crate::action::ActionRunner;
use crate::common::Result;

pub use cluster::{detect_cluster_manager, ClusterManager, Pacemaker1, Pacemaker2};
pub use container::{ContainerEngine, Docker, Podman};
pub use package::{Apt, Dnf, PackageManager, PackageMapping};

/// The capabilities a run works with
#[derive(Clone)]
pub struct Capabilities {
    pub cluster: Arc<dyn ClusterManager>,
    pub packages: Arc<dyn PackageManager>,
    pub containers: Arc<dyn ContainerEngine>,
}

impl Capabilities {
    /// Instantiate the configured dialects
    pub fn from_config(actions: &ActionRunner) -> Result<Self> {
        let config = actions.config();
        let mapping = PackageMapping::load(&config.packages)?;
        Ok(Self {
            cluster: cluster::cluster_manager(config.cluster.manager, actions.clone()).into(),
            packages: package::package_manager(config.packages.manager, actions.clone(), mapping)
                .into(),
            containers: container::container_engine(config.containers.engine, actions.clone())
                .into(),
        })
    }
}
