//! Package managers and distribution package names

use std::collections::HashMap;

use async_trait::async_trait;

use crate::action::ActionRunner;
use crate::common::config::{PackageConfig, PackageManagerKind};
use crate::common::{shell_quote, Error, Result};

/// Maps generic package names to distribution package names
///
/// The mapping file is a YAML document of tables keyed by namespace. The
/// `<format>-<flavor>` table is looked up first, then `<format>`; a name
/// absent from both is used as is.
///
/// ```yaml
/// rpm:
///   mysql-server: mariadb-server-galera
/// rpm-rhel8:
///   mysql-server: mariadb-server
/// ```
#[derive(Debug, Clone, Default)]
pub struct PackageMapping {
    format: String,
    flavor: String,
    tables: HashMap<String, HashMap<String, String>>,
}

impl PackageMapping {
    pub fn from_yaml(format: &str, flavor: &str, yaml: &str) -> Result<Self> {
        let tables = if yaml.trim().is_empty() {
            HashMap::new()
        } else {
            serde_yaml::from_str(yaml)?
        };
        Ok(Self {
            format: format.to_string(),
            flavor: flavor.to_string(),
            tables,
        })
    }

    /// Load the mapping file named in the configuration, if any
    pub fn load(config: &PackageConfig) -> Result<Self> {
        let yaml = match &config.mapping {
            Some(path) => std::fs::read_to_string(path).map_err(|e| Error::FileRead {
                path: path.display().to_string(),
                error: e.to_string(),
            })?,
            None => String::new(),
        };
        Self::from_yaml(&config.format, &config.flavor, &yaml)
    }

    pub fn map(&self, package: &str) -> String {
        let flavored = format!("{}-{}", self.format, self.flavor);
        [flavored.as_str(), self.format.as_str()]
            .iter()
            .find_map(|ns| self.tables.get(*ns).and_then(|t| t.get(package)))
            .cloned()
            .unwrap_or_else(|| package.to_string())
    }
}

/// Installs and updates packages on cluster nodes
///
/// Package names are generic; implementations map them to distribution
/// names before running anything.
#[async_trait]
pub trait PackageManager: Send + Sync {
    fn name(&self) -> &'static str;

    async fn is_installed(&self, node: &str, package: &str) -> Result<bool>;

    async fn install(&self, node: &str, package: &str) -> Result<()>;

    async fn can_be_updated(&self, node: &str, package: &str) -> Result<bool>;

    async fn update(&self, node: &str, package: &str) -> Result<()>;
}

/// rpm based distributions
pub struct Dnf {
    actions: ActionRunner,
    mapping: PackageMapping,
}

impl Dnf {
    pub fn new(actions: ActionRunner, mapping: PackageMapping) -> Self {
        Self { actions, mapping }
    }
}

#[async_trait]
impl PackageManager for Dnf {
    fn name(&self) -> &'static str {
        "dnf"
    }

    async fn is_installed(&self, node: &str, package: &str) -> Result<bool> {
        let pkg = shell_quote(&self.mapping.map(package));
        let command = format!("rpm -q --qf '%{{NAME}}\\n' {} | grep -qx {}", pkg, pkg);
        Ok(self.actions.run(node, &command).await? == 0)
    }

    async fn install(&self, node: &str, package: &str) -> Result<()> {
        let pkg = shell_quote(&self.mapping.map(package));
        self.actions
            .run_checked(node, &format!("dnf install -y {}", pkg))
            .await
    }

    async fn can_be_updated(&self, node: &str, package: &str) -> Result<bool> {
        let pkg = shell_quote(&self.mapping.map(package));
        // check-update exits with 100 when an update is available
        let code = self
            .actions
            .run(node, &format!("dnf -q check-update {}", pkg))
            .await?;
        Ok(code == 100)
    }

    async fn update(&self, node: &str, package: &str) -> Result<()> {
        let pkg = shell_quote(&self.mapping.map(package));
        self.actions
            .run_checked(node, &format!("dnf update -y {}", pkg))
            .await
    }
}

/// Debian based distributions
pub struct Apt {
    actions: ActionRunner,
    mapping: PackageMapping,
}

impl Apt {
    pub fn new(actions: ActionRunner, mapping: PackageMapping) -> Self {
        Self { actions, mapping }
    }
}

#[async_trait]
impl PackageManager for Apt {
    fn name(&self) -> &'static str {
        "apt"
    }

    async fn is_installed(&self, node: &str, package: &str) -> Result<bool> {
        let pkg = shell_quote(&self.mapping.map(package));
        let command = format!("dpkg -s {} | grep -q 'Status:.*installed'", pkg);
        Ok(self.actions.run(node, &command).await? == 0)
    }

    async fn install(&self, node: &str, package: &str) -> Result<()> {
        let pkg = shell_quote(&self.mapping.map(package));
        self.actions
            .run_checked(node, &format!("apt-get install -y {}", pkg))
            .await
    }

    async fn can_be_updated(&self, node: &str, package: &str) -> Result<bool> {
        let pkg = shell_quote(&self.mapping.map(package));
        let command = format!(
            "apt-cache policy {} | awk '/Installed:/ {{I=$2}} /Candidate:/ {{C=$2}} END {{exit(I==C)}}'",
            pkg
        );
        Ok(self.actions.run(node, &command).await? == 0)
    }

    async fn update(&self, node: &str, package: &str) -> Result<()> {
        let pkg = shell_quote(&self.mapping.map(package));
        self.actions
            .run_checked(node, &format!("apt-get install -y {}", pkg))
            .await
    }
}

/// Build the configured package manager
pub fn package_manager(
    kind: PackageManagerKind,
    actions: ActionRunner,
    mapping: PackageMapping,
) -> Box<dyn PackageManager> {
    match kind {
        PackageManagerKind::Dnf => Box::new(Dnf::new(actions, mapping)),
        PackageManagerKind::Apt => Box::new(Apt::new(actions, mapping)),
    }
}
