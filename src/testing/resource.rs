//! Resource under test and the step sequences shared by test bodies

use crate::common::{shell_quote, Error, Result};
use crate::watch::{templates, Pattern};

use super::context::{Harness, TestContext};

/// Container bundle wrapping a resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleSpec {
    pub image: String,
    /// Replica count; defaults to the number of cluster nodes
    pub replicas: Option<usize>,
    /// Extra `pcs resource bundle create` arguments
    pub extra_args: String,
}

impl BundleSpec {
    pub fn new(image: impl Into<String>) -> Result<Self> {
        let image = image.into();
        if image.trim().is_empty() {
            return Err(Error::ResourceConfig("bundle image must not be empty".to_string()));
        }
        Ok(Self {
            image,
            replicas: None,
            extra_args: String::new(),
        })
    }
}

/// A cluster resource as the tests create and observe it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceConfig {
    /// Name of the pacemaker resource (or of the bundle wrapping it)
    pub name: String,
    /// Resource agent name, as it appears in operation logs
    pub ocf_name: String,
    /// `pcs resource create ...` command creating the resource
    pub create_command: String,
    pub bundle: Option<BundleSpec>,
    /// Meta attributes appended to the create command
    pub meta: String,
}

fn valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

impl ResourceConfig {
    pub fn new(name: &str, ocf_name: &str, create_command: &str) -> Result<Self> {
        if !valid_id(name) {
            return Err(Error::ResourceConfig(format!("invalid resource name '{}'", name)));
        }
        if !valid_id(ocf_name) {
            return Err(Error::ResourceConfig(format!("invalid agent name '{}'", ocf_name)));
        }
        if create_command.trim().is_empty() {
            return Err(Error::ResourceConfig(format!(
                "resource '{}' has no create command",
                name
            )));
        }
        Ok(Self {
            name: name.to_string(),
            ocf_name: ocf_name.to_string(),
            create_command: create_command.trim().to_string(),
            bundle: None,
            meta: String::new(),
        })
    }

    pub fn with_bundle(mut self, bundle: BundleSpec) -> Self {
        self.bundle = Some(bundle);
        self
    }

    pub fn with_meta(mut self, meta: impl Into<String>) -> Self {
        self.meta = meta.into();
        self
    }

    pub fn is_bundle(&self) -> bool {
        self.bundle.is_some()
    }

    /// Command creating the bundle, if the resource runs in one
    pub fn bundle_command(&self, engine: &str, cluster_size: usize) -> Option<String> {
        let bundle = self.bundle.as_ref()?;
        let replicas = bundle.replicas.unwrap_or(cluster_size);
        let mut cmd = format!(
            "pcs resource bundle create {} container {} image={} replicas={} network=host \
             options=\"--user=root --log-driver=journald\" run-command=\"/usr/sbin/pacemaker_remoted\" \
             network control-port=3123 \
             storage-map id=map0 source-dir=/dev/log target-dir=/dev/log \
             storage-map id=map1 source-dir=/dev/zero target-dir=/etc/libqb/force-filesystem-sockets options=ro \
             storage-map id=pcmk1 source-dir=/var/log/pacemaker target-dir=/var/log/pacemaker options=rw",
            self.name,
            engine,
            shell_quote(&bundle.image),
            replicas
        );
        if !bundle.extra_args.is_empty() {
            cmd.push(' ');
            cmd.push_str(&bundle.extra_args);
        }
        cmd.push_str(" --disabled");
        Some(cmd)
    }

    /// Command creating the resource itself
    ///
    /// A bundled resource is created enabled inside its (disabled) bundle;
    /// a plain resource is created disabled.
    pub fn resource_command(&self) -> String {
        let mut meta = self.meta.clone();
        if self.is_bundle() {
            if !meta.is_empty() {
                meta.push(' ');
            }
            meta.push_str(&format!("bundle {}", self.name));
        }
        let mut cmd = self.create_command.clone();
        if !meta.is_empty() {
            cmd.push_str(" meta ");
            cmd.push_str(&meta);
        }
        if !self.is_bundle() {
            cmd.push_str(" --disabled");
        }
        cmd
    }
}

/// Name under which the resource shows up in probe operations
pub fn resource_probe_pattern(harness: &Harness, config: &ResourceConfig) -> String {
    match &config.bundle {
        Some(_) => format!(
            "{}-bundle-{}-[0-9]",
            config.ocf_name,
            harness.caps.containers.package_name()
        ),
        None => config.ocf_name.clone(),
    }
}

/// Nodes the resource runs on: bundle replicas, or the cluster nodes
pub fn resource_target_nodes(config: &ResourceConfig, cluster: &[String]) -> Vec<String> {
    if config.is_bundle() {
        (0..cluster.len())
            .map(|i| format!("{}-bundle-{}", config.ocf_name, i))
            .collect()
    } else {
        cluster.to_vec()
    }
}

/// Probe patterns confirming the resource is stopped on every node
pub fn probe_patterns(harness: &Harness, config: &ResourceConfig, status: &str) -> Result<Vec<Pattern>> {
    let probe = resource_probe_pattern(harness, config);
    harness
        .nodes()
        .iter()
        .map(|node| templates::rsc_remote_op("probe", &probe, node, status))
        .collect()
}

/// Create the resource stopped, and wait until every node probed it
pub async fn setup_inactive_resource(ctx: &TestContext, config: &ResourceConfig) -> Result<()> {
    let harness = &ctx.harness;
    let node = harness.config.first_node();

    let mut patterns = vec![templates::cluster_idle()?];
    patterns.extend(probe_patterns(harness, config, "not running")?);
    let watch = harness.actions.make_watch(patterns).await?;

    let engine = harness.caps.containers.package_name();
    if let Some(bundle) = config.bundle_command(engine, harness.nodes().len()) {
        harness.actions.run_checked(node, &bundle).await?;
    }
    harness
        .actions
        .run_checked(node, &config.resource_command())
        .await?;

    watch.await_all().await.ensure_complete()
}

/// Give the resource back to pacemaker and delete it
///
/// Nothing is deleted when resources are kept for debugging.
pub async fn delete_resource(ctx: &TestContext, config: &ResourceConfig) -> Result<()> {
    if ctx.config().run.keep_resources {
        tracing::info!("keeping resource {}", config.name);
        return Ok(());
    }
    let node = ctx.config().first_node();
    let actions = ctx.actions();
    actions
        .run_checked(node, &format!("pcs resource manage {}", config.name))
        .await?;
    // deleting implies a stop, which fails while ban constraints are set
    actions
        .run_checked(node, &format!("pcs resource delete {}", config.name))
        .await
}

/// Log noise every resource test tolerates
pub fn default_errors_to_ignore(harness: &Harness) -> Vec<String> {
    let mut ignore = harness.caps.containers.errors_to_ignore();
    ignore.extend(
        [
            r"pengine.*error: Could not fix addr for ",
            // associating a resource to a bundle logs spurious errors
            r"(pengine|pacemaker-schedulerd).*:.*error: Could not determine address for bundle",
            // pacemaker_remoted complains when its bundle is deleted
            r"error:.*Connection terminated: Error in the push function",
            r"error:.*Could not send remote message: Software caused connection abort",
            r"error:.*Connection terminated: The specified session has been invalidated for some reason",
            r"error:.*Connection terminated rc = -(53|10)",
            r"error:.*Failed to send remote msg, rc = -(53|10)",
            r"error:.*Failed to send remote lrmd tls msg, rc = -(53|10)",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    ignore
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::context::harness_fixture;
    use std::sync::Arc;

    fn dummy() -> ResourceConfig {
        ResourceConfig::new("dummy", "dummy", "pcs resource create dummy ocf:pacemaker:Dummy").unwrap()
    }

    #[test]
    fn test_invalid_configs_rejected() {
        assert!(ResourceConfig::new("", "dummy", "x").is_err());
        assert!(ResourceConfig::new("a b", "dummy", "x").is_err());
        assert!(ResourceConfig::new("dummy", "dummy", "  ").is_err());
        assert!(BundleSpec::new("").is_err());
    }

    #[test]
    fn test_plain_resource_command() {
        assert_eq!(
            dummy().resource_command(),
            "pcs resource create dummy ocf:pacemaker:Dummy --disabled"
        );
        assert_eq!(
            dummy().with_meta("notify=true").resource_command(),
            "pcs resource create dummy ocf:pacemaker:Dummy meta notify=true --disabled"
        );
    }

    #[test]
    fn test_bundle_commands() {
        let cfg = ResourceConfig::new("dummy-bundle", "dummy", "pcs resource create dummy ocf:pacemaker:Dummy")
            .unwrap()
            .with_bundle(BundleSpec::new("quay.io/x/dummy:latest").unwrap());
        assert_eq!(
            cfg.resource_command(),
            "pcs resource create dummy ocf:pacemaker:Dummy meta bundle dummy-bundle"
        );
        let bundle = cfg.bundle_command("podman", 3).unwrap();
        assert!(bundle.starts_with("pcs resource bundle create dummy-bundle container podman image=quay.io/x/dummy:latest replicas=3"));
        assert!(bundle.ends_with("--disabled"));
        assert!(dummy().bundle_command("podman", 3).is_none());
    }

    #[test]
    fn test_targets_and_probe_names() {
        let (_, _, harness) = harness_fixture(&["node-1", "node-2"]);
        let cfg = dummy().with_bundle(BundleSpec::new("img").unwrap());
        assert_eq!(resource_target_nodes(&cfg, harness.nodes()), vec!["dummy-bundle-0", "dummy-bundle-1"]);
        assert_eq!(resource_target_nodes(&dummy(), harness.nodes()), vec!["node-1", "node-2"]);
        assert_eq!(resource_probe_pattern(&harness, &cfg), "dummy-bundle-podman-[0-9]");
        assert_eq!(resource_probe_pattern(&harness, &dummy()), "dummy");
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_inactive_resource_waits_for_probes() {
        let (mock, logs, harness) = harness_fixture(&["node-1", "node-2"]);
        let ctx = TestContext::new(harness, Arc::default());
        for (i, node) in ["node-1", "node-2"].iter().enumerate() {
            logs.schedule_line(
                node,
                std::time::Duration::from_secs(2 + i as u64),
                &format!(
                    "pacemaker-controld[1]: notice: Result of probe operation for dummy on {}: 7 (not running)",
                    node
                ),
            );
        }
        logs.schedule_line(
            "node-1",
            std::time::Duration::from_secs(4),
            "pacemaker-controld[1]: notice: State transition S_TRANSITION_ENGINE -> S_IDLE",
        );

        setup_inactive_resource(&ctx, &dummy()).await.unwrap();
        assert!(mock
            .commands_for("node-1")
            .iter()
            .any(|c| c.contains("pcs resource create dummy ocf:pacemaker:Dummy --disabled")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_inactive_resource_fails_without_probes() {
        let (_, _, harness) = harness_fixture(&["node-1"]);
        let ctx = TestContext::new(harness, Arc::default());
        let err = setup_inactive_resource(&ctx, &dummy()).await.unwrap_err();
        assert!(matches!(err, Error::WatchUnmatched(ref p) if p.len() == 2));
    }

    #[tokio::test]
    async fn test_delete_resource_honors_keep_resources() {
        let (mock, logs, harness) = harness_fixture(&["node-1"]);
        let mut config = (*harness.config).clone();
        config.run.keep_resources = true;
        let kept = crate::testing::context::Harness::new(
            Arc::new(config),
            Arc::new(mock.clone()),
            Arc::new(logs),
        )
        .unwrap();

        delete_resource(&TestContext::new(kept, Arc::default()), &dummy()).await.unwrap();
        assert!(mock.commands().is_empty());

        delete_resource(&TestContext::new(harness, Arc::default()), &dummy()).await.unwrap();
        let cmds = mock.commands_for("node-1");
        assert!(cmds[0].contains("pcs resource manage dummy"));
        assert!(cmds.iter().any(|c| c.contains("pcs resource delete dummy")));
    }
}
