//! Configuration file handling
//!
//! The configuration is loaded once, validated, and then shared read-only
//! (as `Arc<Config>`) by every component of a run.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::{config_path, default_artifact_dir};
use super::{Error, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Cluster under test
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// SSH transport settings
    #[serde(default)]
    pub ssh: SshConfig,

    /// Where the cluster logs live on every node
    #[serde(default)]
    pub logs: LogConfig,

    /// Run behaviour
    #[serde(default)]
    pub run: RunConfig,

    /// Container engine used by bundle scenarios
    #[serde(default)]
    pub containers: ContainerConfig,

    /// Package manager settings
    #[serde(default)]
    pub packages: PackageConfig,
}

/// Cluster manager dialect
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ManagerKind {
    /// Pacemaker 1.x with pcs 0.9
    Pcmk1,
    /// Pacemaker 2.x with pcs 0.10+
    #[default]
    Pcmk2,
}

/// Cluster configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ClusterConfig {
    /// Cluster nodes, in the order commands target them
    #[serde(default)]
    pub nodes: Vec<String>,

    /// Cluster manager dialect
    #[serde(default)]
    pub manager: ManagerKind,

    /// Name given to the cluster on creation
    #[serde(default = "default_cluster_name")]
    pub name: String,

    /// Password of the hacluster user
    #[serde(default = "default_password")]
    pub password: String,

    /// Exit code of `crm_attribute` when the attribute does not exist.
    /// Differs between cluster manager releases, so it has no default.
    pub attribute_absent_exit_code: Option<i32>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            manager: ManagerKind::default(),
            name: default_cluster_name(),
            password: default_password(),
            attribute_absent_exit_code: None,
        }
    }
}

fn default_cluster_name() -> String {
    "ratester".to_string()
}
fn default_password() -> String {
    "ratester".to_string()
}

/// Timeout settings
#[derive(Debug, Deserialize, Clone)]
pub struct Timeouts {
    /// Default deadline of a log watch
    #[serde(default = "default_dead_time")]
    pub dead_time_secs: u64,

    /// How long a single log poll may take before its host is dropped
    #[serde(default = "default_host_poll_timeout")]
    pub host_poll_timeout_secs: u64,

    /// Pause between two log polls of the same host
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// How long to wait for a rebooted node to answer again
    #[serde(default = "default_restart_timeout")]
    pub restart_timeout_secs: u64,

    /// Pause between two attempts of a polled command
    #[serde(default = "default_poll_until_interval")]
    pub poll_until_interval_secs: u64,

    /// Upper bound of any single remote command
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            dead_time_secs: default_dead_time(),
            host_poll_timeout_secs: default_host_poll_timeout(),
            poll_interval_ms: default_poll_interval(),
            restart_timeout_secs: default_restart_timeout(),
            poll_until_interval_secs: default_poll_until_interval(),
            command_timeout_secs: default_command_timeout(),
        }
    }
}

fn default_dead_time() -> u64 {
    300
}
fn default_host_poll_timeout() -> u64 {
    8
}
fn default_poll_interval() -> u64 {
    1000
}
fn default_restart_timeout() -> u64 {
    300
}
fn default_poll_until_interval() -> u64 {
    2
}
fn default_command_timeout() -> u64 {
    900
}

impl Timeouts {
    pub fn dead_time(&self) -> Duration {
        Duration::from_secs(self.dead_time_secs)
    }

    pub fn host_poll_timeout(&self) -> Duration {
        Duration::from_secs(self.host_poll_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn restart_timeout(&self) -> Duration {
        Duration::from_secs(self.restart_timeout_secs)
    }

    pub fn poll_until_interval(&self) -> Duration {
        Duration::from_secs(self.poll_until_interval_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// SSH transport configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SshConfig {
    /// Remote user
    #[serde(default = "default_ssh_user")]
    pub user: String,

    /// Private key passed with `-i`
    pub identity_file: Option<PathBuf>,

    /// `ConnectTimeout` given to ssh
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Extra `-o` options
    #[serde(default)]
    pub options: Vec<String>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: default_ssh_user(),
            identity_file: None,
            connect_timeout_secs: default_connect_timeout(),
            options: Vec::new(),
        }
    }
}

fn default_ssh_user() -> String {
    "root".to_string()
}
fn default_connect_timeout() -> u64 {
    5
}

/// Kind of log stream read on every node
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    /// Plain log file, read by line number
    #[default]
    File,
    /// systemd journal, read by journal cursor
    Journal,
}

/// Log stream configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    #[serde(default)]
    pub kind: LogKind,

    /// Log file path (for `kind = "file"`)
    #[serde(default = "default_log_path")]
    pub path: PathBuf,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            kind: LogKind::default(),
            path: default_log_path(),
        }
    }
}

fn default_log_path() -> PathBuf {
    PathBuf::from("/var/log/pacemaker/pacemaker.log")
}

/// Run behaviour
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RunConfig {
    /// Log every remote command at info level
    #[serde(default)]
    pub verbose: bool,

    /// Reuse the running cluster instead of bootstrapping a new one
    #[serde(default)]
    pub keep_cluster: bool,

    /// Leave resources and fencing devices in place after each test
    #[serde(default)]
    pub keep_resources: bool,

    /// Enable fencing during the run
    #[serde(default)]
    pub stonith: bool,

    /// Fence agent used when fencing is enabled
    #[serde(default = "default_stonith_type")]
    pub stonith_type: String,

    /// Parameters of the fence agent
    #[serde(default)]
    pub stonith_params: String,

    /// Where output of failed commands is collected
    pub artifact_dir: Option<PathBuf>,
}

fn default_stonith_type() -> String {
    "fence_xvm".to_string()
}

/// Container engine selection
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Docker,
    #[default]
    Podman,
}

/// Container configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ContainerConfig {
    #[serde(default)]
    pub engine: EngineKind,

    /// Image used by bundle scenarios
    pub image: Option<String>,
}

/// Package manager selection
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PackageManagerKind {
    #[default]
    Dnf,
    Apt,
}

/// Package configuration
#[derive(Debug, Deserialize, Clone)]
pub struct PackageConfig {
    #[serde(default)]
    pub manager: PackageManagerKind,

    /// Package format, first half of the mapping namespace (e.g. "rpm")
    #[serde(default = "default_pkg_format")]
    pub format: String,

    /// Distribution flavor, second half of the mapping namespace (e.g. "rhel8")
    #[serde(default)]
    pub flavor: String,

    /// YAML file mapping generic package names to distribution names
    pub mapping: Option<PathBuf>,
}

impl Default for PackageConfig {
    fn default() -> Self {
        Self {
            manager: PackageManagerKind::default(),
            format: default_pkg_format(),
            flavor: String::new(),
            mapping: None,
        }
    }
}

fn default_pkg_format() -> String {
    "rpm".to_string()
}

/// Values given on the command line, applied on top of the file
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub nodes: Option<Vec<String>>,
    pub verbose: bool,
    pub keep_cluster: bool,
    pub keep_resources: bool,
    pub stonith: bool,
}

impl Config {
    /// Load configuration from an explicit path, or the default config file
    ///
    /// A missing default file yields the default configuration; a missing
    /// explicit file is an error. The result is not validated yet.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match config_path() {
                Some(p) if p.exists() => p,
                _ => return Ok(Self::default()),
            },
        };

        let content = std::fs::read_to_string(&path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Parse and validate a configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply command line overrides
    pub fn apply(&mut self, overrides: ConfigOverrides) {
        if let Some(nodes) = overrides.nodes {
            self.cluster.nodes = nodes
                .into_iter()
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .collect();
        }
        self.run.verbose |= overrides.verbose;
        self.run.keep_cluster |= overrides.keep_cluster;
        self.run.keep_resources |= overrides.keep_resources;
        self.run.stonith |= overrides.stonith;
    }

    /// Check that the configuration can drive a run
    pub fn validate(&self) -> Result<()> {
        if self.cluster.nodes.is_empty() {
            return Err(Error::Config(
                "no cluster nodes configured; set [cluster] nodes or pass --nodes".to_string(),
            ));
        }
        self.attribute_absent_exit_code()?;
        let t = &self.timeouts;
        if t.dead_time_secs == 0
            || t.host_poll_timeout_secs == 0
            || t.poll_interval_ms == 0
            || t.command_timeout_secs == 0
        {
            return Err(Error::Config("timeouts must be greater than zero".to_string()));
        }
        Ok(())
    }

    /// Exit code meaning "attribute absent"
    ///
    /// There is no safe default: the code changed between cluster manager
    /// releases.
    pub fn attribute_absent_exit_code(&self) -> Result<i32> {
        self.cluster.attribute_absent_exit_code.ok_or_else(|| {
            Error::Config(
                "[cluster] attribute_absent_exit_code is required (it depends on the cluster manager release)"
                    .to_string(),
            )
        })
    }

    /// Directory collecting output of failed commands
    pub fn artifact_dir(&self) -> PathBuf {
        self.run
            .artifact_dir
            .clone()
            .unwrap_or_else(default_artifact_dir)
    }

    /// Primary node, the one cluster-wide commands run on
    pub fn first_node(&self) -> &str {
        self.cluster.nodes.first().map(String::as_str).unwrap_or("")
    }
}
