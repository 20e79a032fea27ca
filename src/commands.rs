//! CLI command definitions
//!
//! Defines the clap commands for the ra-tester CLI.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run the tests of a suite against the cluster
    Run {
        /// Suite to run
        #[arg(long, short, default_value = "dummy")]
        suite: String,

        /// Scenario to set the cluster up with (default: the suite's first)
        #[arg(long)]
        scenario: Option<String>,

        /// Run only these tests; can be given several times
        #[arg(long = "test", short = 't')]
        tests: Vec<String>,

        /// Cluster nodes, comma separated (overrides the config file)
        #[arg(long, value_delimiter = ',')]
        nodes: Option<Vec<String>>,

        /// Configuration file (default: ~/.config/ra-tester/config.toml)
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Write the run report as JSON to this file
        #[arg(long)]
        report: Option<PathBuf>,

        /// Log every remote command
        #[arg(long, short)]
        verbose: bool,

        /// Reuse the running cluster instead of creating a new one
        #[arg(long)]
        keep_cluster: bool,

        /// Leave resources in place after each test, for debugging
        #[arg(long)]
        keep_resources: bool,

        /// Enable fencing during the run
        #[arg(long)]
        stonith: bool,
    },

    /// List suites, their scenarios and tests
    List {
        /// Only list this suite
        #[arg(long, short)]
        suite: Option<String>,
    },
}
