//! CLI command handling
//!
//! Wires the configuration, transport and registry together and prints
//! the results.

use std::sync::Arc;

use colored::Colorize;

use crate::commands::Commands;
use crate::common::config::{Config, ConfigOverrides};
use crate::common::{logging, Error, Result};
use crate::remote::{RemoteLogSource, SshExecutor};
use crate::testing::{
    BadNewsAudit, Harness, Interrupts, Registry, Runner, ShmAudit, Suite, TestStatus,
};

/// Dispatch a CLI command; returns whether the run succeeded
pub async fn dispatch(command: Commands) -> Result<bool> {
    match command {
        Commands::Run {
            suite,
            scenario,
            tests,
            nodes,
            config,
            report,
            verbose,
            keep_cluster,
            keep_resources,
            stonith,
        } => {
            let mut cfg = Config::load(config.as_deref())?;
            cfg.apply(ConfigOverrides {
                nodes,
                verbose,
                keep_cluster,
                keep_resources,
                stonith,
            });
            cfg.validate()?;
            let _guard = logging::init(cfg.run.verbose);

            let registry = Registry::builtin();
            let suite = registry.suite(&suite)?;
            let mut scenario = suite.scenario(scenario.as_deref())?.build(&cfg)?;
            let cases = suite.select_tests(&tests)?;

            let config = Arc::new(cfg);
            let executor = Arc::new(SshExecutor::from_config(&config)?);
            let logs = Arc::new(RemoteLogSource::new(executor.clone(), &config.logs));
            let harness = Harness::new(config.clone(), executor, logs)?;

            tracing::info!(
                suite = suite.name(),
                scenario = scenario.name(),
                "running {} tests on {}",
                cases.len(),
                config.cluster.nodes.join(", ")
            );
            let mut runner = Runner::new(harness, Interrupts::from_signals()?)
                .with_audit(Arc::new(BadNewsAudit::new()?))
                .with_audit(Arc::new(ShmAudit));
            let result = runner.run(suite.name(), &mut scenario, cases).await;

            result.print_summary();
            if let Some(path) = report {
                result.write_json(&path)?;
                println!("Report written to {}", path.display());
            }
            if let Some(log) = logging::run_log_path() {
                println!("Run log: {}", log.display());
            }
            Ok(result.success())
        }

        Commands::List { suite } => {
            let registry = Registry::builtin();
            let suites: Vec<Arc<dyn Suite>> = match suite {
                Some(name) => vec![registry.suite(&name)?],
                None => registry.suites().to_vec(),
            };
            if suites.is_empty() {
                return Err(Error::Internal("no suite registered".to_string()));
            }
            for suite in suites {
                print_suite(suite.as_ref());
            }
            Ok(true)
        }
    }
}

fn print_suite(suite: &dyn Suite) {
    println!("{} {}", suite.name().white().bold(), suite.description().dimmed());
    println!("  {}", "Scenarios:".cyan());
    for scenario in suite.scenarios() {
        println!("    {:24} {}", scenario.name, scenario.description);
    }
    println!("  {}", "Tests:".cyan());
    for test in suite.tests() {
        match test.status {
            TestStatus::Enabled => {
                println!("    {:24} {}", test.name(), test.body.description())
            }
            TestStatus::KnownDisabled { reason } => println!(
                "    {:24} {} ({})",
                test.name().dimmed(),
                "disabled".yellow(),
                reason
            ),
        }
    }
    println!();
}
