//! Logging and tracing configuration
//!
//! Logs go to stderr and, when a log directory is available, to a run log
//! file that survives the terminal session for post-mortem analysis.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::paths;

/// Name of the run log file inside the log directory
const RUN_LOG_NAME: &str = "ra-tester.log";

/// Initialize tracing for a run
///
/// Logs are controlled by the `RUST_LOG` environment variable.
/// Default level is INFO for this crate, WARN for dependencies. The returned
/// guard must be kept alive until the end of the run so the file writer can
/// flush.
pub fn init(verbose: bool) -> Option<WorkerGuard> {
    let default = if verbose {
        "ratester=debug,warn"
    } else {
        "ratester=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    let file = paths::log_dir().and_then(|dir| paths::ensure_dir(dir).ok());
    match file {
        Some(dir) => {
            let appender = tracing_appender::rolling::never(dir, RUN_LOG_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);

            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(file_layer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
            None
        }
    }
}

/// Get the path to the run log file
pub fn run_log_path() -> Option<PathBuf> {
    paths::log_dir().map(|d| d.join(RUN_LOG_NAME))
}
