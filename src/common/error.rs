//! Error types for the resource agent tester
//!
//! Errors fall in two families: assertion failures, which a test body
//! raises when the cluster did not behave as expected, and harness errors,
//! which mean preconditions could not even be established.

use std::any::Any;
use std::future::Future;
use std::io;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;

use futures_util::FutureExt;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the tester
#[derive(Error, Debug)]
pub enum Error {
    // === Remote Execution Errors ===
    #[error("Host '{host}' is unreachable: {reason}")]
    HostUnreachable { host: String, reason: String },

    #[error("Failed to spawn remote command on '{host}': {source}")]
    RemoteSpawn {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("Remote command on '{host}' timed out after {secs} seconds")]
    RemoteTimeout { host: String, secs: u64 },

    // === Assertion Errors ===
    #[error("Assertion failed: {0}")]
    TestAssertion(String),

    #[error("\"{command}\" on {host} returned {code} (expected {expected}){}", artifact_suffix(.artifact))]
    CommandFailed {
        host: String,
        command: String,
        code: i32,
        expected: i32,
        artifact: Option<PathBuf>,
    },

    #[error("Unmatched log patterns: {}", .0.join(", "))]
    WatchUnmatched(Vec<String>),

    #[error("\"{command}\" did not succeed on any of [{hosts}] within {secs} seconds")]
    PollTimeout {
        command: String,
        hosts: String,
        secs: u64,
    },

    // === Watch Errors ===
    #[error("Invalid log pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Log watch has no hosts to read from")]
    NoLogSources,

    #[error("Log stream error on '{host}': {reason}")]
    LogStream { host: String, reason: String },

    // === Scenario Errors ===
    #[error("Scenario component '{component}' failed during {phase}: {reason}")]
    Scenario {
        component: String,
        phase: &'static str,
        reason: String,
    },

    #[error("Invalid resource configuration: {0}")]
    ResourceConfig(String),

    #[error("Unknown {kind} '{name}'")]
    Unknown { kind: &'static str, name: String },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Panicked: {0}")]
    Panicked(String),
}

fn artifact_suffix(artifact: &Option<PathBuf>) -> String {
    match artifact {
        Some(path) => format!(", output saved to {}", path.display()),
        None => String::new(),
    }
}

impl Error {
    /// Create an assertion failure
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::TestAssertion(message.into())
    }

    /// Create an unreachable-host error
    pub fn unreachable(host: &str, reason: impl Into<String>) -> Self {
        Self::HostUnreachable {
            host: host.to_string(),
            reason: reason.into(),
        }
    }

    /// Create an unknown-name error (suite, scenario, test, manager kind...)
    pub fn unknown(kind: &'static str, name: &str) -> Self {
        Self::Unknown {
            kind,
            name: name.to_string(),
        }
    }

    /// Whether this error is an "expected X, got Y" signal from a test body
    ///
    /// Assertion failures are converted to a failed outcome; everything else
    /// means the harness itself could not do its job.
    pub fn is_assertion(&self) -> bool {
        matches!(
            self,
            Error::TestAssertion(_)
                | Error::CommandFailed { .. }
                | Error::WatchUnmatched(_)
                | Error::PollTimeout { .. }
        )
    }

    /// Whether the error means a remote host could not be reached
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            Error::HostUnreachable { .. } | Error::RemoteTimeout { .. }
        )
    }

    /// Local artifact holding the captured output of a failed command
    pub fn artifact(&self) -> Option<&PathBuf> {
        match self {
            Error::CommandFailed { artifact, .. } => artifact.as_ref(),
            _ => None,
        }
    }
}

/// Await a hook, turning a panic inside it into [`Error::Panicked`]
///
/// Test and scenario hooks run user code against a live cluster; a panic
/// must not skip the teardowns that follow.
pub async fn catch_panic<T>(hook: impl Future<Output = Result<T>>) -> Result<T> {
    match AssertUnwindSafe(hook).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(Error::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Return an assertion failure unless the condition holds
///
/// ```
/// use ratester::check;
///
/// fn verify(unmatched: &[String]) -> ratester::Result<()> {
///     check!(unmatched.is_empty(), "unmatched patterns: {:?}", unmatched);
///     Ok(())
/// }
/// assert!(verify(&[]).is_ok());
/// ```
#[macro_export]
macro_rules! check {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::Error::TestAssertion(format!($($arg)+)));
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assertion_classification() {
        assert!(Error::assertion("x").is_assertion());
        assert!(Error::WatchUnmatched(vec!["p".into()]).is_assertion());
        assert!(!Error::Config("bad".into()).is_assertion());
        assert!(!Error::unreachable("node-1", "timeout").is_assertion());
    }

    #[test]
    fn test_command_failed_message_mentions_artifact() {
        let err = Error::CommandFailed {
            host: "node-1".into(),
            command: "pcs resource enable dummy".into(),
            code: 1,
            expected: 0,
            artifact: Some(PathBuf::from("/tmp/out.log")),
        };
        let msg = err.to_string();
        assert!(msg.contains("returned 1"));
        assert!(msg.contains("/tmp/out.log"));
        assert_eq!(err.artifact(), Some(&PathBuf::from("/tmp/out.log")));
    }

    #[test]
    fn test_check_macro() {
        fn guarded(ok: bool) -> Result<()> {
            check!(ok, "value was {}", ok);
            Ok(())
        }
        assert!(guarded(true).is_ok());
        let err = guarded(false).unwrap_err();
        assert!(matches!(err, Error::TestAssertion(ref m) if m == "value was false"));
    }

    #[tokio::test]
    async fn test_catch_panic_keeps_message() {
        let ok = catch_panic(async { Ok(3) }).await.unwrap();
        assert_eq!(ok, 3);

        let err = catch_panic(async {
            let empty: Vec<u32> = Vec::new();
            let idx = empty.len() + 3;
            Ok(empty[idx])
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Panicked(ref m) if m.contains("index out of bounds")));
        assert!(!err.is_assertion());
    }
}
