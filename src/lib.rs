//! Resource agent tester
//!
//! Drives a live Pacemaker cluster through scripted resource lifecycle
//! tests, using patterns over the nodes' logs as synchronization points.

pub mod action;
pub mod capability;
pub mod cli;
pub mod commands;
pub mod common;
pub mod remote;
pub mod suites;
pub mod testing;
pub mod watch;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use testing::{RunReport, Verdict};
pub use watch::{LogTailWatch, Pattern};
