//! Configuration, log and artifact locations
//!
//! Uses the directories crate for platform-appropriate locations:
//! - Linux: `~/.config/ra-tester/` and `~/.local/share/ra-tester/`

use std::io;
use std::path::PathBuf;

/// Name used for the config and data directories
const APP_NAME: &str = "ra-tester";

/// Get the configuration directory path
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the path to the log directory
pub fn log_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.data_dir().join("logs"))
}

/// Default directory where output of failed remote commands is kept
pub fn default_artifact_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", APP_NAME)
        .map(|dirs| dirs.data_dir().join("artifacts"))
        .unwrap_or_else(|| std::env::temp_dir().join(APP_NAME).join("artifacts"))
}

/// Ensure a directory exists, returning it
pub fn ensure_dir(dir: PathBuf) -> io::Result<PathBuf> {
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}
