//! Unified path management for chorus files.
//!
//! All configuration, session records and logs live under one base
//! directory so a test (or a user) can relocate everything at once.

use std::path::{Path, PathBuf};

const APP_DIR: &str = "chorus";

/// Errors that can occur during path resolution.
#[derive(Debug)]
pub enum PathError {
    /// The platform config directory could not be determined.
    ConfigDirNotFound,
}

impl std::fmt::Display for PathError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathError::ConfigDirNotFound => write!(f, "Cannot find the platform config directory"),
        }
    }
}

impl std::error::Error for PathError {}

/// Resolved chorus directories.
///
/// # Directory Structure
///
/// ```text
/// ~/.config/chorus/            # Base directory (platform config dir)
/// ├── config.toml              # Dispatcher endpoint, poll interval, ...
/// ├── sessions/                # One <session-id>.json per run
/// └── logs/                    # Daily rolling log files
///     └── chorus.log.YYYY-MM-DD
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChorusPaths {
    base: PathBuf,
}

impl ChorusPaths {
    /// Resolves the platform default (`dirs::config_dir()/chorus`).
    ///
    /// # Errors
    ///
    /// Returns `PathError::ConfigDirNotFound` if the platform has no config
    /// directory (e.g. `$HOME` unset).
    pub fn platform_default() -> Result<Self, PathError> {
        let base = dirs::config_dir()
            .ok_or(PathError::ConfigDirNotFound)?
            .join(APP_DIR);
        Ok(Self { base })
    }

    /// Uses `base` instead of the platform directory.
    pub fn with_base(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.toml")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.base.join("sessions")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base.join("logs")
    }

    /// Creates the sessions and logs directories if missing.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.sessions_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}
