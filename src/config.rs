//! Supervisor configuration
//!
//! Settings shared by every supervisor a host creates: which backend
//! executable to run, how the client identifies itself to it, and how the
//! retry loop behaves. Loadable from a TOML file for hosts that keep their
//! analysis settings on disk.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

fn default_max_attempts() -> u32 {
    5
}

fn default_client_name() -> String {
    "analysis-host".to_string()
}

/// Configuration for backend supervisors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Backend executable name, looked up on `$PATH` and in conventional
    /// install locations
    pub program: String,

    /// Explicit path to the executable; skips the lookup when set
    #[serde(default)]
    pub program_path: Option<PathBuf>,

    /// Client identification passed to every invocation (`--from=<name>`)
    #[serde(default = "default_client_name")]
    pub client_name: String,

    /// Total attempts per command, including the first (minimum 1)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Optional delay between retry attempts, in milliseconds.
    /// The default is no delay.
    #[serde(default)]
    pub retry_delay_ms: Option<u64>,
}

impl SupervisorConfig {
    /// Configuration for the given backend executable name, with defaults
    /// for everything else
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            program_path: None,
            client_name: default_client_name(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: None,
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config {:?}: {}", path, e)))?;

        let config: SupervisorConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config {:?}: {}", path, e)))?;

        tracing::debug!("Loaded supervisor config for backend {:?}", config.program);

        Ok(config)
    }

    /// The delay between retry attempts, if any
    pub fn retry_delay(&self) -> Option<Duration> {
        self.retry_delay_ms.map(Duration::from_millis)
    }

    /// Resolve the backend executable.
    ///
    /// Checks the explicit override first, then `$PATH`, then conventional
    /// per-user and system install locations. Returns `None` when the
    /// backend is not installed; callers surface that as feature-unavailable,
    /// never as an error.
    pub fn resolve_program(&self) -> Option<PathBuf> {
        if let Some(path) = &self.program_path {
            if path.exists() {
                return Some(path.clone());
            }
            tracing::warn!("Configured backend path {:?} does not exist", path);
            return None;
        }

        if let Ok(path) = which::which(&self.program) {
            return Some(path);
        }

        let home = dirs::home_dir()?;
        let common_paths = [
            home.join(".cargo/bin").join(&self.program),
            home.join(".local/bin").join(&self.program),
            PathBuf::from("/usr/local/bin").join(&self.program),
            PathBuf::from("/opt/homebrew/bin").join(&self.program),
        ];

        common_paths.iter().find(|p| p.exists()).cloned()
    }
}
