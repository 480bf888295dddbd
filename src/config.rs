//! Engine configuration loaded from the platform config directory.
//!
//! The config file is optional JSON at e.g.
//! `~/.config/walk/config.json`:
//!
//! ```json
//! {
//!     "ignore_roots": ["/opt/toolchain/registry/"],
//!     "method": "preload",
//!     "num_threads": 8
//! }
//! ```
//!
//! A missing or unreadable file silently falls back to defaults; CLI flags
//! override whatever the file says.

use anyhow::Result;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::trace::Method;

/// On-disk engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Extra path prefixes excluded from access logs, in addition to the
    /// built-in set.
    #[serde(default)]
    pub ignore_roots: Vec<String>,

    /// Default tracer backend (overridden by `-m`).
    #[serde(default)]
    pub method: Option<Method>,

    /// Default worker count for [`crate::pool::Concurrent::from_config`];
    /// unset means one worker per available CPU.
    #[serde(default)]
    pub num_threads: Option<usize>,
}

impl Config {
    /// Load the configuration from the default platform-specific path.
    #[must_use]
    pub fn load() -> Self {
        match Self::load_internal() {
            Ok(config) => config,
            Err(e) => {
                log::debug!("failed to load config, using defaults: {e}");
                Self::default()
            }
        }
    }

    fn load_internal() -> Result<Self> {
        let path = Self::config_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save the configuration to the default platform-specific path.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("com", "walk", "walk")
            .ok_or_else(|| anyhow::anyhow!("failed to determine project directories"))?;
        Ok(dirs.config_dir().join("config.json"))
    }
}
