//! User configuration with JSON persistence
//!
//! The config file lives as a dotfile in the user's home directory.
//! Unknown keys are carried through load and save untouched, so a newer
//! version's settings survive a round trip through an older one.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const CONFIG_FILE_NAME: &str = ".rom_librarian_config.json";

fn default_theme() -> String {
    "light".to_string()
}

fn default_check_updates() -> bool {
    true
}

/// Persisted user settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// UI theme name
    #[serde(default = "default_theme")]
    pub theme: String,
    /// Whether to check for a newer release on startup
    #[serde(default = "default_check_updates")]
    pub check_updates_on_startup: bool,
    /// Keys this version does not know about, preserved as-is
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            theme: default_theme(),
            check_updates_on_startup: default_check_updates(),
            extra: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Default config location in the user's home directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(CONFIG_FILE_NAME))
    }

    /// Load the config from disk.
    ///
    /// A missing or unreadable file yields defaults; settings must never
    /// keep the application from starting.
    pub async fn load(path: &Path) -> Self {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    debug!(path = %path.display(), "loaded config");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "config unreadable, using defaults");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Persist the config as pretty-printed JSON.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| Error::io(path, std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        tokio::fs::write(path, contents)
            .await
            .map_err(|e| Error::io(path, e))
    }
}
