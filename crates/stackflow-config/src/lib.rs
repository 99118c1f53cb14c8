pub mod error;

pub use error::*;

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable naming the config file directly
pub const CONFIG_ENV: &str = "STACKFLOW_CONFIG";

const CANDIDATES: [&str; 3] = ["stackflow.local.yml", "stackflow.yml", ".stackflow/config.yml"];

/// Locate the stackflow config file.
///
/// Search order:
/// 1. `STACKFLOW_CONFIG` (must exist when set)
/// 2. current directory: `stackflow.local.yml`, `stackflow.yml`, `.stackflow/config.yml`
/// 3. `~/.config/stackflow/config.yml` (global)
///
/// Returns `None` when no file exists; callers fall back to defaults.
pub fn find_config_file() -> Result<Option<PathBuf>> {
    if let Ok(config_path) = std::env::var(CONFIG_ENV) {
        let path = PathBuf::from(config_path);
        if !path.exists() {
            return Err(ConfigError::ConfigFileMissing(path));
        }
        return Ok(Some(path));
    }

    let current_dir = std::env::current_dir()?;
    for candidate in CANDIDATES {
        let path = current_dir.join(candidate);
        if path.exists() {
            return Ok(Some(path));
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global = config_dir.join("stackflow").join("config.yml");
        if global.exists() {
            return Ok(Some(global));
        }
    }

    Ok(None)
}

/// Settings shared by every command; CLI flags take precedence
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Environment id used when `--env` is not given
    pub environment: String,
    /// Catalog file listing products and their stacks
    pub catalog: Option<PathBuf>,
    /// Directory holding deployment state
    pub state_dir: PathBuf,
    pub continue_on_error: bool,
    pub retry_backoff_ms: u64,
    /// `unix://`, `tcp://` or `http://` endpoint; local defaults when unset
    pub docker_host: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            environment: "default".to_string(),
            catalog: None,
            state_dir: PathBuf::from(".stackflow"),
            continue_on_error: false,
            retry_backoff_ms: 500,
            docker_host: None,
        }
    }
}

impl Settings {
    /// Parse a config file. Relative paths in it resolve against the
    /// file's directory.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut settings: Settings = if content.trim().is_empty() {
            Settings::default()
        } else {
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Invalid {
                path: path.to_path_buf(),
                source,
            })?
        };

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        if let Some(catalog) = &settings.catalog
            && catalog.is_relative()
        {
            settings.catalog = Some(base.join(catalog));
        }
        if settings.state_dir.is_relative() && path.ends_with(".stackflow/config.yml") {
            // `.stackflow/config.yml` lives inside the project; anchor at the project root
            if let Some(root) = base.parent() {
                settings.state_dir = root.join(&settings.state_dir);
            }
        } else if settings.state_dir.is_relative() {
            settings.state_dir = base.join(&settings.state_dir);
        }

        debug!(path = %path.display(), "Loaded config");
        Ok(settings)
    }

    /// Explicit file, else the discovered one, else defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => find_config_file()?,
        };
        match path {
            Some(path) => Self::from_file(&path),
            None => {
                debug!("No config file found; using defaults");
                Ok(Self::default())
            }
        }
    }
}
