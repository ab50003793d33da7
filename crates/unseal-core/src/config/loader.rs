//! Layered configuration loader
//!
//! Loads the engine configuration from multiple sources with the following
//! precedence (low to high):
//! 1. Built-in defaults
//! 2. Config file (explicit path, or `$XDG_CONFIG_HOME/unseal/config.yaml`)
//! 3. Environment variables (UNSEAL_* prefix)
//! 4. CLI flags (handled by caller)

use crate::error::{Error, Result};
use crate::types::{EngineConfig, StoreConfig};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Name of the config file inside the config directory
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Configuration loader
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Explicit config file; a missing explicit file is an error
    explicit_path: Option<PathBuf>,

    /// Directory searched when no explicit file is given
    config_dir: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a loader that looks in the standard config directory
    pub fn new() -> Self {
        Self {
            explicit_path: None,
            config_dir: dirs::config_dir().map(|d| d.join("unseal")),
        }
    }

    /// Create a loader reading a specific file
    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Self {
            explicit_path: Some(path.into()),
            config_dir: None,
        }
    }

    /// Create a loader with a custom config directory
    pub fn with_dir(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            explicit_path: None,
            config_dir: Some(config_dir.into()),
        }
    }

    /// The file this loader would read, if any
    pub fn config_path(&self) -> Option<PathBuf> {
        self.explicit_path
            .clone()
            .or_else(|| self.config_dir.as_ref().map(|d| d.join(CONFIG_FILE_NAME)))
    }

    /// Load the configuration, apply environment overrides and validate
    pub fn load(&self) -> Result<EngineConfig> {
        let mut config = match &self.explicit_path {
            Some(path) => Self::load_yaml_file(path)?,
            None => match self.config_path() {
                Some(path) if path.exists() => Self::load_yaml_file(&path)?,
                _ => {
                    tracing::debug!("No config file found, using defaults");
                    EngineConfig::default()
                }
            },
        };

        Self::apply_env_overrides(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML file and parse it
    fn load_yaml_file(path: &Path) -> Result<EngineConfig> {
        let content = fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                Error::config_not_found(path)
            } else {
                Error::Read {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        tracing::debug!("Loading config from {}", path.display());

        // An empty file is treated as "all defaults"
        if content.trim().is_empty() {
            return Ok(EngineConfig::default());
        }

        serde_yaml_ng::from_str(&content).map_err(|e| {
            Error::invalid_config(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Apply UNSEAL_* environment variable overrides
    fn apply_env_overrides(config: &mut EngineConfig) -> Result<()> {
        if let Some(val) = parse_env::<usize>("UNSEAL_MAX_CONCURRENCY")? {
            config.max_concurrency = val;
        }

        if let Some(val) = parse_env::<u64>("UNSEAL_TIMEOUT_MS")? {
            config.timeout_ms = val;
        }

        if let Ok(val) = env::var("UNSEAL_FORCE_REFRESH") {
            config.force_refresh = parse_bool(&val);
        }

        if let Some(val) = parse_env::<u32>("UNSEAL_RETRY_MAX_ATTEMPTS")? {
            config.retry.max_attempts = val;
        }

        // Key material
        if let Ok(val) = env::var("UNSEAL_KEY_FILE") {
            config.keys.key_file = Some(PathBuf::from(val));
        }

        if let Ok(val) = env::var("UNSEAL_KEY_ENV") {
            config.keys.key_env = Some(val);
        }

        // Store selection: a store root switches to the file backend
        if let Ok(val) = env::var("UNSEAL_STORE_ROOT") {
            config.store = StoreConfig::File {
                root: PathBuf::from(val),
            };
        }

        let region = env::var("UNSEAL_S3_REGION").ok();
        let endpoint = env::var("UNSEAL_S3_ENDPOINT").ok();
        if region.is_some() || endpoint.is_some() {
            let (mut cur_region, mut cur_endpoint) = match &config.store {
                StoreConfig::S3 { region, endpoint } => (region.clone(), endpoint.clone()),
                StoreConfig::File { .. } => ("us-east-1".to_string(), None),
            };
            if let Some(r) = region {
                cur_region = r;
            }
            if endpoint.is_some() {
                cur_endpoint = endpoint;
            }
            config.store = StoreConfig::S3 {
                region: cur_region,
                endpoint: cur_endpoint,
            };
        }

        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_env<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(val) => val
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::invalid_config(format!("{} must be a valid number", name))),
        Err(_) => Ok(None),
    }
}

fn parse_bool(val: &str) -> bool {
    matches!(
        val.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
