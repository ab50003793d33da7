//! Configuration types for the resolution engine
//!
//! Every field carries a serde default so a partial YAML document (or none at
//! all) produces a usable configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EngineConfig {
    /// Maximum number of references resolved concurrently
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Timeout applied to every store and key-management call, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Bypass the resolution cache and re-fetch every reference
    #[serde(default)]
    pub force_refresh: bool,

    /// Permission bits applied to injected files
    #[serde(default = "default_file_mode")]
    pub file_mode: u32,

    /// Retry policy for transient failures
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Object store backend
    #[serde(default)]
    pub store: StoreConfig,

    /// Key-management configuration
    #[serde(default)]
    pub keys: KeyConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            timeout_ms: default_timeout_ms(),
            force_refresh: false,
            file_mode: default_file_mode(),
            retry: RetryPolicy::default(),
            store: StoreConfig::default(),
            keys: KeyConfig::default(),
        }
    }
}

fn default_max_concurrency() -> usize {
    8
}
fn default_timeout_ms() -> u64 {
    10_000 // 10 seconds
}
fn default_file_mode() -> u32 {
    0o600
}

impl EngineConfig {
    /// Per-call timeout as a Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Reject values the engine cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(Error::invalid_config("max-concurrency must be at least 1"));
        }
        if self.timeout_ms == 0 {
            return Err(Error::invalid_config("timeout-ms must be greater than 0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::invalid_config(
                "retry.max-attempts must be at least 1",
            ));
        }
        if self.file_mode & 0o077 != 0 {
            return Err(Error::invalid_config(format!(
                "file-mode {:o} grants group or other access; injected files must be owner-only",
                self.file_mode
            )));
        }
        if self.file_mode & 0o400 == 0 {
            return Err(Error::invalid_config(format!(
                "file-mode {:o} is not readable by the owner",
                self.file_mode
            )));
        }
        Ok(())
    }
}

/// Retry policy for an operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff strategy
    #[serde(default)]
    pub strategy: RetryStrategy,

    /// Multiplier for exponential backoff
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Delay before the second attempt, in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Upper bound for any single delay, in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            strategy: RetryStrategy::default(),
            backoff_multiplier: default_backoff_multiplier(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

fn default_max_attempts() -> u32 {
    4
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_initial_delay() -> u64 {
    200
}
fn default_max_delay() -> u64 {
    5000
}

/// Retry strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RetryStrategy {
    /// Retry immediately
    None,

    /// Fixed delay between retries
    FixedDelay,

    /// Exponential backoff (default)
    #[default]
    ExponentialBackoff,

    /// Linear backoff
    LinearBackoff,
}

/// Object store backend selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StoreConfig {
    /// Local directory tree, one subdirectory per store location
    File {
        /// Root directory of the store
        root: PathBuf,
    },
    /// S3 or an S3-compatible service; the store location is the bucket
    S3 {
        /// AWS region
        #[serde(default = "default_region")]
        region: String,
        /// Custom endpoint for S3-compatible services
        #[serde(default)]
        endpoint: Option<String>,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::S3 {
            region: default_region(),
            endpoint: None,
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// Where the key-management identities come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct KeyConfig {
    /// File holding one age identity per line
    #[serde(default = "default_key_file")]
    pub key_file: Option<PathBuf>,

    /// Environment variable holding identities (takes precedence over the file)
    #[serde(default)]
    pub key_env: Option<String>,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            key_file: default_key_file(),
            key_env: None,
        }
    }
}

fn default_key_file() -> Option<PathBuf> {
    Some(PathBuf::from("~/.config/unseal/identity.key"))
}
