//! # unseal-core
//!
//! Core library for unseal providing:
//! - Engine configuration types and the layered config loader
//! - Core error types
//! - Retry execution engine with jittered backoff

pub mod config;
pub mod error;
pub mod retry;
pub mod types;

pub use config::ConfigLoader;
pub use error::{Error, Result};
pub use types::{EngineConfig, KeyConfig, RetryPolicy, RetryStrategy, StoreConfig};
