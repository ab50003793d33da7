//! Command implementations

pub mod access;
pub mod check;
pub mod exec;
pub mod list;
pub mod materialize;

use crate::cli::{Cli, Commands, EngineArgs};
use anyhow::Result;
use std::path::Path;
use std::process::ExitCode;
use unseal_core::{ConfigLoader, EngineConfig};
use unseal_engine::Engine;

/// Build the engine from config and flags, then dispatch
pub async fn run(cli: Cli) -> Result<ExitCode> {
    let config = load_config(cli.config.as_deref(), &cli.engine)?;
    let engine = Engine::from_config(config).await?;

    let token = engine.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling resolution");
            token.cancel();
        }
    });

    match cli.command {
        Commands::Exec(args) => exec::run(args, &engine).await,
        Commands::Access(args) => access::run(args, &engine).await,
        Commands::Check(args) => check::run(args, &engine).await,
        Commands::List(args) => list::run(args, &engine).await,
        Commands::Materialize(args) => materialize::run(args, &engine).await,
    }
}

/// Load the layered configuration and apply CLI flag overrides last
fn load_config(path: Option<&Path>, flags: &EngineArgs) -> Result<EngineConfig> {
    let loader = match path {
        Some(path) => ConfigLoader::with_file(path),
        None => ConfigLoader::new(),
    };
    let mut config = loader.load()?;

    if let Some(n) = flags.max_concurrency {
        config.max_concurrency = n;
    }
    if let Some(ms) = flags.timeout_ms {
        config.timeout_ms = ms;
    }
    if flags.force_refresh {
        config.force_refresh = true;
    }

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn config_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_flags_override_file() {
        let file = config_file("max-concurrency: 4\ntimeout-ms: 2000\n");
        let flags = EngineArgs {
            max_concurrency: Some(16),
            timeout_ms: None,
            force_refresh: true,
        };

        let config = load_config(Some(file.path()), &flags).unwrap();
        assert_eq!(config.max_concurrency, 16);
        assert_eq!(config.timeout_ms, 2000);
        assert!(config.force_refresh);
    }

    #[test]
    fn test_zero_concurrency_flag_rejected() {
        let file = config_file("");
        let flags = EngineArgs {
            max_concurrency: Some(0),
            ..EngineArgs::default()
        };

        let err = load_config(Some(file.path()), &flags).unwrap_err();
        assert!(err.downcast_ref::<unseal_core::Error>().is_some());
    }

    #[test]
    fn test_missing_explicit_config_is_error() {
        let err = load_config(
            Some(Path::new("/nonexistent/unseal.yaml")),
            &EngineArgs::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<unseal_core::Error>(),
            Some(unseal_core::Error::ConfigNotFound { .. })
        ));
        assert!(err.to_string().contains("does not exist"));
    }
}
