//! Exec command: resolve the environment, then run a command with it

use crate::cli::ExecArgs;
use anyhow::{Context, Result};
use std::process::{Command, ExitCode};
use unseal_engine::{BindingSet, Engine};

pub async fn run(args: ExecArgs, engine: &Engine) -> Result<ExitCode> {
    let (program, rest) = args
        .command
        .split_first()
        .context("No command given")?;

    let bindings = BindingSet::from_env()?;
    if !bindings.has_references() {
        tracing::debug!("No secret references in environment");
    }

    // Our own environment is left alone; the child gets the resolved copy
    let resolved = engine.resolve(&bindings).await?;
    tracing::debug!(program = %program, "Starting command");

    let mut command = Command::new(program);
    command.args(rest).envs(resolved.into_pairs());
    launch(command, program)
}

/// Replace this process with the command
#[cfg(unix)]
fn launch(mut command: Command, program: &str) -> Result<ExitCode> {
    use std::os::unix::process::CommandExt;

    // exec only returns on failure
    let err = command.exec();
    Err(err).with_context(|| format!("Failed to execute {}", program))
}

/// Run the command to completion and pass its status through
#[cfg(not(unix))]
fn launch(mut command: Command, program: &str) -> Result<ExitCode> {
    let status = command
        .status()
        .with_context(|| format!("Failed to execute {}", program))?;
    let code = status.code().unwrap_or(1);
    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}
