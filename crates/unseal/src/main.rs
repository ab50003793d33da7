//! Unseal CLI
//!
//! Resolves `secret://` references found in the environment and hands the
//! plaintext to a child process, a file or stdout.

mod cli;
mod commands;
mod output;

use clap::Parser;
use cli::Cli;
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit status for caller misuse: bad flags, malformed references, bad config
const EXIT_MISUSE: u8 = 61;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // --help and --version come through here and are not failures
            let code = if err.use_stderr() { EXIT_MISUSE } else { 0 };
            let _ = err.print();
            return ExitCode::from(code);
        }
    };

    init_tracing(cli.verbose, cli.quiet);

    match commands::run(cli).await {
        Ok(code) => code,
        Err(err) => {
            output::error(&format!("{:#}", err));
            ExitCode::from(exit_code_for(&err))
        }
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(err) = err.downcast_ref::<unseal_engine::Error>() {
        return match err {
            unseal_engine::Error::Config(_) => EXIT_MISUSE,
            e if e.is_malformed() => EXIT_MISUSE,
            _ => 1,
        };
    }
    if err.downcast_ref::<unseal_core::Error>().is_some() {
        return EXIT_MISUSE;
    }
    1
}
