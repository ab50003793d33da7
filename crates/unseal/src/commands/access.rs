//! Access command: resolve one reference

use crate::cli::AccessArgs;
use anyhow::{Context, Result};
use std::io::Write;
use std::process::ExitCode;
use unseal_engine::{Engine, ResolvedValue};

pub async fn run(args: AccessArgs, engine: &Engine) -> Result<ExitCode> {
    match engine.resolve_reference(&args.reference).await? {
        ResolvedValue::Plaintext(secret) => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(secret.plaintext())
                .context("Failed to write secret to stdout")?;
            if args.newline {
                stdout.write_all(b"\n")?;
            }
            stdout.flush()?;
        }
        ResolvedValue::File(path) => println!("{}", path.display()),
    }
    Ok(ExitCode::SUCCESS)
}
