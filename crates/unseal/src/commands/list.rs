//! List command

use crate::cli::ListArgs;
use crate::output;
use anyhow::Result;
use std::process::ExitCode;
use unseal_engine::Engine;

pub async fn run(args: ListArgs, engine: &Engine) -> Result<ExitCode> {
    let names = engine.list(&args.location, &args.prefix).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&names)?);
        return Ok(ExitCode::SUCCESS);
    }

    if names.is_empty() {
        output::info(&format!("No objects in {}", args.location));
        return Ok(ExitCode::SUCCESS);
    }

    for name in &names {
        println!("{}", name);
    }
    Ok(ExitCode::SUCCESS)
}
