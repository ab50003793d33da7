//! Materialize command: write every object under a prefix into a directory

use crate::cli::MaterializeArgs;
use crate::output;
use anyhow::Result;
use std::process::ExitCode;
use unseal_engine::Engine;

pub async fn run(args: MaterializeArgs, engine: &Engine) -> Result<ExitCode> {
    let written = engine
        .materialize_prefix(&args.location, &args.prefix, &args.dir)
        .await?;

    if written.is_empty() {
        output::warning(&format!(
            "No objects in {} matched prefix '{}'",
            args.location, args.prefix
        ));
        return Ok(ExitCode::SUCCESS);
    }

    output::success(&format!(
        "Wrote {} secret(s) to {}",
        written.len(),
        args.dir.display()
    ));
    for path in &written {
        output::kv("file", &path.display().to_string());
    }
    Ok(ExitCode::SUCCESS)
}
