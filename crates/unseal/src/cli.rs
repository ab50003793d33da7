//! CLI argument definitions

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "unseal")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to engine configuration file
    #[arg(short, long, global = true, env = "UNSEAL_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub engine: EngineArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Overrides applied on top of the loaded configuration
#[derive(Args, Debug, Default)]
pub struct EngineArgs {
    /// Maximum references resolved concurrently
    #[arg(long, global = true, value_name = "N")]
    pub max_concurrency: Option<usize>,

    /// Timeout for each store and key-management call
    #[arg(long, global = true, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Bypass the resolution cache
    #[arg(long, global = true)]
    pub force_refresh: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Resolve references in the environment and run a command with the result
    Exec(ExecArgs),

    /// Resolve a single reference and print its value
    Access(AccessArgs),

    /// Verify every reference in the environment resolves, without injecting
    Check(CheckArgs),

    /// List objects stored in a location
    #[command(alias = "ls")]
    List(ListArgs),

    /// Write every object under a prefix into a directory
    Materialize(MaterializeArgs),
}

#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Command and arguments, usually after `--`
    #[arg(
        required = true,
        num_args = 1..,
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "COMMAND"
    )]
    pub command: Vec<String>,
}

#[derive(Args, Debug)]
pub struct AccessArgs {
    /// Reference, e.g. secret://proj/api-key
    pub reference: String,

    /// Append a newline after the value
    #[arg(short, long)]
    pub newline: bool,
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Location (project or bucket) to list
    pub location: String,

    /// Only list objects whose name starts with this prefix
    #[arg(short, long, default_value = "")]
    pub prefix: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct MaterializeArgs {
    /// Location (project or bucket) to read from
    pub location: String,

    /// Existing directory to write into
    #[arg(short, long)]
    pub dir: PathBuf,

    /// Only materialize objects whose name starts with this prefix
    #[arg(short, long, default_value = "")]
    pub prefix: String,
}
