use std::path::PathBuf;

/// Impervious surface pipeline CLI (argument schema only)
#[derive(clap::Parser, Debug)]
#[command(name = "impervious", version, about, propagate_version = true)]
pub struct Cli {
    /// Increase output verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Merge, enrich and publish if any source changed
    Run(RunArgs),

    /// Fingerprint every source and report what changed, writing nothing
    Check(CheckArgs),
}

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Run configuration (TOML)
    #[arg(short, long, value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,

    /// Recompute and publish even when no source changed
    #[arg(long)]
    pub force: bool,
}

#[derive(clap::Args, Debug)]
pub struct CheckArgs {
    /// Run configuration (TOML)
    #[arg(short, long, value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,
}
