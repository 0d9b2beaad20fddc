use anyhow::Result;
use impervious::{EnvCredentials, RunConfig, RunCoordinator};

pub fn run(_cli: &crate::cli::Cli, args: &crate::cli::CheckArgs) -> Result<()> {
    let config = RunConfig::from_file(&args.config)?;
    let coordinator = RunCoordinator::from_config(&config, &EnvCredentials)?;

    for status in coordinator.check()? {
        println!(
            "{:<24} {:>8} features  {}  {}",
            status.name,
            status.features,
            status.fingerprint,
            if status.changed { "changed" } else { "unchanged" },
        );
    }
    Ok(())
}
