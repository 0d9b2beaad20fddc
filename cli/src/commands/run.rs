use anyhow::{bail, Result};
use impervious::{EnvCredentials, RunConfig, RunCoordinator, RunOutcome};
use tracing::info;

pub fn run(_cli: &crate::cli::Cli, args: &crate::cli::RunArgs) -> Result<()> {
    let config = RunConfig::from_file(&args.config)?;
    info!("Loaded configuration from {} ({} sources)", args.config.display(), config.sources.len());
    let mut coordinator = RunCoordinator::from_config(&config, &EnvCredentials)?
        .force(config.force || args.force);

    let report = coordinator.run();
    println!("{}", report.summary());

    if let RunOutcome::Failed { kind, .. } = &report.outcome {
        bail!("run failed with a {kind} error");
    }
    Ok(())
}
