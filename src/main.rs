use clap::Parser;

use opsdeck::cli::{self, Cli, Commands};
use opsdeck::config::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Previewing a cron expression needs neither configuration files nor logging
    if let Some(Commands::Cron { .. }) = cli.command {
        cli::execute_command(&cli, Settings::default()).await?;
        return Ok(());
    }

    let settings = cli::load_and_merge_config(&cli)?;
    let _log_handle = cli::init_logger_from_settings(&settings)?;

    tracing::debug!(version = opsdeck::pkg_version(), "Configuration loaded");

    if let Err(e) = cli::execute_command(&cli, settings).await {
        tracing::error!(error = %e, "Command failed");
        return Err(e.into());
    }

    Ok(())
}
