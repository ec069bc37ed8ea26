use anyhow::Result;
use clap::Parser;

use logsentinel_core::config::LogSentinelConfig;
use logsentinel_daemon::cli::DaemonCli;
use logsentinel_daemon::logging;
use logsentinel_daemon::orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    let mut config = LogSentinelConfig::from_file(&cli.config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load config {}: {}", cli.config.display(), e))?;
    config.apply_env_overrides();

    // CLI flags win over file and environment
    if let Some(level) = cli.log_level {
        config.general.log_level = level;
    }
    if let Some(format) = cli.log_format {
        config.general.log_format = format;
    }
    if let Some(pid_file) = cli.pid_file {
        config.general.pid_file = pid_file;
    }

    if cli.validate {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("configuration is invalid: {}", e))?;
        println!("configuration OK: {}", cli.config.display());
        return Ok(());
    }

    logging::init_tracing(&config.general)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        role = %cli.role,
        config = %cli.config.display(),
        "logsentinel-daemon starting"
    );

    let mut orchestrator = Orchestrator::build_from_config(config, cli.role).await?;
    orchestrator.run().await?;

    tracing::info!("logsentinel-daemon shut down");
    Ok(())
}
