use clap::Parser;
use tracing_subscriber::EnvFilter;

use wand_bridge::cli::{Cli, Commands, init_config, run_command};
use wand_bridge::config::Config;

/// Environment variable holding the log filter
const LOG_ENV: &str = "WAND_BRIDGE_LOG";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Serve);

    if command == Commands::Init {
        return init_config(&cli.config);
    }

    let config = Config::load_or_default(&cli.config)?;
    init_logging(config.log_level.as_deref());

    run_command(command, &config).await
}

/// Logs go to stderr; stdout carries protocol output
fn init_logging(config_level: Option<&str>) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(config_level.unwrap_or("warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
