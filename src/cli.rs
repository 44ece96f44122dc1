use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::config::{Config, DEFAULT_CONFIG_FILE};
use crate::dispatcher::{ChatEvent, Dispatcher};
use crate::host::HostServer;
use crate::protocol::HistoryTurn;

/// Wand bridge - run the assistant worker for a desktop host
#[derive(Parser, Debug)]
#[command(name = "wand-bridge")]
#[command(version)]
#[command(about = "Bridge between a desktop host and the assistant worker process")]
#[command(long_about = "wand-bridge launches the assistant worker once per request, streams chat
output back to the caller and relays one-shot requests (models, tools).

Without a subcommand it serves the host protocol: JSON commands on stdin,
JSON events and replies on stdout, one document per line.

Quick start:
  1. Run 'wand-bridge init' to generate a config file
  2. Edit .wand-bridge.toml to point at the worker and your provider
  3. Run 'wand-bridge chat \"hello\"' to check the setup")]
pub struct Cli {
    /// Path to config file (defaults to .wand-bridge.toml)
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Serve the host protocol over stdin/stdout (default)
    Serve,
    /// Send one chat message and stream the reply to stdout
    Chat {
        /// The message to send
        message: String,
        /// JSON file with earlier turns: [{"role": "user", "content": "..."}]
        #[arg(long)]
        history: Option<PathBuf>,
    },
    /// List the models available to the configured provider
    Models,
    /// List the tools known to the worker
    Tools,
    /// Save a tool definition
    SaveTool {
        /// Tool name
        #[arg(long)]
        name: String,
        /// What the tool does
        #[arg(long)]
        description: String,
        /// File containing the tool's code
        #[arg(long)]
        code: PathBuf,
    },
    /// Remove temporary tools
    ClearTempTools,
    /// Create a config file with defaults
    Init,
}

pub fn init_config(config_path: &str) -> anyhow::Result<()> {
    if Path::new(config_path).exists() {
        println!("Config file '{}' already exists.", config_path);
        return Ok(());
    }

    let config = Config::default();
    config
        .save(config_path)
        .with_context(|| format!("Failed to write config to '{}'", config_path))?;

    // Append commented-out options so they are discoverable
    use std::fs::OpenOptions;
    use std::io::Write;
    let mut file = OpenOptions::new()
        .append(true)
        .open(config_path)
        .with_context(|| format!("Failed to append to '{}'", config_path))?;
    writeln!(file, "\n# Log filter used when WAND_BRIDGE_LOG is unset")?;
    writeln!(file, "# log_level = \"info\"")?;
    writeln!(file, "\n# Worker layout: \"development\" or \"packaged\"")?;
    writeln!(file, "# [worker]")?;
    writeln!(file, "# layout = \"development\"")?;
    writeln!(file, "# project_root = \"/path/to/checkout\"")?;
    writeln!(file, "\n# Provider settings sent to the worker")?;
    writeln!(file, "# [provider]")?;
    writeln!(file, "# apiKey = \"sk-...\"")?;
    writeln!(file, "# baseUrl = \"https://api.openai.com/v1\"")?;
    writeln!(file, "# model = \"gpt-4o\"")?;

    println!("Created {}", config_path);
    println!("\nNext steps:");
    println!("  1. Edit {} to configure the worker and provider", config_path);
    println!("  2. Run 'wand-bridge models' to check the setup");

    Ok(())
}

/// Run a subcommand against a loaded config. `Init` is handled before the
/// config is loaded and is rejected here.
pub async fn run_command(command: Commands, config: &Config) -> anyhow::Result<()> {
    let dispatcher = Dispatcher::new(config.worker_command()?);

    match command {
        Commands::Serve => {
            info!("serving host protocol on stdio");
            HostServer::new(dispatcher, tokio::io::stdout())
                .run(tokio::io::stdin())
                .await
        }
        Commands::Chat { message, history } => {
            let history = match history {
                Some(path) => load_history(&path)?,
                None => Vec::new(),
            };
            run_chat(dispatcher, message, history, config).await
        }
        Commands::Models => {
            let models = dispatcher.fetch_models(config.provider.clone()).await?;
            print_json(&models)
        }
        Commands::Tools => {
            let tools = dispatcher.get_tools(config.provider.clone()).await?;
            print_json(&tools)
        }
        Commands::SaveTool {
            name,
            description,
            code,
        } => {
            let code = std::fs::read_to_string(&code)
                .with_context(|| format!("Failed to read tool code from {:?}", code))?;
            let reply = dispatcher.save_tool(name, code, description).await?;
            print_json(&reply)
        }
        Commands::ClearTempTools => {
            let reply = dispatcher.clear_temp_tools().await?;
            print_json(&reply)
        }
        Commands::Init => Err(anyhow!("'init' does not take a loaded config")),
    }
}

pub fn load_history(path: &Path) -> anyhow::Result<Vec<HistoryTurn>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read history at {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse history at {:?}", path))
}

/// Stream one chat to stdout. Ctrl-C stops the worker and ends the chat.
async fn run_chat(
    mut dispatcher: Dispatcher,
    message: String,
    history: Vec<HistoryTurn>,
    config: &Config,
) -> anyhow::Result<()> {
    dispatcher
        .start_chat(message, history, config.provider.clone())
        .await;

    let mut stdout = tokio::io::stdout();
    let mut failure: Option<String> = None;
    let mut stopping = false;

    loop {
        tokio::select! {
            event = dispatcher.next_event() => match event {
                Some(ChatEvent::Chunk { text }) => {
                    stdout.write_all(text.as_bytes()).await?;
                    stdout.flush().await?;
                }
                Some(ChatEvent::Error { message }) => {
                    eprintln!("Error: {}", message);
                    failure = Some(message);
                }
                Some(ChatEvent::Done) | None => break,
            },
            _ = tokio::signal::ctrl_c(), if !stopping => {
                info!("interrupted, stopping chat");
                stopping = true;
                dispatcher.stop_chat().await;
            }
        }
    }

    stdout.write_all(b"\n").await?;
    stdout.flush().await?;

    match failure {
        Some(message) => Err(anyhow!("chat failed: {}", message)),
        None => Ok(()),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
