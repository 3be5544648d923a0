// ABOUTME: Entry point for secretary-chat
// ABOUTME: Handles CLI args, config loading, logging setup, and subcommand dispatch

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use secretary_chat::cli;
use secretary_client::{ChatClient, ClientConfig};
use secretary_log::LogFormat;

#[derive(Parser)]
#[command(name = "secretary-chat")]
#[command(about = "Terminal chat interface for the secretary agent service")]
struct Args {
    /// Config file (default: ~/.config/ai-secretary/chat.toml)
    #[arg(short, long, env = "SECRETARY_CONFIG")]
    config: Option<PathBuf>,

    /// Agent API base URL, e.g. http://localhost:8000/api/v1
    #[arg(short, long, env = "SECRETARY_GATEWAY_URL")]
    gateway: Option<String>,

    /// Tenant id attached to every message
    #[arg(short, long, env = "SECRETARY_TENANT")]
    tenant: Option<String>,

    /// Reuse an existing session id instead of starting a new one
    #[arg(long)]
    session: Option<String>,

    /// Log format for stderr logging (text or json)
    #[arg(long, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Send one message, stream the reply, and exit
    Send {
        /// The message to send
        message: String,
        /// Print the final session snapshot as JSON instead of streaming text
        #[arg(long)]
        json: bool,
    },
    /// Interactive chat (default)
    Repl,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let command = args.command.unwrap_or(Command::Repl);

    match &command {
        Command::Repl => {
            secretary_log::init_file("secretary-chat");
        }
        Command::Send { .. } => secretary_log::init_for("secretary_chat", args.log_format),
    }

    let mut config = ClientConfig::load(args.config).context("Failed to load config")?;
    if let Some(url) = args.gateway {
        config = config.with_gateway_url(url);
    }
    if let Some(tenant) = args.tenant {
        config = config.with_tenant(tenant);
    }
    if let Some(session) = args.session {
        config = config.with_session_id(session);
    }

    let client = ChatClient::new(&config).context("Invalid client configuration")?;
    tracing::info!(session_id = client.session_id(), endpoint = %client.endpoint(), "starting");

    match command {
        Command::Send { message, json } => cli::send::run(&client, &message, json).await,
        Command::Repl => cli::repl::run(&client).await,
    }
}
