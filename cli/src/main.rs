//! clipsync CLI - end-to-end encrypted clipboard sync through a relay.

mod commands;
mod ui;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clipsync_core::Config;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "clipsync")]
#[command(about = "End-to-end encrypted clipboard sync", long_about = None)]
struct Cli {
    /// Config file [default: ~/.config/clipboard-sync/config.toml]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Relay address (host:port or ws:// URL)
    #[arg(short, long, global = true)]
    relay: Option<String>,

    /// Private key of this device (PKCS#8 PEM)
    #[arg(short, long, global = true)]
    client_key: Option<PathBuf>,

    /// Public key file of a trusted peer; repeat for several peers
    #[arg(short, long = "peers-keys", global = true)]
    peers_keys: Vec<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync the clipboard with peers (default)
    Run,
    /// Run the relay server
    Relay {
        /// Address to listen on
        #[arg(short, long)]
        listen: Option<String>,
    },
    /// Show this device's peer id and public key
    Info {
        /// Also print the public key as a QR code for the mobile app
        #[arg(long)]
        qr: bool,
    },
    /// Replace this device's key pair
    RegenerateKey,
    /// Print the peer id of a public key file
    PeerId {
        /// PEM or base64 public key
        file: PathBuf,
    },
}

impl Cli {
    /// File settings with command-line flags applied on top
    fn settings(&self) -> anyhow::Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;
        if let Some(relay) = &self.relay {
            config.relay = relay.clone();
        }
        if let Some(client_key) = &self.client_key {
            config.client_key = client_key.clone();
        }
        if !self.peers_keys.is_empty() {
            config.peers_keys = self.peers_keys.clone();
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            // Also matches the clipsync_core target
            EnvFilter::from_default_env().add_directive("clipsync=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.settings()?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => commands::run_sync(config).await?,
        Commands::Relay { listen } => {
            commands::run_relay(listen.unwrap_or(config.listen)).await?
        }
        Commands::Info { qr } => commands::show_info(&config, qr)?,
        Commands::RegenerateKey => commands::regenerate_key(&config)?,
        Commands::PeerId { file } => commands::print_peer_id(&file)?,
    }

    Ok(())
}
