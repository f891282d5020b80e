//! acrpc-cli - Command-line interface for acrpc
//!
//! Sends one request to a peer and prints the reply.

mod commands;

use acrpc_client::{Client, ClientConfig};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "acrpc-cli")]
#[command(about = "Command-line interface for AC/RPC peers")]
#[command(version)]
struct Cli {
    /// Peer address (host:port)
    #[arg(short, long, env = "ACRPC_ADDR")]
    server: Option<String>,

    /// Deadline for the whole call, in milliseconds
    #[arg(short = 't', long, env = "ACRPC_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    /// Client config file (YAML)
    #[arg(short, long, env = "ACRPC_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Send a request and print the buffered reply
    Call {
        /// Operation code
        #[arg(short, long)]
        op: u32,

        /// Request payload (or @file to read from file)
        #[arg(short, long)]
        payload: Option<String>,

        /// Treat payloads as JSON
        #[arg(long)]
        json: bool,

        /// Request content (or @file to read from file)
        #[arg(short = 'C', long)]
        content: Option<String>,
    },

    /// Stream a file as request content
    Put {
        /// Operation code
        #[arg(short, long)]
        op: u32,

        /// Request payload (or @file to read from file)
        #[arg(short, long)]
        payload: Option<String>,

        /// Treat payloads as JSON
        #[arg(long)]
        json: bool,

        /// File streamed as request content
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Send a request and stream the reply content to a file
    Get {
        /// Operation code
        #[arg(short, long)]
        op: u32,

        /// Request payload (or @file to read from file)
        #[arg(short, long)]
        payload: Option<String>,

        /// Treat payloads as JSON
        #[arg(long)]
        json: bool,

        /// Request content (or @file to read from file)
        #[arg(short = 'C', long)]
        content: Option<String>,

        /// Destination of the reply content (defaults to stdout)
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

impl Cli {
    fn client_config(&self) -> Result<ClientConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::load_from(path)?,
            None => ClientConfig::from_env(),
        };

        if let Some(ref server) = self.server {
            config.addr = server.clone();
        }
        if let Some(ms) = self.timeout_ms {
            config = config.with_timeout(Duration::from_millis(ms));
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match cli.client_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {}", "Invalid configuration".red(), e);
            std::process::exit(2);
        }
    };
    tracing::debug!("calling {} (timeout {:?})", config.addr, config.timeout());

    let client = Client::new(config);

    match commands::execute(&client, cli.command).await {
        Ok(status) => {
            eprintln!("{}", status);
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }

    Ok(())
}
