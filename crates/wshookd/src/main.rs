//! The wshookd CLI.
//!
//! - `wshookd serve` - Run the gateway
//! - `wshookd accept-key <KEY>` - Print the Sec-WebSocket-Accept value for a client key

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use wshookd::{Gateway, GatewayConfig, Overrides};

#[derive(Parser)]
#[command(name = "wshookd", version, about = "WebSocket-to-TCP gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept WebSocket clients and relay their messages to a TCP upstream
    Serve {
        /// Path to a wshookd.toml config file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Address to listen on (overrides the config file)
        #[arg(long)]
        listen: Option<String>,

        /// Upstream TCP address (overrides the config file)
        #[arg(long)]
        upstream: Option<String>,

        /// Send binary frames instead of text frames
        #[arg(long)]
        binary: bool,
    },
    /// Print the Sec-WebSocket-Accept value for a client key
    AcceptKey {
        /// The client's Sec-WebSocket-Key value
        key: String,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            listen,
            upstream,
            binary,
        } => {
            let overrides = Overrides {
                listen,
                upstream,
                binary,
            };
            let config = match GatewayConfig::load(config.as_deref(), overrides) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("error: {}", e);
                    process::exit(1);
                }
            };
            init_tracing(&config.log_filter);

            if let Err(e) = Gateway::bind(config).and_then(Gateway::serve) {
                tracing::error!(error = %e, "gateway stopped");
                process::exit(1);
            }
        }
        Commands::AcceptKey { key } => {
            println!("{}", wshook::compute_accept_key(key.trim()));
        }
    }
}

/// `RUST_LOG` wins over the configured filter.
fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
