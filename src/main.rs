use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use wa_edge::config::Config;
use wa_edge::gateway::{self, LoggingHandler};
use wa_edge::util::mask_phone;

/// Webhook ingestion edge for the WhatsApp Cloud API.
#[derive(Parser, Debug)]
#[command(name = "wa-edge", version, about, long_about = None)]
struct Cli {
    /// Path to config.toml (default: platform config directory)
    #[arg(long, short, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the webhook gateway
    Serve {
        /// Override gateway.host
        #[arg(long)]
        host: Option<String>,
        /// Override gateway.port
        #[arg(long, short)]
        port: Option<u16>,
    },
    /// Load and validate the configuration, then exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("wa_edge=info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.gateway.host = host;
            }
            if let Some(port) = port {
                config.gateway.port = port;
            }
            gateway::run_gateway(config, Arc::new(LoggingHandler)).await
        }
        Commands::CheckConfig => {
            config.validate()?;
            println!("Config OK ({})", config.config_path.display());
            println!(
                "  phone_number_id: {}",
                mask_phone(&config.whatsapp.phone_number_id)
            );
            println!(
                "  signature: {}",
                if config.whatsapp.allow_unsigned {
                    "disabled (allow_unsigned)"
                } else {
                    "required"
                }
            );
            println!(
                "  rate_limit: {} req / {} ms, blacklist after {} violations",
                config.rate_limit.max_requests,
                config.rate_limit.window_ms,
                config.rate_limit.blacklist_threshold
            );
            println!("  listen: {}:{}", config.gateway.host, config.gateway.port);
            Ok(())
        }
    }
}
