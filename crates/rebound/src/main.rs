//! `rebound` binary entrypoint.

use clap::Parser;
use rebound::serve;
use rebound_config::load_config;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "rebound",
    version,
    about = "Retrying single-hop forwarding proxy for OpenAI-compatible chat-completion APIs"
)]
struct Cli {
    /// Path to the default config file.
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Override the configured bind host.
    #[arg(long)]
    host: Option<String>,

    /// Override the configured bind port.
    #[arg(long)]
    port: Option<u16>,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Respect `RUST_LOG` if set; otherwise default to proxy-friendly info.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    let host = cli
        .host
        .unwrap_or_else(|| config.server().host.clone());
    let port = cli.port.unwrap_or(config.server().port);

    info!(config = %cli.config.display(), "starting rebound proxy");
    serve(config, host, port).await
}
