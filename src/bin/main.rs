use anyhow::Result;
use clap::Parser;
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;

use tool_broker::{BrokerConfig, create_broker, serve_consumer_http, serve_ws};

#[derive(Parser)]
#[command(name = "tool-broker")]
#[command(about = "Broker bridging WebSocket tool providers to MCP consumers")]
struct Cli {
    /// Port for the provider WebSocket channel
    #[arg(long)]
    ws_port: Option<u16>,
    /// Port for the consumer/dashboard HTTP surface
    #[arg(long)]
    http_port: Option<u16>,
    /// Upstream generative-model base URL
    #[arg(long)]
    ollama_url: Option<String>,
    /// Default model for chat proxying and ask_ai
    #[arg(long)]
    ollama_model: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("tool_broker=info".parse()?)
                .add_directive("rmcp=warn".parse()?),
        )
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();

    // Environment first, explicit flags on top.
    let mut config = BrokerConfig::from_env();
    if let Some(port) = cli.ws_port {
        config.ws_port = port;
    }
    if let Some(port) = cli.http_port {
        config.http_port = port;
    }
    if let Some(url) = cli.ollama_url {
        config.ollama_api_url = url;
    }
    if let Some(model) = cli.ollama_model {
        config.ollama_model = model;
    }

    info!(
        ws_port = config.ws_port,
        http_port = config.http_port,
        upstream = %config.ollama_api_url,
        model = %config.ollama_model,
        "starting tool broker"
    );

    let state = create_broker(config.clone())?;

    let ws_bind = format!("0.0.0.0:{}", config.ws_port);
    let http_bind = format!("0.0.0.0:{}", config.http_port);

    tokio::try_join!(
        serve_ws(state.clone(), &ws_bind),
        serve_consumer_http(state.clone(), &http_bind),
    )?;

    Ok(())
}
