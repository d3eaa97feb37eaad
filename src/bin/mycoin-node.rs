#![forbid(unsafe_code)]
//! MyCoin ledger node: REST API plus the background miner.

use clap::Parser;
use mycoin::config::DEFAULT_CONFIG_PATH;
use mycoin::node::Node;
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,
    /// Overrides `server.port` and the PORT variable
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let node = Arc::new(Node::init(&cli.config).await?);
    let port = cli.port.unwrap_or(node.config.server.port);

    node.run(port).await
}
