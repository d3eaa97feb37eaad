#![forbid(unsafe_code)]
//! Mines a single block against the configured database.

use clap::Parser;
use mycoin::config::{load_config, DEFAULT_CONFIG_PATH};
use mycoin::node::Node;
use std::time::Instant;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Wallet address that receives the block reward
    address: String,
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    let node = Node::from_config(config)?;

    println!(
        "Mining block {} at difficulty {}...",
        node.ledger.height().await + 1,
        node.ledger.difficulty()
    );

    let start_time = Instant::now();
    let block = node.ledger.mine_block(&cli.address).await?;
    let elapsed = start_time.elapsed();

    let reward = block
        .transactions
        .iter()
        .find(|tx| tx.is_reward())
        .map(|tx| tx.amount.to_string())
        .unwrap_or_default();
    let balance = node.wallets.wallet_stats(&cli.address)?.balance;

    println!("Block mined in {:.2}s", elapsed.as_secs_f64());
    println!("  index:         {}", block.index);
    println!("  hash:          {}", block.hash);
    println!("  previous hash: {}", block.previous_hash);
    println!("  nonce:         {}", block.nonce);
    println!("  transactions:  {}", block.transactions.len());
    println!("  reward:        {}", reward);
    println!("  miner balance: {}", balance);

    Ok(())
}
