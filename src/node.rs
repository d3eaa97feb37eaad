use crate::amount::Amount;
use crate::blockchain::LedgerEngine;
use crate::config::{load_config, Config};
use crate::persistence::{Database, InMemoryStore, LedgerStore};
use crate::transfer::TransferEngine;
use crate::wallet::{HdKeyProvider, WalletLocks, WalletService};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeState {
    Booting,
    Ready,
    /// Running on the in-memory fallback store.
    Degraded,
    ShuttingDown,
}

pub struct Node {
    pub config: Config,
    pub store: Arc<dyn LedgerStore>,
    pub ledger: Arc<LedgerEngine>,
    pub wallets: Arc<WalletService>,
    pub transfers: Arc<TransferEngine>,
    pub state: Arc<RwLock<NodeState>>,
    persistent: bool,
}

impl Node {
    /// Loads config from `config_path` and wires the engines together.
    pub async fn init(config_path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let config = load_config(config_path)?;

        let _ = tracing_subscriber::fmt().try_init();
        info!(config = config_path, "Starting MyCoin node");

        Self::from_config(config)
    }

    pub fn from_config(config: Config) -> Result<Self, Box<dyn std::error::Error>> {
        let (store, persistent) = Self::open_store(&config.database.path);
        Self::with_store(config, store, persistent)
    }

    fn open_store(path: &str) -> (Arc<dyn LedgerStore>, bool) {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = fs::create_dir_all(parent) {
                    warn!("Failed to create data dir {:?}: {}", parent, e);
                }
            }
        }

        match Database::open(path) {
            Ok(db) => (Arc::new(db), true),
            Err(e) => {
                warn!("Failed to open DB at {}: {}. Falling back to in-memory store.", path, e);
                (Arc::new(InMemoryStore::new()), false)
            }
        }
    }

    pub fn with_store(
        config: Config,
        store: Arc<dyn LedgerStore>,
        persistent: bool,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        config.validate()?;

        let locks = Arc::new(WalletLocks::new());
        let ledger = Arc::new(LedgerEngine::open(
            store.clone(),
            locks.clone(),
            config.mining.engine_settings(),
        )?);
        let wallets = Arc::new(WalletService::new(
            store.clone(),
            Arc::new(HdKeyProvider),
            Amount::from_num(config.wallet.initial_balance),
        ));
        let transfers = Arc::new(TransferEngine::new(
            store.clone(),
            ledger.clone(),
            locks,
            config.mining.transfer_difficulty,
        )?);

        Ok(Self {
            config,
            store,
            ledger,
            wallets,
            transfers,
            state: Arc::new(RwLock::new(NodeState::Booting)),
            persistent,
        })
    }

    /// Applies the configured mining address and starts the mining loop when
    /// `mining.enabled` is set.
    pub async fn start_mining_from_config(&self) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(address) = &self.config.mining.address {
            if let Err(e) = self.ledger.set_mining_address(address) {
                warn!("Configured mining address {} rejected: {}", address, e);
                if self.config.mining.enabled {
                    return Err(e.into());
                }
            }
        }
        if self.config.mining.enabled {
            self.ledger.start()?;
        }
        Ok(())
    }

    pub async fn run(self: Arc<Self>, port: u16) -> Result<(), Box<dyn std::error::Error>> {
        {
            let mut s = self.state.write().await;
            *s = if self.persistent {
                NodeState::Ready
            } else {
                NodeState::Degraded
            };
        }

        self.start_mining_from_config().await?;

        let result = self.serve(port).await;

        *self.state.write().await = NodeState::ShuttingDown;
        if let Err(e) = self.ledger.stop().await {
            error!("Failed to stop mining cleanly: {}", e);
        }
        info!(height = self.ledger.height().await, "Node stopped");
        result
    }

    #[cfg(feature = "api")]
    async fn serve(&self, port: u16) -> Result<(), Box<dyn std::error::Error>> {
        let api_node = Arc::new(crate::api::Node::new(
            self.wallets.clone(),
            self.transfers.clone(),
            self.ledger.clone(),
            Some(self.state.clone()),
        ));

        // In-flight mine-block requests must end before the server drains.
        let ledger = self.ledger.clone();
        let shutdown = async move {
            shutdown_signal().await;
            ledger.cancel_searches();
        };
        crate::api::run_api_server(api_node, port, shutdown).await
    }

    #[cfg(not(feature = "api"))]
    async fn serve(&self, _port: u16) -> Result<(), Box<dyn std::error::Error>> {
        shutdown_signal().await;
        self.ledger.cancel_searches();
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_config_falls_back_to_memory() {
        let mut config = Config::default();
        config.database.path = "/nonexistent-dir/\0/mycoin.db".to_string();
        let node = Node::from_config(config).unwrap();
        assert!(!node.persistent);
        assert_eq!(node.ledger.height().await, 0);
    }

    #[tokio::test]
    async fn test_sqlite_node_reopens_chain() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.database.path = dir.path().join("node.db").to_string_lossy().into_owned();
        config.mining.difficulty = 1;

        let miner = {
            let node = Node::from_config(config.clone()).unwrap();
            assert!(node.persistent);
            let miner = node.wallets.create_wallet(None, None).unwrap();
            node.ledger.mine_block(&miner.address).await.unwrap();
            miner
        };

        let node = Node::from_config(config).unwrap();
        assert_eq!(node.ledger.height().await, 1);
        assert!(node.wallets.wallet_stats(&miner.address).unwrap().balance > Amount::from_num(100));
    }
}
