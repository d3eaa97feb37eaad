//! Ledger engine: pending queue, block assembly, the mining loop and
//! miner payouts.

use crate::amount::Amount;
use crate::blockchain::{validate_chain, validate_difficulty, Block, BlockTemplate, Chain, MiningConfig, MiningStatus};
use crate::economics::RewardPolicy;
use crate::error::{ChainError, Side};
use crate::persistence::{LedgerStore, WriteBatch};
use crate::pow::{CancelFlag, ProofOfWork};
use crate::transaction::TransactionRecord;
use crate::wallet::{Wallet, WalletLocks};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;

/// Default pause between two mining cycles.
pub const DEFAULT_CYCLE_PAUSE: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub base_reward: Amount,
    pub cycle_pause: Duration,
    /// Used only when the store holds no mining configuration yet.
    pub default_difficulty: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            base_reward: RewardPolicy::default().base(),
            cycle_pause: DEFAULT_CYCLE_PAUSE,
            default_difficulty: crate::blockchain::DEFAULT_DIFFICULTY,
        }
    }
}

pub struct LedgerEngine {
    store: Arc<dyn LedgerStore>,
    locks: Arc<WalletLocks>,
    chain: RwLock<Chain>,
    pending: Mutex<VecDeque<TransactionRecord>>,
    config: Mutex<MiningConfig>,
    rewards: RewardPolicy,
    cycle_pause: Duration,
    is_mining: AtomicBool,
    blocks_mined: AtomicU64,
    /// Difficulty and duration of the last completed search.
    last_search: Mutex<Option<(u32, Duration)>>,
    cancel: Mutex<CancelFlag>,
    /// Parent of the flags handed to on-demand `mine_block` searches.
    on_demand: Mutex<CancelFlag>,
    /// Replaced on every `start` so a wake-up left over from an earlier run
    /// cannot cut the next pause short.
    wake: Mutex<Arc<Notify>>,
    mining_task: Mutex<Option<JoinHandle<()>>>,
}

impl LedgerEngine {
    /// Loads the chain and mining configuration from `store`, writing a
    /// genesis block first if the store is empty. Mining always starts
    /// stopped.
    pub fn open(
        store: Arc<dyn LedgerStore>,
        locks: Arc<WalletLocks>,
        settings: EngineSettings,
    ) -> Result<Self, ChainError> {
        let blocks = store.load_blocks()?;
        let chain = if blocks.is_empty() {
            let chain = Chain::new()?;
            store.save_block(chain.tip())?;
            chain
        } else {
            Chain::from_blocks(blocks)?
        };

        let mut config = store.load_mining_config()?.unwrap_or_else(|| MiningConfig {
            difficulty: settings.default_difficulty,
            ..MiningConfig::default()
        });
        config.mining = false;

        tracing::info!(
            height = chain.tip().index,
            difficulty = config.difficulty,
            mining_address = ?config.mining_address,
            "ledger.opened"
        );

        Ok(LedgerEngine {
            store,
            locks,
            chain: RwLock::new(chain),
            pending: Mutex::new(VecDeque::new()),
            config: Mutex::new(config),
            rewards: RewardPolicy::new(settings.base_reward),
            cycle_pause: settings.cycle_pause,
            is_mining: AtomicBool::new(false),
            blocks_mined: AtomicU64::new(0),
            last_search: Mutex::new(None),
            cancel: Mutex::new(CancelFlag::new()),
            on_demand: Mutex::new(CancelFlag::new()),
            wake: Mutex::new(Arc::new(Notify::new())),
            mining_task: Mutex::new(None),
        })
    }

    fn persist_config(&self) -> Result<(), ChainError> {
        let snapshot = self.config.lock().clone();
        self.store.save_mining_config(&snapshot)
    }

    fn find_miner(&self, address: &str) -> Result<Wallet, ChainError> {
        self.store
            .find_wallet_by_address(address)?
            .ok_or_else(|| ChainError::WalletNotFound(Side::Miner, address.to_string()))
    }

    pub fn is_mining(&self) -> bool {
        self.is_mining.load(Ordering::Relaxed)
    }

    pub fn blocks_mined(&self) -> u64 {
        self.blocks_mined.load(Ordering::Relaxed)
    }

    pub fn difficulty(&self) -> u32 {
        self.config.lock().difficulty
    }

    pub fn mining_address(&self) -> Option<String> {
        self.config.lock().mining_address.clone()
    }

    pub fn set_mining_address(&self, address: &str) -> Result<(), ChainError> {
        self.find_miner(address)?;
        self.config.lock().mining_address = Some(address.to_string());
        self.persist_config()?;
        tracing::info!(address, "mining.address_set");
        Ok(())
    }

    /// Takes effect from the next block assembled.
    pub fn set_difficulty(&self, difficulty: u64) -> Result<u32, ChainError> {
        let difficulty = validate_difficulty(difficulty)?;
        self.config.lock().difficulty = difficulty;
        self.persist_config()?;
        tracing::info!(difficulty, "mining.difficulty_set");
        Ok(difficulty)
    }

    /// Starts the background mining loop. A no-op if already mining.
    pub fn start(self: &Arc<Self>) -> Result<(), ChainError> {
        if self.mining_address().is_none() {
            return Err(ChainError::MiningNotConfigured);
        }
        if self
            .is_mining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }

        let cancel = CancelFlag::new();
        *self.cancel.lock() = cancel.clone();
        let wake = Arc::new(Notify::new());
        *self.wake.lock() = wake.clone();
        self.config.lock().mining = true;
        if let Err(e) = self.persist_config() {
            tracing::error!(error = %e, "mining.config_persist_failed");
        }

        let engine = Arc::clone(self);
        let task = tokio::spawn(async move {
            tracing::info!(address = ?engine.mining_address(), "mining.started");
            engine.mining_loop(cancel, wake).await;
            tracing::info!("mining.stopped");
        });
        *self.mining_task.lock() = Some(task);
        Ok(())
    }

    async fn mining_loop(&self, cancel: CancelFlag, wake: Arc<Notify>) {
        while self.is_mining() && !cancel.is_cancelled() {
            let Some(miner) = self.mining_address() else {
                tracing::warn!("mining.no_address");
                break;
            };

            match self.mine_cycle(&miner, &cancel).await {
                Ok(block) => {
                    tracing::info!(
                        index = block.index,
                        hash = %block.hash,
                        transactions = block.transactions.len(),
                        "mining.block_mined"
                    );
                }
                Err(ChainError::SearchCancelled) => break,
                Err(e) => tracing::warn!(error = %e, "mining.cycle_failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.cycle_pause) => {}
                _ = wake.notified() => {}
            }
        }
    }

    /// Cancels any on-demand [`mine_block`](Self::mine_block) search in
    /// flight. Later calls to `mine_block` are unaffected.
    pub fn cancel_searches(&self) {
        let previous = std::mem::take(&mut *self.on_demand.lock());
        previous.cancel();
    }

    /// Stops mining, cancels on-demand searches and waits for the loop to
    /// exit. Idempotent.
    pub async fn stop(&self) -> Result<(), ChainError> {
        self.cancel_searches();
        if self
            .is_mining
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }

        self.cancel.lock().cancel();
        self.wake.lock().notify_one();
        self.config.lock().mining = false;
        self.persist_config()?;

        let task = self.mining_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "mining.task_join_failed");
            }
        }
        Ok(())
    }

    pub async fn status(&self) -> MiningStatus {
        let height = self.height().await;
        let config = self.config.lock().clone();
        MiningStatus {
            mining: self.is_mining(),
            difficulty: config.difficulty,
            mining_address: config.mining_address,
            blocks_mined: self.blocks_mined(),
            height,
            pending_transactions: self.pending.lock().len(),
        }
    }

    /// Mines one block for `miner` outside the loop. Fails with
    /// `SearchCancelled` if [`stop`](Self::stop) or
    /// [`cancel_searches`](Self::cancel_searches) runs first.
    pub async fn mine_block(&self, miner: &str) -> Result<Block, ChainError> {
        let cancel = self.on_demand.lock().child();
        let block = self.mine_cycle(miner, &cancel).await?;
        tracing::info!(index = block.index, hash = %block.hash, "mining.block_mined");
        Ok(block)
    }

    /// Search time used to price the next reward: the last search at the
    /// same difficulty, or the expected time when there is none.
    fn search_estimate(&self, difficulty: u32) -> f64 {
        match *self.last_search.lock() {
            Some((d, elapsed)) if d == difficulty => elapsed.as_secs_f64(),
            _ => RewardPolicy::expected_secs(difficulty),
        }
    }

    async fn mine_cycle(&self, miner: &str, cancel: &CancelFlag) -> Result<Block, ChainError> {
        self.find_miner(miner)?;

        let tip = self.chain.read().await.tip().clone();
        let included: Vec<TransactionRecord> = self.pending.lock().iter().cloned().collect();
        let pow = ProofOfWork::new(self.difficulty())?;

        // The reward is part of the searched content, so one search yields a
        // hash that meets the target for the block as stored.
        let estimate = self.search_estimate(pow.difficulty());
        let reward_amount = self.rewards.reward(pow.difficulty(), estimate);
        let reward = TransactionRecord::reward(miner.to_string(), reward_amount);
        let mut transactions = included.clone();
        transactions.push(reward.clone());

        let started = Instant::now();
        let (template, solution) = pow
            .search_blocking(BlockTemplate::next(&tip, transactions), cancel.clone())
            .await?;
        let elapsed = started.elapsed();
        *self.last_search.lock() = Some((pow.difficulty(), elapsed));
        let block = template.seal(solution);

        self.commit_block(miner, &block, reward).await?;

        let included: HashSet<&str> = included.iter().map(|t| t.hash.as_str()).collect();
        self.pending.lock().retain(|t| !included.contains(t.hash.as_str()));
        self.blocks_mined.fetch_add(1, Ordering::SeqCst);

        tracing::debug!(
            index = block.index,
            reward = %reward_amount,
            estimate_secs = estimate,
            elapsed_secs = elapsed.as_secs_f64(),
            "mining.reward_paid"
        );
        Ok(block)
    }

    /// Persists block, reward record and miner credit as one batch, then
    /// appends to the in-memory chain. Nothing changes if either step fails.
    async fn commit_block(&self, miner: &str, block: &Block, reward: TransactionRecord) -> Result<(), ChainError> {
        let _miner_guard = self.locks.lock(miner).await;
        let mut chain = self.chain.write().await;
        chain.check_extends_tip(block)?;

        let mut wallet = self.find_miner(miner)?;
        wallet.credit(reward.amount)?;

        self.store.commit(&WriteBatch {
            wallets: vec![wallet],
            transactions: vec![reward],
            block: Some(block.clone()),
        })?;
        chain.append(block.clone())
    }

    /// Queues a confirmed transfer for the next block.
    pub fn submit(&self, record: TransactionRecord) -> Result<(), ChainError> {
        record.validate()?;
        let mut pending = self.pending.lock();
        if pending.iter().any(|t| t.hash == record.hash) {
            return Err(ChainError::DuplicateTransactionHash(record.hash));
        }
        pending.push_back(record);
        Ok(())
    }

    pub fn pending(&self) -> Vec<TransactionRecord> {
        self.pending.lock().iter().cloned().collect()
    }

    pub async fn blocks(&self) -> Vec<Block> {
        self.chain.read().await.blocks().to_vec()
    }

    /// Index of the chain tip; 0 when only genesis exists.
    pub async fn height(&self) -> u64 {
        self.chain.read().await.tip().index
    }

    pub async fn validate_chain(&self) -> Result<(), ChainError> {
        validate_chain(self.chain.read().await.blocks())
    }
}
