use crate::error::ChainError;
use crate::hashing::{self, GENESIS_PREVIOUS_HASH};
use crate::pow::{Solution, Work};
use crate::transaction::TransactionRecord;
use serde::{Deserialize, Serialize};

/// Fixed timestamp of the genesis block (2023-01-01T00:00:00Z).
pub const GENESIS_TIMESTAMP: i64 = 1_672_531_200_000;

/// The hashed fields of a block, in canonical order.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BlockFields<'a> {
    index: u64,
    timestamp: i64,
    transactions: &'a [TransactionRecord],
    previous_hash: &'a str,
    nonce: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub index: u64,
    pub timestamp: i64,
    pub transactions: Vec<TransactionRecord>,
    pub previous_hash: String,
    pub nonce: u64,
    pub hash: String,
}

impl Block {
    pub fn genesis() -> Result<Self, ChainError> {
        BlockTemplate {
            index: 0,
            timestamp: GENESIS_TIMESTAMP,
            transactions: Vec::new(),
            previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
        }
        .seal_with_nonce(0)
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }

    /// Recomputes the hash from the block's own fields.
    pub fn compute_hash(&self) -> Result<String, ChainError> {
        hashing::digest(&BlockFields {
            index: self.index,
            timestamp: self.timestamp,
            transactions: &self.transactions,
            previous_hash: &self.previous_hash,
            nonce: self.nonce,
        })
    }

    /// The unsealed content of this block, for re-verifying its work.
    pub fn template(&self) -> BlockTemplate {
        BlockTemplate {
            index: self.index,
            timestamp: self.timestamp,
            transactions: self.transactions.clone(),
            previous_hash: self.previous_hash.clone(),
        }
    }
}

/// A block under construction: everything but the nonce and hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockTemplate {
    pub index: u64,
    pub timestamp: i64,
    pub transactions: Vec<TransactionRecord>,
    pub previous_hash: String,
}

impl BlockTemplate {
    /// A template extending `tip` with the given transactions.
    pub fn next(tip: &Block, transactions: Vec<TransactionRecord>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        BlockTemplate {
            index: tip.index + 1,
            timestamp: now.max(tip.timestamp + 1),
            transactions,
            previous_hash: tip.hash.clone(),
        }
    }

    pub fn seal(self, solution: Solution) -> Block {
        Block {
            index: self.index,
            timestamp: self.timestamp,
            transactions: self.transactions,
            previous_hash: self.previous_hash,
            nonce: solution.nonce,
            hash: solution.hash,
        }
    }

    fn seal_with_nonce(self, nonce: u64) -> Result<Block, ChainError> {
        let hash = self.hash_with_nonce(nonce)?;
        Ok(self.seal(Solution { nonce, hash }))
    }
}

impl Work for BlockTemplate {
    fn hash_with_nonce(&self, nonce: u64) -> Result<String, ChainError> {
        hashing::digest(&BlockFields {
            index: self.index,
            timestamp: self.timestamp,
            transactions: &self.transactions,
            previous_hash: &self.previous_hash,
            nonce,
        })
    }
}

/// The in-memory chain. Always holds at least the genesis block.
#[derive(Debug, Clone)]
pub struct Chain {
    blocks: Vec<Block>,
}

impl Chain {
    pub fn new() -> Result<Self, ChainError> {
        Ok(Chain {
            blocks: vec![Block::genesis()?],
        })
    }

    /// Rebuilds a chain from persisted blocks, checking linkage and hashes.
    pub fn from_blocks(blocks: Vec<Block>) -> Result<Self, ChainError> {
        if blocks.is_empty() {
            return Self::new();
        }
        crate::blockchain::validate_chain(&blocks)?;
        Ok(Chain { blocks })
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn tip(&self) -> &Block {
        // never empty: constructed with genesis and only appended to
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get(&self, index: u64) -> Option<&Block> {
        self.blocks.get(index as usize)
    }

    /// Checks that `block` extends the current tip.
    pub fn check_extends_tip(&self, block: &Block) -> Result<(), ChainError> {
        let tip = self.tip();
        if block.index != tip.index + 1 {
            return Err(ChainError::InvalidBlock(format!(
                "Invalid block index. Expected {}, but got {}.",
                tip.index + 1,
                block.index
            )));
        }
        if block.previous_hash != tip.hash {
            return Err(ChainError::InvalidBlock(format!(
                "Invalid previous block hash. Expected {}, but got {}.",
                tip.hash, block.previous_hash
            )));
        }
        if block.compute_hash()? != block.hash {
            return Err(ChainError::InvalidBlock(format!(
                "Block {} hash does not match its contents",
                block.index
            )));
        }
        Ok(())
    }

    pub fn append(&mut self, block: Block) -> Result<(), ChainError> {
        self.check_extends_tip(&block)?;
        self.blocks.push(block);
        Ok(())
    }
}
