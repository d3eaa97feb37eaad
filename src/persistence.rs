//! Database persistence layer for MyCoin

use crate::amount::Amount;
use crate::blockchain::{Block, MiningConfig};
use crate::error::ChainError;
use crate::transaction::{TransactionRecord, TxStatus};
use crate::wallet::Wallet;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::str::FromStr;
use std::sync::Mutex;

/// Writes that must become visible together or not at all.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub wallets: Vec<Wallet>,
    pub transactions: Vec<TransactionRecord>,
    pub block: Option<Block>,
}

/// Abstraction for persistence backends. Every method may fail with
/// `StoreUnavailable`; `commit` is all-or-nothing.
pub trait LedgerStore: Send + Sync {
    fn find_wallet_by_address(&self, address: &str) -> Result<Option<Wallet>, ChainError>;
    fn save_wallet(&self, wallet: &Wallet) -> Result<(), ChainError>;
    /// Stores a wallet that must not exist yet; `WalletExists` otherwise.
    fn insert_wallet(&self, wallet: &Wallet) -> Result<(), ChainError>;
    /// Records where `address` is sender or receiver, most recent first.
    fn find_transactions_by_address(&self, address: &str) -> Result<Vec<TransactionRecord>, ChainError>;
    fn save_transaction(&self, tx: &TransactionRecord) -> Result<(), ChainError>;
    fn count_transactions(&self) -> Result<u64, ChainError>;
    /// A page of all records, most recent first.
    fn find_transactions_page(&self, skip: u64, limit: u64) -> Result<Vec<TransactionRecord>, ChainError>;
    fn commit(&self, batch: &WriteBatch) -> Result<(), ChainError>;
    fn save_block(&self, block: &Block) -> Result<(), ChainError>;
    /// All blocks in index order.
    fn load_blocks(&self) -> Result<Vec<Block>, ChainError>;
    fn load_mining_config(&self) -> Result<Option<MiningConfig>, ChainError>;
    fn save_mining_config(&self, config: &MiningConfig) -> Result<(), ChainError>;
}

fn poisoned() -> ChainError {
    ChainError::StoreUnavailable("Mutex poisoned".to_string())
}

fn parse_amount(s: &str) -> Result<Amount, ChainError> {
    Amount::from_str(s)
        .map_err(|e| ChainError::StoreUnavailable(format!("Corrupt amount {:?}: {}", s, e)))
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &str) -> Result<Self, ChainError> {
        let conn = Connection::open(path)
            .map_err(|e| ChainError::StoreUnavailable(format!("Failed to open database: {}", e)))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS wallets (
                address TEXT PRIMARY KEY,
                public_key TEXT NOT NULL,
                private_key TEXT NOT NULL,
                balance TEXT NOT NULL,
                user_id TEXT,
                created_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS transactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                hash TEXT NOT NULL UNIQUE,
                from_address TEXT,
                to_address TEXT NOT NULL,
                amount TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                status TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_transactions_from ON transactions (from_address);
            CREATE INDEX IF NOT EXISTS idx_transactions_to ON transactions (to_address);
            CREATE TABLE IF NOT EXISTS blocks (
                idx INTEGER PRIMARY KEY,
                hash TEXT NOT NULL,
                previous_hash TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                nonce INTEGER NOT NULL,
                transactions TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )
        .map_err(|e| ChainError::StoreUnavailable(format!("Failed to create tables: {}", e)))?;

        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    fn wallet_from_row(row: &Row) -> rusqlite::Result<(Wallet, String)> {
        let balance: String = row.get(3)?;
        Ok((
            Wallet {
                address: row.get(0)?,
                public_key: row.get(1)?,
                private_key: row.get(2)?,
                balance: Amount::ZERO,
                user_id: row.get(4)?,
                created_at: row.get(5)?,
            },
            balance,
        ))
    }

    fn record_from_row(row: &Row) -> rusqlite::Result<(TransactionRecord, String, String)> {
        let amount: String = row.get(3)?;
        let status: String = row.get(5)?;
        Ok((
            TransactionRecord {
                hash: row.get(0)?,
                from_address: row.get(1)?,
                to_address: row.get(2)?,
                amount: Amount::ZERO,
                timestamp: row.get(4)?,
                status: TxStatus::Pending,
            },
            amount,
            status,
        ))
    }

    fn finish_record(raw: (TransactionRecord, String, String)) -> Result<TransactionRecord, ChainError> {
        let (mut record, amount, status) = raw;
        record.amount = parse_amount(&amount)?;
        record.status = TxStatus::parse(&status)?;
        Ok(record)
    }

    fn query_records<P: rusqlite::Params>(
        conn: &Connection,
        sql: &str,
        params: P,
    ) -> Result<Vec<TransactionRecord>, ChainError> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, Self::record_from_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(Self::finish_record(row?)?);
        }
        Ok(records)
    }

    fn upsert_wallet(conn: &Connection, wallet: &Wallet) -> Result<(), ChainError> {
        conn.execute(
            "INSERT OR REPLACE INTO wallets (address, public_key, private_key, balance, user_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                wallet.address,
                wallet.public_key,
                wallet.private_key,
                wallet.balance.to_string(),
                wallet.user_id,
                wallet.created_at,
            ],
        )?;
        Ok(())
    }

    fn insert_new_wallet(conn: &Connection, wallet: &Wallet) -> Result<(), ChainError> {
        conn.execute(
            "INSERT INTO wallets (address, public_key, private_key, balance, user_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                wallet.address,
                wallet.public_key,
                wallet.private_key,
                wallet.balance.to_string(),
                wallet.user_id,
                wallet.created_at,
            ],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                ChainError::WalletExists(wallet.address.clone())
            } else {
                ChainError::StoreUnavailable(format!("Failed to save wallet: {}", e))
            }
        })?;
        Ok(())
    }

    fn insert_transaction(conn: &Connection, tx: &TransactionRecord) -> Result<(), ChainError> {
        conn.execute(
            "INSERT INTO transactions (hash, from_address, to_address, amount, timestamp, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                tx.hash,
                tx.from_address,
                tx.to_address,
                tx.amount.to_string(),
                tx.timestamp,
                tx.status.as_str(),
            ],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                ChainError::DuplicateTransactionHash(tx.hash.clone())
            } else {
                ChainError::StoreUnavailable(format!("Failed to save transaction: {}", e))
            }
        })?;
        Ok(())
    }

    fn insert_block(conn: &Connection, block: &Block) -> Result<(), ChainError> {
        let transactions_json = serde_json::to_string(&block.transactions)?;
        conn.execute(
            "INSERT INTO blocks (idx, hash, previous_hash, timestamp, nonce, transactions)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                block.index as i64,
                block.hash,
                block.previous_hash,
                block.timestamp,
                block.nonce as i64,
                transactions_json,
            ],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                ChainError::InvalidBlock(format!("Block {} is already stored", block.index))
            } else {
                ChainError::StoreUnavailable(format!("Failed to save block: {}", e))
            }
        })?;
        Ok(())
    }
}

impl LedgerStore for Database {
    fn find_wallet_by_address(&self, address: &str) -> Result<Option<Wallet>, ChainError> {
        let conn = self.conn.lock().map_err(|_| poisoned())?;
        let found = conn
            .query_row(
                "SELECT address, public_key, private_key, balance, user_id, created_at
                 FROM wallets WHERE address = ?1",
                params![address],
                Self::wallet_from_row,
            )
            .optional()?;

        match found {
            Some((mut wallet, balance)) => {
                wallet.balance = parse_amount(&balance)?;
                Ok(Some(wallet))
            }
            None => Ok(None),
        }
    }

    fn save_wallet(&self, wallet: &Wallet) -> Result<(), ChainError> {
        let conn = self.conn.lock().map_err(|_| poisoned())?;
        Self::upsert_wallet(&conn, wallet)
    }

    fn insert_wallet(&self, wallet: &Wallet) -> Result<(), ChainError> {
        let conn = self.conn.lock().map_err(|_| poisoned())?;
        Self::insert_new_wallet(&conn, wallet)
    }

    fn find_transactions_by_address(&self, address: &str) -> Result<Vec<TransactionRecord>, ChainError> {
        let conn = self.conn.lock().map_err(|_| poisoned())?;
        Self::query_records(
            &conn,
            "SELECT hash, from_address, to_address, amount, timestamp, status FROM transactions
             WHERE from_address = ?1 OR to_address = ?1
             ORDER BY timestamp DESC, id DESC",
            params![address],
        )
    }

    fn save_transaction(&self, tx: &TransactionRecord) -> Result<(), ChainError> {
        let conn = self.conn.lock().map_err(|_| poisoned())?;
        Self::insert_transaction(&conn, tx)
    }

    fn count_transactions(&self) -> Result<u64, ChainError> {
        let conn = self.conn.lock().map_err(|_| poisoned())?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn find_transactions_page(&self, skip: u64, limit: u64) -> Result<Vec<TransactionRecord>, ChainError> {
        let conn = self.conn.lock().map_err(|_| poisoned())?;
        Self::query_records(
            &conn,
            "SELECT hash, from_address, to_address, amount, timestamp, status FROM transactions
             ORDER BY timestamp DESC, id DESC LIMIT ?1 OFFSET ?2",
            params![limit.min(i64::MAX as u64) as i64, skip.min(i64::MAX as u64) as i64],
        )
    }

    /// Atomically applies a batch inside one SQL transaction.
    fn commit(&self, batch: &WriteBatch) -> Result<(), ChainError> {
        let conn_guard = self.conn.lock().map_err(|_| poisoned())?;
        let tx = conn_guard.unchecked_transaction().map_err(|e| {
            ChainError::StoreUnavailable(format!("Failed to start transaction: {}", e))
        })?;

        for record in &batch.transactions {
            Self::insert_transaction(&tx, record)?;
        }
        for wallet in &batch.wallets {
            Self::upsert_wallet(&tx, wallet)?;
        }
        if let Some(block) = &batch.block {
            Self::insert_block(&tx, block)?;
        }

        // Dropping `tx` on an early return above rolls everything back.
        tx.commit().map_err(|e| {
            ChainError::StoreUnavailable(format!("Failed to commit transaction: {}", e))
        })
    }

    fn save_block(&self, block: &Block) -> Result<(), ChainError> {
        let conn = self.conn.lock().map_err(|_| poisoned())?;
        Self::insert_block(&conn, block)
    }

    fn load_blocks(&self) -> Result<Vec<Block>, ChainError> {
        let conn = self.conn.lock().map_err(|_| poisoned())?;
        let mut stmt = conn.prepare(
            "SELECT idx, hash, previous_hash, timestamp, nonce, transactions
             FROM blocks ORDER BY idx ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            let index: i64 = row.get(0)?;
            let nonce: i64 = row.get(4)?;
            let transactions_json: String = row.get(5)?;
            Ok((
                Block {
                    index: index as u64,
                    hash: row.get(1)?,
                    previous_hash: row.get(2)?,
                    timestamp: row.get(3)?,
                    nonce: nonce as u64,
                    transactions: Vec::new(),
                },
                transactions_json,
            ))
        })?;

        let mut blocks = Vec::new();
        for row in rows {
            let (mut block, transactions_json) = row?;
            block.transactions = serde_json::from_str(&transactions_json)?;
            blocks.push(block);
        }
        Ok(blocks)
    }

    fn load_mining_config(&self) -> Result<Option<MiningConfig>, ChainError> {
        let conn = self.conn.lock().map_err(|_| poisoned())?;
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM metadata WHERE key = 'mining_config'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        match value {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn save_mining_config(&self, config: &MiningConfig) -> Result<(), ChainError> {
        let json = serde_json::to_string(config)?;
        let conn = self.conn.lock().map_err(|_| poisoned())?;
        conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES ('mining_config', ?1)",
            params![json],
        )?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    wallets: std::collections::HashMap<String, Wallet>,
    /// Insertion order; newest last.
    transactions: Vec<TransactionRecord>,
    blocks: Vec<Block>,
    mining_config: Option<MiningConfig>,
}

impl MemoryState {
    fn newest_first<'a>(records: impl Iterator<Item = &'a TransactionRecord>) -> Vec<TransactionRecord> {
        let mut out: Vec<TransactionRecord> = records.cloned().collect();
        out.reverse();
        // stable: equal timestamps keep newest-inserted first
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        out
    }

    fn has_transaction(&self, hash: &str) -> bool {
        self.transactions.iter().any(|t| t.hash == hash)
    }
}

/// Simple in-memory store useful for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for InMemoryStore {
    fn find_wallet_by_address(&self, address: &str) -> Result<Option<Wallet>, ChainError> {
        let state = self.state.lock().map_err(|_| poisoned())?;
        Ok(state.wallets.get(address).cloned())
    }

    fn save_wallet(&self, wallet: &Wallet) -> Result<(), ChainError> {
        let mut state = self.state.lock().map_err(|_| poisoned())?;
        state.wallets.insert(wallet.address.clone(), wallet.clone());
        Ok(())
    }

    fn insert_wallet(&self, wallet: &Wallet) -> Result<(), ChainError> {
        let mut state = self.state.lock().map_err(|_| poisoned())?;
        if state.wallets.contains_key(&wallet.address) {
            return Err(ChainError::WalletExists(wallet.address.clone()));
        }
        state.wallets.insert(wallet.address.clone(), wallet.clone());
        Ok(())
    }

    fn find_transactions_by_address(&self, address: &str) -> Result<Vec<TransactionRecord>, ChainError> {
        let state = self.state.lock().map_err(|_| poisoned())?;
        Ok(MemoryState::newest_first(
            state.transactions.iter().filter(|t| t.involves(address)),
        ))
    }

    fn save_transaction(&self, tx: &TransactionRecord) -> Result<(), ChainError> {
        let mut state = self.state.lock().map_err(|_| poisoned())?;
        if state.has_transaction(&tx.hash) {
            return Err(ChainError::DuplicateTransactionHash(tx.hash.clone()));
        }
        state.transactions.push(tx.clone());
        Ok(())
    }

    fn count_transactions(&self) -> Result<u64, ChainError> {
        let state = self.state.lock().map_err(|_| poisoned())?;
        Ok(state.transactions.len() as u64)
    }

    fn find_transactions_page(&self, skip: u64, limit: u64) -> Result<Vec<TransactionRecord>, ChainError> {
        let state = self.state.lock().map_err(|_| poisoned())?;
        Ok(MemoryState::newest_first(state.transactions.iter())
            .into_iter()
            .skip(skip as usize)
            .take(limit as usize)
            .collect())
    }

    fn commit(&self, batch: &WriteBatch) -> Result<(), ChainError> {
        let mut state = self.state.lock().map_err(|_| poisoned())?;

        // Check everything first so a rejected batch leaves no trace.
        for (i, record) in batch.transactions.iter().enumerate() {
            let repeated_in_batch = batch.transactions[..i].iter().any(|t| t.hash == record.hash);
            if repeated_in_batch || state.has_transaction(&record.hash) {
                return Err(ChainError::DuplicateTransactionHash(record.hash.clone()));
            }
        }
        if let Some(block) = &batch.block {
            if state.blocks.iter().any(|b| b.index == block.index) {
                return Err(ChainError::InvalidBlock(format!(
                    "Block {} is already stored",
                    block.index
                )));
            }
        }

        state.transactions.extend(batch.transactions.iter().cloned());
        for wallet in &batch.wallets {
            state.wallets.insert(wallet.address.clone(), wallet.clone());
        }
        if let Some(block) = &batch.block {
            state.blocks.push(block.clone());
        }
        Ok(())
    }

    fn save_block(&self, block: &Block) -> Result<(), ChainError> {
        self.commit(&WriteBatch {
            block: Some(block.clone()),
            ..WriteBatch::default()
        })
    }

    fn load_blocks(&self) -> Result<Vec<Block>, ChainError> {
        let state = self.state.lock().map_err(|_| poisoned())?;
        let mut blocks = state.blocks.clone();
        blocks.sort_by_key(|b| b.index);
        Ok(blocks)
    }

    fn load_mining_config(&self) -> Result<Option<MiningConfig>, ChainError> {
        let state = self.state.lock().map_err(|_| poisoned())?;
        Ok(state.mining_config.clone())
    }

    fn save_mining_config(&self, config: &MiningConfig) -> Result<(), ChainError> {
        let mut state = self.state.lock().map_err(|_| poisoned())?;
        state.mining_config = Some(config.clone());
        Ok(())
    }
}
