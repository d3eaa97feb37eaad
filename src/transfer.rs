//! Peer-to-peer transfers and transaction queries.

use crate::amount::Amount;
use crate::blockchain::LedgerEngine;
use crate::crypto;
use crate::error::{ChainError, Side};
use crate::persistence::{LedgerStore, WriteBatch};
use crate::pow::{CancelFlag, ProofOfWork};
use crate::transaction::{
    validate_transfer_request, HistoryEntry, Pagination, SignedTransfer, TransactionPage,
    TransactionRecord, TransferPayload,
};
use crate::wallet::{Wallet, WalletLocks};
use std::sync::Arc;

/// Default difficulty of the per-transfer proof-of-work.
pub const DEFAULT_TRANSFER_DIFFICULTY: u32 = 4;

/// Largest page size served by [`TransferEngine::transactions_page`].
pub const MAX_PAGE_LIMIT: u64 = 100;

pub struct TransferEngine {
    store: Arc<dyn LedgerStore>,
    ledger: Arc<LedgerEngine>,
    locks: Arc<WalletLocks>,
    pow: ProofOfWork,
}

impl TransferEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        ledger: Arc<LedgerEngine>,
        locks: Arc<WalletLocks>,
        transfer_difficulty: u32,
    ) -> Result<Self, ChainError> {
        Ok(TransferEngine {
            store,
            ledger,
            locks,
            pow: ProofOfWork::new(transfer_difficulty)?,
        })
    }

    fn find(&self, address: &str, side: Side) -> Result<Wallet, ChainError> {
        self.store
            .find_wallet_by_address(address)?
            .ok_or_else(|| ChainError::WalletNotFound(side, address.to_string()))
    }

    /// Moves `amount` from `from` to `to`, authorised by `private_key`.
    ///
    /// Signing and the proof-of-work run before any wallet lock is taken.
    /// Balances are then re-read under both locks and the debit, credit and
    /// record are committed as one batch. The confirmed record is finally
    /// queued for the next block.
    pub async fn transfer(
        &self,
        from: &str,
        to: &str,
        amount: Amount,
        private_key: &str,
    ) -> Result<TransactionRecord, ChainError> {
        validate_transfer_request(from, to, amount)?;

        let sender = self.find(from, Side::Sender)?;
        self.find(to, Side::Receiver)?;
        if sender.balance < amount {
            return Err(ChainError::InsufficientFunds {
                balance: sender.balance.to_string(),
                requested: amount.to_string(),
            });
        }

        let payload = TransferPayload::new(from, to, amount);
        let signed = crypto::sign(private_key, &payload)?;
        if !crypto::verify(&sender.public_key, &payload, &signed.signature)? {
            tracing::warn!(from, "transfer.signature_rejected");
            return Err(ChainError::InvalidSignature);
        }

        let work = SignedTransfer::new(payload, signed.digest);
        let (work, solution) = self.pow.search_blocking(work, CancelFlag::new()).await?;
        let record = TransactionRecord::confirmed_transfer(&work.payload, solution.hash);

        {
            let _guards = self.locks.lock_pair(from, to).await;
            let mut sender = self.find(from, Side::Sender)?;
            let mut receiver = self.find(to, Side::Receiver)?;
            sender.debit(amount)?;
            receiver.credit(amount)?;

            self.store.commit(&WriteBatch {
                wallets: vec![sender, receiver],
                transactions: vec![record.clone()],
                block: None,
            })?;
        }

        if let Err(e) = self.ledger.submit(record.clone()) {
            tracing::error!(hash = %record.hash, error = %e, "transfer.enqueue_failed");
        }

        tracing::info!(
            from,
            to,
            amount = %amount,
            hash = %record.hash,
            "transfer.confirmed"
        );
        Ok(record)
    }

    /// Records touching `address`, most recent first.
    pub fn history(&self, address: &str) -> Result<impl Iterator<Item = HistoryEntry>, ChainError> {
        let records = self.store.find_transactions_by_address(address)?;
        let address = address.to_string();
        Ok(records
            .into_iter()
            .map(move |record| HistoryEntry::for_address(record, &address)))
    }

    /// A 1-based page of all records, most recent first.
    pub fn transactions_page(&self, page: u64, limit: u64) -> Result<TransactionPage, ChainError> {
        if page == 0 {
            return Err(ChainError::InvalidRequest("Page must be at least 1".to_string()));
        }
        if limit == 0 || limit > MAX_PAGE_LIMIT {
            return Err(ChainError::InvalidRequest(format!(
                "Limit must be between 1 and {}",
                MAX_PAGE_LIMIT
            )));
        }

        let total = self.store.count_transactions()?;
        let skip = (page - 1).saturating_mul(limit);
        let transactions = self.store.find_transactions_page(skip, limit)?;

        Ok(TransactionPage {
            transactions,
            pagination: Pagination {
                total,
                page,
                limit,
                pages: total.div_ceil(limit),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::EngineSettings;
    use crate::persistence::InMemoryStore;
    use crate::wallet::{HdKeyProvider, WalletService};

    struct Fixture {
        wallets: WalletService,
        transfers: TransferEngine,
        ledger: Arc<LedgerEngine>,
    }

    fn fixture() -> Fixture {
        let store: Arc<dyn LedgerStore> = Arc::new(InMemoryStore::new());
        let locks = Arc::new(WalletLocks::new());
        let ledger = Arc::new(
            LedgerEngine::open(store.clone(), locks.clone(), EngineSettings::default()).unwrap(),
        );
        Fixture {
            wallets: WalletService::new(store.clone(), Arc::new(HdKeyProvider), Amount::from_num(100)),
            transfers: TransferEngine::new(store, ledger.clone(), locks, 1).unwrap(),
            ledger,
        }
    }

    #[tokio::test]
    async fn test_transfer_moves_value() {
        let f = fixture();
        let a = f.wallets.create_wallet(None, None).unwrap();
        let b = f.wallets.create_wallet(None, None).unwrap();

        let record = f
            .transfers
            .transfer(&a.address, &b.address, Amount::from_num(25), &a.private_key)
            .await
            .unwrap();
        assert!(record.hash.starts_with('0'));

        assert_eq!(f.wallets.wallet_stats(&a.address).unwrap().balance, Amount::from_num(75));
        assert_eq!(f.wallets.wallet_stats(&b.address).unwrap().balance, Amount::from_num(125));
        assert_eq!(f.ledger.pending(), vec![record]);
    }

    #[tokio::test]
    async fn test_wrong_key_is_rejected() {
        let f = fixture();
        let a = f.wallets.create_wallet(None, None).unwrap();
        let b = f.wallets.create_wallet(None, None).unwrap();

        let result = f
            .transfers
            .transfer(&a.address, &b.address, Amount::from_num(1), &b.private_key)
            .await;
        assert_eq!(result, Err(ChainError::InvalidSignature));
        assert_eq!(f.wallets.wallet_stats(&a.address).unwrap().balance, Amount::from_num(100));
    }

    #[tokio::test]
    async fn test_unknown_wallets() {
        let f = fixture();
        let a = f.wallets.create_wallet(None, None).unwrap();

        let missing_receiver = f
            .transfers
            .transfer(&a.address, "0xnobody", Amount::from_num(1), &a.private_key)
            .await;
        assert!(matches!(missing_receiver, Err(ChainError::WalletNotFound(Side::Receiver, _))));

        let missing_sender = f
            .transfers
            .transfer("0xnobody", &a.address, Amount::from_num(1), &a.private_key)
            .await;
        assert!(matches!(missing_sender, Err(ChainError::WalletNotFound(Side::Sender, _))));
    }

    #[tokio::test]
    async fn test_history_and_pages() {
        let f = fixture();
        let a = f.wallets.create_wallet(None, None).unwrap();
        let b = f.wallets.create_wallet(None, None).unwrap();
        for amount in [1, 2, 3] {
            f.transfers
                .transfer(&a.address, &b.address, Amount::from_num(amount), &a.private_key)
                .await
                .unwrap();
        }

        let history: Vec<HistoryEntry> = f.transfers.history(&b.address).unwrap().collect();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].amount, Amount::from_num(3));
        assert_eq!(history[0].with_address.as_deref(), Some(a.address.as_str()));

        let page = f.transfers.transactions_page(2, 2).unwrap();
        assert_eq!(page.transactions.len(), 1);
        assert_eq!(page.transactions[0].amount, Amount::from_num(1));
        assert_eq!(
            page.pagination,
            Pagination { total: 3, page: 2, limit: 2, pages: 2 }
        );

        assert!(f.transfers.transactions_page(0, 10).is_err());
        assert!(f.transfers.transactions_page(1, 0).is_err());
    }
}
