//! Wallets, key derivation and the wallet service.

use crate::amount::{self, Amount};
use crate::crypto::KeyPair;
use crate::error::{ChainError, Side};
use crate::persistence::LedgerStore;
use bip32::{DerivationPath, XPrv};
use bip39::Mnemonic;
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

/// BIP-44 path of the single account key each wallet uses.
pub const DERIVATION_PATH: &str = "m/44'/0'/0'/0/0";

/// Recovery phrase lengths accepted by [`WalletService::generate_recovery_phrase`].
pub const SUPPORTED_WORD_COUNTS: [usize; 5] = [12, 15, 18, 21, 24];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    pub address: String,
    pub public_key: String,
    pub private_key: String,
    #[serde(with = "amount::as_decimal_str")]
    pub balance: Amount,
    pub user_id: Option<String>,
    pub created_at: i64,
}

impl Wallet {
    pub fn credit(&mut self, amount: Amount) -> Result<(), ChainError> {
        self.balance = self.balance.checked_add(amount).ok_or_else(|| {
            ChainError::InvalidRequest(format!("Balance of {} would overflow", self.address))
        })?;
        Ok(())
    }

    pub fn debit(&mut self, amount: Amount) -> Result<(), ChainError> {
        if self.balance < amount {
            return Err(ChainError::InsufficientFunds {
                balance: self.balance.to_string(),
                requested: amount.to_string(),
            });
        }
        self.balance -= amount;
        Ok(())
    }
}

/// Key material produced by a [`KeyProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    pub address: String,
    pub public_key: String,
    pub private_key: String,
    /// Recovery phrase the key was derived from.
    pub phrase: String,
}

pub trait KeyProvider: Send + Sync {
    /// New key material. A supplied passphrase is used as the recovery phrase.
    fn generate(&self, user_id: Option<&str>, passphrase: Option<&str>) -> Result<KeyMaterial, ChainError>;
    fn restore(&self, phrase: &str) -> Result<KeyMaterial, ChainError>;
}

/// BIP-39 mnemonic + BIP-32 derivation at [`DERIVATION_PATH`].
#[derive(Debug, Default, Clone, Copy)]
pub struct HdKeyProvider;

impl HdKeyProvider {
    pub fn mnemonic(word_count: usize) -> Result<Mnemonic, ChainError> {
        if !SUPPORTED_WORD_COUNTS.contains(&word_count) {
            return Err(ChainError::InvalidRequest(format!(
                "Word count must be one of {:?}, got {}",
                SUPPORTED_WORD_COUNTS, word_count
            )));
        }
        // 32 bits of entropy per 3 words
        let mut entropy = vec![0u8; word_count * 4 / 3];
        OsRng.fill_bytes(&mut entropy);
        Mnemonic::from_entropy(&entropy)
            .map_err(|e| ChainError::InvalidKey(format!("Failed to build mnemonic: {}", e)))
    }

    fn derive(mnemonic: &Mnemonic) -> Result<KeyMaterial, ChainError> {
        let seed = mnemonic.to_seed_normalized("");
        let path: DerivationPath = DERIVATION_PATH
            .parse()
            .map_err(|e| ChainError::InvalidKey(format!("Bad derivation path: {}", e)))?;
        let xprv = XPrv::derive_from_path(seed, &path)
            .map_err(|e| ChainError::InvalidKey(format!("Key derivation failed: {}", e)))?;
        let keypair = KeyPair::from_secret_bytes(&xprv.to_bytes())?;

        Ok(KeyMaterial {
            address: keypair.address(),
            public_key: keypair.public_key_hex(),
            private_key: keypair.secret_key_hex(),
            phrase: mnemonic.to_string(),
        })
    }
}

impl KeyProvider for HdKeyProvider {
    fn generate(&self, _user_id: Option<&str>, passphrase: Option<&str>) -> Result<KeyMaterial, ChainError> {
        match passphrase {
            Some(phrase) if !phrase.trim().is_empty() => self.restore(phrase),
            _ => Self::derive(&Self::mnemonic(24)?),
        }
    }

    fn restore(&self, phrase: &str) -> Result<KeyMaterial, ChainError> {
        let normalized = phrase.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        let mnemonic = Mnemonic::parse_normalized(&normalized)
            .map_err(|e| ChainError::InvalidKey(format!("Invalid recovery phrase: {}", e)))?;
        Self::derive(&mnemonic)
    }
}

/// Per-address async locks serialising balance read-modify-write.
#[derive(Debug, Default)]
pub struct WalletLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl WalletLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, address: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(address.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    pub async fn lock(&self, address: &str) -> OwnedMutexGuard<()> {
        self.handle(address).lock_owned().await
    }

    /// Locks two distinct addresses in sorted order.
    pub async fn lock_pair(&self, a: &str, b: &str) -> (OwnedMutexGuard<()>, OwnedMutexGuard<()>) {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        let first = self.lock(first).await;
        let second = self.lock(second).await;
        (first, second)
    }
}

/// Returned once, at creation: the only time the recovery phrase is shown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedWallet {
    pub address: String,
    #[serde(with = "amount::as_decimal_str")]
    pub balance: Amount,
    pub passphrase: String,
    pub private_key: String,
    pub public_key: String,
    pub user_id: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletStats {
    pub address: String,
    #[serde(with = "amount::as_decimal_str")]
    pub balance: Amount,
    pub user_id: Option<String>,
    pub created_at: i64,
}

impl From<&Wallet> for WalletStats {
    fn from(wallet: &Wallet) -> Self {
        WalletStats {
            address: wallet.address.clone(),
            balance: wallet.balance,
            user_id: wallet.user_id.clone(),
            created_at: wallet.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhraseWord {
    pub index: usize,
    pub word: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryPhrase {
    pub mnemonic: String,
    pub words: Vec<PhraseWord>,
    pub word_count: usize,
}

pub struct WalletService {
    store: Arc<dyn LedgerStore>,
    keys: Arc<dyn KeyProvider>,
    initial_balance: Amount,
}

impl WalletService {
    pub fn new(store: Arc<dyn LedgerStore>, keys: Arc<dyn KeyProvider>, initial_balance: Amount) -> Self {
        WalletService {
            store,
            keys,
            initial_balance,
        }
    }

    fn insert_new(&self, keys: KeyMaterial, user_id: Option<String>) -> Result<Wallet, ChainError> {
        if self.store.find_wallet_by_address(&keys.address)?.is_some() {
            return Err(ChainError::WalletExists(keys.address));
        }
        let wallet = Wallet {
            address: keys.address,
            public_key: keys.public_key,
            private_key: keys.private_key,
            balance: self.initial_balance,
            user_id,
            created_at: chrono::Utc::now().timestamp_millis(),
        };
        self.store.insert_wallet(&wallet)?;
        tracing::info!(address = %wallet.address, "wallet.created");
        Ok(wallet)
    }

    pub fn create_wallet(
        &self,
        user_id: Option<String>,
        passphrase: Option<String>,
    ) -> Result<CreatedWallet, ChainError> {
        let keys = self.keys.generate(user_id.as_deref(), passphrase.as_deref())?;
        let phrase = keys.phrase.clone();
        let wallet = self.insert_new(keys, user_id)?;

        Ok(CreatedWallet {
            address: wallet.address,
            balance: wallet.balance,
            passphrase: phrase,
            private_key: wallet.private_key,
            public_key: wallet.public_key,
            user_id: wallet.user_id,
            created_at: wallet.created_at,
        })
    }

    pub fn find_wallet(&self, address: &str) -> Result<Wallet, ChainError> {
        self.store
            .find_wallet_by_address(address)?
            .ok_or_else(|| ChainError::WalletNotFound(Side::Wallet, address.to_string()))
    }

    pub fn wallet_stats(&self, address: &str) -> Result<WalletStats, ChainError> {
        Ok(WalletStats::from(&self.find_wallet(address)?))
    }

    pub fn generate_recovery_phrase(&self, word_count: usize) -> Result<RecoveryPhrase, ChainError> {
        let mnemonic = HdKeyProvider::mnemonic(word_count)?;
        let words = mnemonic
            .words()
            .enumerate()
            .map(|(i, word)| PhraseWord {
                index: i + 1,
                word: word.to_string(),
            })
            .collect();

        Ok(RecoveryPhrase {
            mnemonic: mnemonic.to_string(),
            words,
            word_count,
        })
    }

    pub fn restore_wallet(&self, user_id: Option<String>, phrase: &str) -> Result<WalletStats, ChainError> {
        let keys = self.keys.restore(phrase)?;
        let wallet = self.insert_new(keys, user_id)?;
        Ok(WalletStats::from(&wallet))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryStore;

    fn service() -> WalletService {
        WalletService::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(HdKeyProvider),
            Amount::from_num(100),
        )
    }

    #[test]
    fn test_create_wallet() {
        let service = service();
        let created = service.create_wallet(Some("alice".to_string()), None).unwrap();
        assert!(crate::crypto::is_valid_address(&created.address));
        assert_eq!(created.balance, Amount::from_num(100));
        assert_eq!(created.passphrase.split_whitespace().count(), 24);

        let stats = service.wallet_stats(&created.address).unwrap();
        assert_eq!(stats.user_id.as_deref(), Some("alice"));
    }

    #[test]
    fn test_restore_is_deterministic() {
        let phrase = service().generate_recovery_phrase(12).unwrap().mnemonic;
        let a = HdKeyProvider.restore(&phrase).unwrap();
        let b = HdKeyProvider.restore(&format!("  {}  ", phrase.to_uppercase())).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_restore_existing_wallet_conflicts() {
        let service = service();
        let phrase = service.generate_recovery_phrase(15).unwrap().mnemonic;
        let restored = service.restore_wallet(None, &phrase).unwrap();
        assert_eq!(
            service.restore_wallet(None, &phrase),
            Err(ChainError::WalletExists(restored.address))
        );
    }

    #[test]
    fn test_concurrent_restores_create_one_wallet() {
        let service = service();
        let phrase = service.generate_recovery_phrase(12).unwrap().mnemonic;

        let results: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| service.restore_wallet(None, &phrase)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, ChainError::WalletExists(_))));
    }

    #[test]
    fn test_phrase_word_counts() {
        let service = service();
        for count in SUPPORTED_WORD_COUNTS {
            let phrase = service.generate_recovery_phrase(count).unwrap();
            assert_eq!(phrase.words.len(), count);
            assert_eq!(phrase.words[0].index, 1);
        }
        assert!(service.generate_recovery_phrase(13).is_err());
    }

    #[test]
    fn test_invalid_phrase_rejected() {
        assert!(matches!(
            HdKeyProvider.restore("not a real recovery phrase"),
            Err(ChainError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_debit_and_credit() {
        assert_eq!(
            service().find_wallet("0xnone"),
            Err(ChainError::WalletNotFound(Side::Wallet, "0xnone".to_string()))
        );

        let keys = HdKeyProvider.generate(None, None).unwrap();
        let mut w = Wallet {
            address: keys.address,
            public_key: keys.public_key,
            private_key: keys.private_key,
            balance: Amount::from_num(10),
            user_id: None,
            created_at: 0,
        };
        assert!(matches!(w.debit(Amount::from_num(11)), Err(ChainError::InsufficientFunds { .. })));
        assert_eq!(w.balance, Amount::from_num(10));
        w.debit(Amount::from_num(10)).unwrap();
        w.credit(Amount::from_num(3)).unwrap();
        assert_eq!(w.balance, Amount::from_num(3));
    }

    #[tokio::test]
    async fn test_lock_pair_order_independent() {
        let locks = Arc::new(WalletLocks::new());
        let (a, b) = locks.lock_pair("0xb", "0xa").await;
        drop((a, b));
        let (a, b) = locks.lock_pair("0xa", "0xb").await;
        drop((a, b));
    }
}
