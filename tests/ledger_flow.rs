//! Integration tests for transfers and mining against the engines directly

use mycoin::amount::Amount;
use mycoin::config::Config;
use mycoin::error::{ChainError, Side};
use mycoin::node::Node;
use mycoin::persistence::{InMemoryStore, LedgerStore};
use mycoin::transaction::TxStatus;
use mycoin::wallet::CreatedWallet;
use std::sync::Arc;
use tempfile::TempDir;

fn test_config() -> Config {
    let mut config = Config::default();
    config.mining.difficulty = 1;
    config.mining.transfer_difficulty = 1;
    config.mining.cycle_pause_ms = 10;
    config
}

fn memory_node() -> Arc<Node> {
    Arc::new(Node::with_store(test_config(), Arc::new(InMemoryStore::new()), true).unwrap())
}

fn balance(node: &Node, wallet: &CreatedWallet) -> Amount {
    node.wallets.wallet_stats(&wallet.address).unwrap().balance
}

#[tokio::test]
async fn test_transfer_scenario() {
    let node = memory_node();
    let a = node.wallets.create_wallet(Some("a".into()), None).unwrap();
    let b = node.wallets.create_wallet(Some("b".into()), None).unwrap();

    let record = node
        .transfers
        .transfer(&a.address, &b.address, Amount::from_num(25), &a.private_key)
        .await
        .unwrap();

    assert_eq!(balance(&node, &a), Amount::from_num(75));
    assert_eq!(balance(&node, &b), Amount::from_num(125));

    let stored = node.store.find_transactions_by_address(&a.address).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status, TxStatus::Confirmed);
    assert_eq!(stored[0].from_address.as_deref(), Some(a.address.as_str()));
    assert_eq!(stored[0].to_address, b.address);
    assert_eq!(stored[0].amount, Amount::from_num(25));

    let history: Vec<_> = node.transfers.history(&a.address).unwrap().collect();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].hash, record.hash);
    assert_eq!(node.ledger.pending(), vec![record]);
}

#[tokio::test]
async fn test_overdraft_leaves_balances_unchanged() {
    let node = memory_node();
    let a = node.wallets.create_wallet(None, None).unwrap();
    let b = node.wallets.create_wallet(None, None).unwrap();

    let result = node
        .transfers
        .transfer(&a.address, &b.address, Amount::from_num(100.5), &a.private_key)
        .await;
    assert!(matches!(result, Err(ChainError::InsufficientFunds { .. })));
    assert_eq!(balance(&node, &a), Amount::from_num(100));
    assert_eq!(balance(&node, &b), Amount::from_num(100));
    assert_eq!(node.store.count_transactions().unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_double_spend() {
    let node = memory_node();
    let a = node.wallets.create_wallet(None, None).unwrap();
    let b = node.wallets.create_wallet(None, None).unwrap();
    let c = node.wallets.create_wallet(None, None).unwrap();

    let spend = |to: String| {
        let node = node.clone();
        let from = a.address.clone();
        let key = a.private_key.clone();
        tokio::spawn(async move {
            node.transfers
                .transfer(&from, &to, Amount::from_num(60), &key)
                .await
        })
    };

    let first = spend(b.address.clone());
    let second = spend(c.address.clone());
    let results = [first.await.unwrap(), second.await.unwrap()];

    let successes = results.iter().filter(|r| r.is_ok()).count();
    let overdrafts = results
        .iter()
        .filter(|r| matches!(r, Err(ChainError::InsufficientFunds { .. })))
        .count();
    assert_eq!((successes, overdrafts), (1, 1));

    assert_eq!(balance(&node, &a), Amount::from_num(40));
    let total = balance(&node, &a) + balance(&node, &b) + balance(&node, &c);
    assert_eq!(total, Amount::from_num(300));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_identical_concurrent_transfers_all_succeed() {
    let node = memory_node();
    let a = node.wallets.create_wallet(None, None).unwrap();
    let b = node.wallets.create_wallet(None, None).unwrap();

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let node = node.clone();
            let (from, to, key) = (a.address.clone(), b.address.clone(), a.private_key.clone());
            tokio::spawn(async move {
                node.transfers
                    .transfer(&from, &to, Amount::from_num(1), &key)
                    .await
            })
        })
        .collect();

    let mut hashes = std::collections::HashSet::new();
    for handle in handles {
        let record = handle.await.unwrap().unwrap();
        hashes.insert(record.hash);
    }

    assert_eq!(hashes.len(), 10);
    assert_eq!(node.ledger.pending().len(), 10);
    assert_eq!(balance(&node, &a), Amount::from_num(90));
    assert_eq!(balance(&node, &b), Amount::from_num(110));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_value_is_conserved() {
    let node = memory_node();
    let wallets: Vec<_> = (0..3)
        .map(|_| node.wallets.create_wallet(None, None).unwrap())
        .collect();

    let mut handles = Vec::new();
    for i in 0..6 {
        let node = node.clone();
        let from = wallets[i % 3].clone();
        let to = wallets[(i + 1) % 3].address.clone();
        handles.push(tokio::spawn(async move {
            node.transfers
                .transfer(&from.address, &to, Amount::from_num(10 + i as i32), &from.private_key)
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let total: Amount = wallets.iter().map(|w| balance(&node, w)).sum();
    assert_eq!(total, Amount::from_num(300));
    assert_eq!(node.store.count_transactions().unwrap(), 6);
}

#[tokio::test]
async fn test_mine_block_includes_pending_and_pays_reward() {
    let node = memory_node();
    let a = node.wallets.create_wallet(None, None).unwrap();
    let b = node.wallets.create_wallet(None, None).unwrap();
    let miner = node.wallets.create_wallet(None, None).unwrap();

    let record = node
        .transfers
        .transfer(&a.address, &b.address, Amount::from_num(5), &a.private_key)
        .await
        .unwrap();

    let total_before: Amount = [&a, &b, &miner].iter().map(|w| balance(&node, w)).sum();
    let block = node.ledger.mine_block(&miner.address).await.unwrap();
    assert!(block.hash.starts_with('0'));

    let reward = block.transactions.iter().find(|t| t.is_reward()).unwrap().amount;
    let total_after: Amount = [&a, &b, &miner].iter().map(|w| balance(&node, w)).sum();
    assert_eq!(total_after - total_before, reward);
    assert!(block.transactions.contains(&record));
    assert!(node.ledger.pending().is_empty());
    assert!(balance(&node, &miner) >= Amount::from_num(150));

    let history: Vec<_> = node.transfers.history(&miner.address).unwrap().collect();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].with_address, None);

    node.ledger.validate_chain().await.unwrap();
    let blocks = node.ledger.blocks().await;
    assert_eq!(blocks[1].previous_hash, blocks[0].hash);
}

#[tokio::test]
async fn test_unknown_miner_is_rejected() {
    let node = memory_node();
    assert_eq!(
        node.ledger.mine_block("0xunknown").await,
        Err(ChainError::WalletNotFound(Side::Miner, "0xunknown".to_string()))
    );
}

#[tokio::test]
async fn test_mining_loop_start_stop() {
    let node = memory_node();
    let miner = node.wallets.create_wallet(None, None).unwrap();

    assert_eq!(node.ledger.start(), Err(ChainError::MiningNotConfigured));
    node.ledger.set_mining_address(&miner.address).unwrap();
    node.ledger.start().unwrap();

    for _ in 0..250 {
        if node.ledger.blocks_mined() >= 2 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    node.ledger.stop().await.unwrap();
    node.ledger.stop().await.unwrap();
    assert!(!node.ledger.status().await.mining);
    assert!(node.ledger.blocks_mined() >= 2);
    node.ledger.validate_chain().await.unwrap();
}

#[tokio::test]
async fn test_sqlite_backed_ledger_survives_restart() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config();
    config.database.path = dir.path().join("mycoin.db").to_string_lossy().into_owned();

    let (a, b) = {
        let node = Node::from_config(config.clone()).unwrap();
        let a = node.wallets.create_wallet(None, None).unwrap();
        let b = node.wallets.create_wallet(None, None).unwrap();
        node.transfers
            .transfer(&a.address, &b.address, Amount::from_num(12.5), &a.private_key)
            .await
            .unwrap();
        node.ledger.mine_block(&b.address).await.unwrap();
        (a, b)
    };

    let node = Node::from_config(config).unwrap();
    assert_eq!(node.ledger.height().await, 1);
    assert_eq!(balance(&node, &a), Amount::from_num(87.5));
    assert!(balance(&node, &b) >= Amount::from_num(162.5));
    node.ledger.validate_chain().await.unwrap();

    let page = node.transfers.transactions_page(1, 10).unwrap();
    assert_eq!(page.pagination.total, 2);
}
