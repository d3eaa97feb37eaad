//! MyCoin - a proof-of-work ledger node with signed, atomic balance transfers
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Core Ledger
//! - [`blockchain`] - Blocks, chain validation and the mining engine
//! - [`transaction`] - Transaction records, history entries and validation
//! - [`transfer`] - Atomic peer-to-peer transfers and queries
//!
//! ## Consensus & Economics
//! - [`pow`] - Cancellable proof-of-work search
//! - [`economics`] - Miner reward schedule
//!
//! ## Cryptography
//! - [`hashing`] - Canonical SHA-256 digests
//! - [`crypto`] - Signatures and verification (secp256k1)
//!
//! ## State Management
//! - [`amount`] - Fixed-point amounts
//! - [`wallet`] - Wallets, HD key derivation (BIP-39/BIP-32) and locks
//! - [`persistence`] - Store abstraction (SQLite and in-memory)
//!
//! ## Node
//! - [`config`] - Configuration management
//! - [`error`] - Error types
//! - [`node`] - Process wiring
//! - [`api`] - REST API

#![forbid(unsafe_code)]

// ============================================================================
// Core Ledger
// ============================================================================
pub mod blockchain;
pub mod transaction;
pub mod transfer;

// ============================================================================
// Consensus & Economics
// ============================================================================
pub mod economics;
pub mod pow;

// ============================================================================
// Cryptography
// ============================================================================
pub mod crypto;
pub mod hashing;

// ============================================================================
// State Management
// ============================================================================
pub mod amount;
pub mod persistence;
pub mod wallet;

// ============================================================================
// Node & Configuration
// ============================================================================
pub mod config;
pub mod error;
pub mod node;

#[cfg(feature = "api")]
pub mod api;
