// Thin re-export module: block structure, chain bookkeeping and validation
// live in `blockchain/core.rs`; the mining engine sits on top of them.

pub mod core;
pub mod engine;

pub use core::*;
pub use engine::{EngineSettings, LedgerEngine};
