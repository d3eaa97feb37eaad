//! Proof-of-work nonce search.
//!
//! A `Work` item knows how to produce its canonical hash for a candidate
//! nonce. The searcher walks nonces from zero until a hash with `difficulty`
//! leading zero hex digits is found.

use crate::error::ChainError;
use crate::hashing;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Upper bound for a difficulty: a hex SHA-256 digest has 64 characters.
pub const MAX_DIFFICULTY: u32 = hashing::HASH_HEX_LEN as u32;

/// How many nonces are tried between two checks of the cancel flag.
const CANCEL_CHECK_INTERVAL: u64 = 1024;

/// Something that can be hashed with a substituted nonce.
pub trait Work {
    fn hash_with_nonce(&self, nonce: u64) -> Result<String, ChainError>;
}

/// Cooperative cancellation signal shared between a searcher and its owner.
///
/// A [`child`](Self::child) flag reads as cancelled once its parent is, but
/// cancelling the child leaves the parent untouched.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    own: Arc<AtomicBool>,
    parent: Option<Arc<AtomicBool>>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child(&self) -> Self {
        Self {
            own: Arc::new(AtomicBool::new(false)),
            parent: Some(self.own.clone()),
        }
    }

    pub fn cancel(&self) {
        self.own.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.own.load(Ordering::Relaxed)
            || self.parent.as_ref().is_some_and(|p| p.load(Ordering::Relaxed))
    }
}

/// Cancels `flag` when dropped while still armed.
struct CancelOnDrop {
    flag: CancelFlag,
    armed: bool,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.flag.cancel();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProofOfWork {
    difficulty: u32,
}

/// Result of a successful search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Solution {
    pub nonce: u64,
    pub hash: String,
}

impl ProofOfWork {
    /// Difficulty 0 is accepted here and makes every hash valid.
    pub fn new(difficulty: u32) -> Result<Self, ChainError> {
        if difficulty > MAX_DIFFICULTY {
            return Err(ChainError::InvalidDifficulty(difficulty as u64));
        }
        Ok(Self { difficulty })
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn meets_target(&self, hash: &str) -> bool {
        hashing::leading_zero_digits(hash) >= self.difficulty as usize
    }

    /// Finds the first nonce whose hash meets the target.
    ///
    /// Fails with `SearchCancelled` once `cancel` is set.
    pub fn search<W: Work + ?Sized>(&self, work: &W, cancel: &CancelFlag) -> Result<Solution, ChainError> {
        let mut nonce: u64 = 0;
        loop {
            if nonce % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return Err(ChainError::SearchCancelled);
            }

            let hash = work.hash_with_nonce(nonce)?;
            if self.meets_target(&hash) {
                return Ok(Solution { nonce, hash });
            }

            if nonce > 0 && nonce % 100_000 == 0 {
                tracing::debug!(nonce, difficulty = self.difficulty, "pow.search still running");
            }

            nonce = nonce.checked_add(1).ok_or_else(|| {
                ChainError::InvalidBlock("Nonce space exhausted".to_string())
            })?;
        }
    }

    /// Runs [`search`](Self::search) on the blocking pool and hands the work
    /// item back with its solution.
    ///
    /// Dropping the returned future before it completes cancels `cancel`, so
    /// an abandoned caller does not leave the blocking thread spinning.
    pub async fn search_blocking<W>(&self, work: W, cancel: CancelFlag) -> Result<(W, Solution), ChainError>
    where
        W: Work + Send + 'static,
    {
        let pow = *self;
        let mut guard = CancelOnDrop {
            flag: cancel.clone(),
            armed: true,
        };
        let joined = tokio::task::spawn_blocking(move || {
            let solution = pow.search(&work, &cancel)?;
            Ok((work, solution))
        })
        .await;
        guard.armed = false;

        joined.map_err(|e| ChainError::TaskFailed(format!("Proof-of-work search task: {}", e)))?
    }

    /// Recomputes the hash for `nonce` and checks both equality and target.
    pub fn verify<W: Work + ?Sized>(&self, work: &W, nonce: u64, hash: &str) -> bool {
        match work.hash_with_nonce(nonce) {
            Ok(computed) => computed == hash && self.meets_target(hash),
            Err(_) => false,
        }
    }
}
