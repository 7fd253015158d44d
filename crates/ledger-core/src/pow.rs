//! Proof-of-work search and verification.
//!
//! A hash satisfies difficulty `d` when its first `d` hex characters are all
//! `'0'`. The search walks nonces upward from 0 and re-hashes after each step.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

use crate::config::LedgerConfig;
use crate::constants::DEADLINE_CHECK_INTERVAL;
use crate::{Block, CandidateBlock};

/// Number of leading `'0'` characters in a hex digest.
pub fn count_leading_zero_digits(hash: &str) -> usize {
    hash.bytes().take_while(|b| *b == b'0').count()
}

pub fn meets_difficulty(hash: &str, difficulty: usize) -> bool {
    hash.len() >= difficulty && hash.bytes().take(difficulty).all(|b| b == b'0')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum ProofFailure {
    #[error("hash does not have the required leading zeros")]
    InsufficientWork,
    #[error("hash does not match the block contents")]
    HashMismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    #[error("cancelled by caller")]
    Cancelled,
    #[error("a competing block was committed for the same slot")]
    Superseded,
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("iteration limit reached")]
    IterationsExhausted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MineOutcome {
    Found { nonce: u64, hash: String },
    Aborted(AbortReason),
}

impl MineOutcome {
    pub fn is_found(&self) -> bool {
        matches!(self, MineOutcome::Found { .. })
    }
}

/// Shared flag a caller flips to abandon an in-flight search.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Guard that cancels the token when dropped, e.g. with an abandoned request.
    pub fn drop_guard(&self) -> CancelGuard {
        CancelGuard(self.clone())
    }
}

pub struct CancelGuard(CancelToken);

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Watches the ledger's commit counter; stale once any block lands after `seen`.
#[derive(Clone, Debug)]
pub struct TipWatch {
    counter: Arc<AtomicU64>,
    seen: u64,
}

impl TipWatch {
    pub fn new(counter: Arc<AtomicU64>) -> Self {
        let seen = counter.load(Ordering::Acquire);
        Self { counter, seen }
    }

    pub fn is_stale(&self) -> bool {
        self.counter.load(Ordering::Acquire) != self.seen
    }
}

/// Bounds on a single search. The default is unbounded.
#[derive(Clone, Debug, Default)]
pub struct MineControl {
    // any one of these cancels the search
    cancel: Vec<CancelToken>,
    deadline: Option<Instant>,
    max_iterations: Option<u64>,
    tip: Option<TipWatch>,
}

impl MineControl {
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Limits from config; the deadline clock starts now.
    pub fn from_config(config: &LedgerConfig) -> Self {
        let mut control = Self::unbounded();
        if let Some(deadline) = config.deadline() {
            control = control.with_timeout(deadline);
        }
        if let Some(max) = config.max_iterations {
            control = control.with_max_iterations(max);
        }
        control
    }

    /// Add a token; may be called repeatedly, e.g. per request and per process.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel.push(token);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_max_iterations(mut self, max: u64) -> Self {
        self.max_iterations = Some(max);
        self
    }

    pub fn with_tip_watch(mut self, tip: TipWatch) -> Self {
        self.tip = Some(tip);
        self
    }

    /// Reason to stop before trying the next nonce, given `tried` attempts so far.
    pub fn check(&self, tried: u64) -> Option<AbortReason> {
        if self.cancel.iter().any(CancelToken::is_cancelled) {
            return Some(AbortReason::Cancelled);
        }
        if self.tip.as_ref().is_some_and(TipWatch::is_stale) {
            return Some(AbortReason::Superseded);
        }
        if self.max_iterations.is_some_and(|max| tried >= max) {
            return Some(AbortReason::IterationsExhausted);
        }
        if tried % DEADLINE_CHECK_INTERVAL == 0
            && self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
        {
            return Some(AbortReason::DeadlineExceeded);
        }
        None
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProofOfWork {
    difficulty: usize,
}

impl ProofOfWork {
    pub fn new(difficulty: usize) -> Self {
        Self { difficulty }
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    pub fn meets_difficulty(&self, hash: &str) -> bool {
        meets_difficulty(hash, self.difficulty)
    }

    /// Search from nonce 0 until the hash satisfies the difficulty, with no
    /// bound on iterations. Leaves the winning nonce in `candidate`.
    pub fn mine(&self, candidate: &mut CandidateBlock) -> String {
        match self.search(candidate, &MineControl::unbounded()) {
            MineOutcome::Found { hash, .. } => hash,
            // Only reachable after exhausting all 2^64 nonces.
            MineOutcome::Aborted(_) => candidate.hash(),
        }
    }

    /// Bounded search. On `Found` the candidate's nonce is the winning one;
    /// on abort the candidate should be discarded.
    pub fn search(&self, candidate: &mut CandidateBlock, control: &MineControl) -> MineOutcome {
        let template = candidate.hash_template();
        let mut tried = 0u64;
        let mut nonce = 0u64;
        loop {
            if let Some(reason) = control.check(tried) {
                debug!(index = candidate.index, tried, %reason, "proof-of-work search aborted");
                return MineOutcome::Aborted(reason);
            }
            let hash = template.hash_with_nonce(nonce);
            tried += 1;
            if self.meets_difficulty(&hash) {
                candidate.nonce = nonce;
                return MineOutcome::Found { nonce, hash };
            }
            nonce = match nonce.checked_add(1) {
                Some(next) => next,
                None => return MineOutcome::Aborted(AbortReason::IterationsExhausted),
            };
        }
    }

    pub fn check_proof(&self, block: &Block, claimed_hash: &str) -> Result<(), ProofFailure> {
        if !self.meets_difficulty(claimed_hash) {
            return Err(ProofFailure::InsufficientWork);
        }
        if block.recompute_hash() != claimed_hash {
            return Err(ProofFailure::HashMismatch);
        }
        Ok(())
    }

    /// True iff `claimed_hash` has the difficulty prefix and equals the
    /// block's recomputed hash. Both conditions are required.
    pub fn is_valid_proof(&self, block: &Block, claimed_hash: &str) -> bool {
        self.check_proof(block, claimed_hash).is_ok()
    }
}
