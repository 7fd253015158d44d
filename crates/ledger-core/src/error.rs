use thiserror::Error;

use crate::pow::{AbortReason, ProofFailure};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("difficulty {difficulty} exceeds the {max} hex characters of a digest")]
    DifficultyTooHigh { difficulty: usize, max: usize },

    #[error("max_iterations must be greater than zero when set")]
    ZeroIterations,
}

/// Typed outcomes of rejected ledger operations. None of these leave the
/// chain or the pending pool partially modified.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("no pending transactions to mine")]
    EmptyPool,

    #[error("previous hash mismatch: chain tip is {expected}, block links to {found}")]
    LinkageMismatch { expected: String, found: String },

    #[error("block index mismatch: expected {expected}, got {found}")]
    IndexMismatch { expected: u64, found: u64 },

    #[error("invalid proof of work for block {index}: {reason}")]
    InvalidProof { index: u64, reason: ProofFailure },

    #[error("mining aborted: {0}")]
    MiningAborted(AbortReason),

    #[error("ledger has no genesis block; call init() first")]
    NotInitialized,

    #[error("supplied chain fails verification at block {index}")]
    InvalidChain { index: u64 },

    #[error("genesis block already exists")]
    AlreadyInitialized,

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, LedgerError>;
