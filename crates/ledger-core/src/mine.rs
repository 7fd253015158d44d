use crate::pow::{AbortReason, MineControl, MineOutcome, ProofOfWork};
use crate::CandidateBlock;
use rayon::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use tracing::info;

/// Runs a search either serially or across the rayon pool, per ledger config.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Miner {
    pow: ProofOfWork,
    parallel: bool,
}

impl Miner {
    pub fn new(pow: ProofOfWork, parallel: bool) -> Self {
        Self { pow, parallel }
    }

    pub fn proof_of_work(&self) -> ProofOfWork {
        self.pow
    }

    pub fn run(&self, candidate: &mut CandidateBlock, control: &MineControl) -> MineOutcome {
        let outcome = if self.parallel {
            mine_parallel(&self.pow, candidate, control)
        } else {
            self.pow.search(candidate, control)
        };
        if let MineOutcome::Found { nonce, hash } = &outcome {
            info!(
                "Mined block {} with nonce {} and hash {}",
                candidate.index, nonce, hash
            );
        }
        outcome
    }
}

/// Searches nonces in parallel until a hash has `difficulty` leading zero
/// digits. The winning nonce is not necessarily the smallest one.
pub fn mine_parallel(
    pow: &ProofOfWork,
    candidate: &mut CandidateBlock,
    control: &MineControl,
) -> MineOutcome {
    // Only the nonce varies per attempt.
    let template = candidate.hash_template();
    let tried = AtomicU64::new(0);
    let aborted: OnceLock<AbortReason> = OnceLock::new();

    let hit = (0u64..u64::MAX).into_par_iter().find_any(|nonce| {
        if aborted.get().is_some() {
            return true;
        }
        let attempt = tried.fetch_add(1, Ordering::Relaxed);
        if let Some(reason) = control.check(attempt) {
            let _ = aborted.set(reason);
            return true;
        }
        pow.meets_difficulty(&template.hash_with_nonce(*nonce))
    });

    // `find_any` also stops on the abort path, so re-check the returned nonce.
    if let Some(nonce) = hit {
        let hash = template.hash_with_nonce(nonce);
        if pow.meets_difficulty(&hash) {
            candidate.nonce = nonce;
            return MineOutcome::Found { nonce, hash };
        }
    }
    MineOutcome::Aborted(
        aborted
            .get()
            .copied()
            .unwrap_or(AbortReason::IterationsExhausted),
    )
}
