//! Thread-safe handle for mining off the caller's thread.
//!
//! The lock is held only to snapshot the pool and to commit; the nonce
//! search itself runs unlocked, so submissions keep landing in the pool
//! while a block is being mined.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{info, warn};

use crate::error::{LedgerError, Result};
use crate::ledger::{ChainValidity, Ledger, MiningJob};
use crate::pow::{CancelToken, MineControl, MineOutcome, TipWatch};
use crate::{Block, Transaction};

#[derive(Clone)]
pub struct SharedLedger {
    inner: Arc<Mutex<Ledger>>,
    // bumped on every commit; searches watching it abort as superseded
    commits: Arc<AtomicU64>,
}

impl SharedLedger {
    pub fn new(ledger: Ledger) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ledger)),
            commits: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Mine genesis. Holds the lock for the whole search; call once at startup.
    pub fn init(&self) -> Result<Block> {
        let control = self.with_ledger(|l| MineControl::from_config(l.config()));
        self.init_with(&control)
    }

    pub fn init_with(&self, control: &MineControl) -> Result<Block> {
        let mut ledger = self.inner.lock();
        let genesis = ledger.init_with(control)?.clone();
        self.commits.fetch_add(1, Ordering::AcqRel);
        Ok(genesis)
    }

    pub fn submit_transaction(&self, tx: Transaction) -> u64 {
        self.inner.lock().submit_transaction(tx)
    }

    /// Mine the current pool. New submissions during the search stay pending;
    /// only the snapshot taken here is removed on commit.
    pub fn mine_pending(&self, cancel: CancelToken) -> Result<Block> {
        self.mine_pending_cancelable([cancel])
    }

    /// Like [`SharedLedger::mine_pending`], abandoned when any token fires.
    pub fn mine_pending_cancelable(
        &self,
        tokens: impl IntoIterator<Item = CancelToken>,
    ) -> Result<Block> {
        let (job, control, miner) = {
            let ledger = self.inner.lock();
            let job = ledger.prepare_mining()?;
            let control = tokens
                .into_iter()
                .fold(MineControl::from_config(ledger.config()), MineControl::with_cancel)
                .with_tip_watch(TipWatch::new(self.commits.clone()));
            (job, control, ledger.miner())
        };

        let MiningJob {
            mut candidate,
            snapshot,
        } = job;
        let hash = match miner.run(&mut candidate, &control) {
            MineOutcome::Found { hash, .. } => hash,
            MineOutcome::Aborted(reason) => {
                warn!(index = candidate.index, %reason, "mining abandoned");
                return Err(LedgerError::MiningAborted(reason));
            }
        };

        let block = candidate.seal(hash);
        let mut ledger = self.inner.lock();
        ledger.commit(block.clone(), &snapshot)?;
        self.commits.fetch_add(1, Ordering::AcqRel);
        info!(index = block.index, mined = snapshot.len(), "pending transactions committed");
        Ok(block)
    }

    /// Run [`SharedLedger::mine_pending`] on a worker thread.
    pub fn spawn_mining(&self) -> MiningHandle {
        self.spawn_mining_with(CancelToken::new())
    }

    pub fn spawn_mining_with(&self, cancel: CancelToken) -> MiningHandle {
        let ledger = self.clone();
        let token = cancel.clone();
        let handle = thread::spawn(move || ledger.mine_pending(token));
        MiningHandle { cancel, handle }
    }

    /// Offer an externally mined block. A success supersedes in-flight searches.
    pub fn append(&self, block: Block) -> Result<()> {
        let mut ledger = self.inner.lock();
        ledger.append(block)?;
        self.commits.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    pub fn get_chain(&self) -> Vec<Block> {
        self.inner.lock().get_chain()
    }

    pub fn validate_chain(&self) -> ChainValidity {
        self.inner.lock().validate_chain()
    }

    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.inner.lock().pending_transactions()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn with_ledger<R>(&self, f: impl FnOnce(&Ledger) -> R) -> R {
        f(&self.inner.lock())
    }
}

pub struct MiningHandle {
    cancel: CancelToken,
    handle: JoinHandle<Result<Block>>,
}

impl MiningHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn join(self) -> Result<Block> {
        match self.handle.join() {
            Ok(result) => result,
            Err(payload) => std::panic::resume_unwind(payload),
        }
    }
}
