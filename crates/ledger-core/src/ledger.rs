//! Chain state and the pending-transaction pool.
//!
//! The [`Ledger`] is the only owner of both. It moves through
//! `Empty -> Genesis-committed -> (submit | mine)*`; genesis is mined by an
//! explicit [`Ledger::init`] call, never by the constructor.

use tracing::{debug, info, warn};

use crate::config::LedgerConfig;
use crate::constants::GENESIS_PREVIOUS_HASH;
use crate::error::{LedgerError, Result};
use crate::mine::Miner;
use crate::pow::{MineControl, MineOutcome, ProofOfWork};
use crate::{Block, CandidateBlock, Transaction};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainValidity {
    Valid,
    InvalidAt(u64),
}

impl ChainValidity {
    pub fn is_valid(&self) -> bool {
        matches!(self, ChainValidity::Valid)
    }
}

/// Transactions waiting for a block. Each entry gets a sequence id so a
/// commit can drop exactly the entries it mined.
#[derive(Clone, Debug, Default)]
struct PendingPool {
    next_id: u64,
    entries: Vec<(u64, Transaction)>,
}

impl PendingPool {
    fn push(&mut self, tx: Transaction) {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push((id, tx));
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn transactions(&self) -> Vec<Transaction> {
        self.entries.iter().map(|(_, tx)| tx.clone()).collect()
    }

    fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            ids: self.entries.iter().map(|(id, _)| *id).collect(),
        }
    }

    fn discard(&mut self, snapshot: &PoolSnapshot) {
        // ids are handed out in increasing order, so the snapshot is sorted
        self.entries
            .retain(|(id, _)| snapshot.ids.binary_search(id).is_err());
    }
}

/// The pool entries a mining job took, by sequence id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolSnapshot {
    ids: Vec<u64>,
}

impl PoolSnapshot {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// A candidate built from the current tip plus the pool entries it consumes.
#[derive(Clone, Debug)]
pub struct MiningJob {
    pub candidate: CandidateBlock,
    pub snapshot: PoolSnapshot,
}

#[derive(Clone, Debug)]
pub struct Ledger {
    config: LedgerConfig,
    miner: Miner,
    chain: Vec<Block>,
    pool: PendingPool,
}

impl Ledger {
    /// An empty ledger; nothing is mined until [`Ledger::init`].
    pub fn new(config: LedgerConfig) -> Result<Self> {
        config.validate()?;
        let miner = Miner::new(ProofOfWork::new(config.difficulty), config.parallel);
        Ok(Self {
            config,
            miner,
            chain: Vec::new(),
            pool: PendingPool::default(),
        })
    }

    /// Resume from blocks previously exported with [`Ledger::get_chain`].
    /// Every block is re-verified; the pool starts empty.
    pub fn from_chain(config: LedgerConfig, blocks: Vec<Block>) -> Result<Self> {
        let mut ledger = Self::new(config)?;
        if let ChainValidity::InvalidAt(index) = validate_blocks(&blocks, &ledger.proof_of_work()) {
            return Err(LedgerError::InvalidChain { index });
        }
        info!(blocks = blocks.len(), "ledger restored");
        ledger.chain = blocks;
        Ok(ledger)
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn proof_of_work(&self) -> ProofOfWork {
        self.miner.proof_of_work()
    }

    pub fn miner(&self) -> Miner {
        self.miner
    }

    /// Mine and commit the genesis block at the configured difficulty.
    pub fn init(&mut self) -> Result<&Block> {
        self.init_with(&MineControl::from_config(&self.config))
    }

    pub fn init_with(&mut self, control: &MineControl) -> Result<&Block> {
        if !self.chain.is_empty() {
            return Err(LedgerError::AlreadyInitialized);
        }
        let mut candidate = CandidateBlock::genesis();
        let block = match self.miner.run(&mut candidate, control) {
            MineOutcome::Found { hash, .. } => candidate.seal(hash),
            MineOutcome::Aborted(reason) => {
                warn!(%reason, "genesis mining aborted");
                return Err(LedgerError::MiningAborted(reason));
            }
        };
        check_genesis(&self.proof_of_work(), &block)?;
        info!(hash = %block.hash, difficulty = self.config.difficulty, "genesis block committed");
        self.chain.push(block);
        Ok(&self.chain[0])
    }

    /// Queue a transaction. Always accepted; returns the index of the block it
    /// is expected to land in.
    pub fn submit_transaction(&mut self, tx: Transaction) -> u64 {
        debug!(sender = %tx.sender, recipient = %tx.recipient, amount = tx.amount, "transaction queued");
        self.pool.push(tx);
        self.next_index()
    }

    fn next_index(&self) -> u64 {
        self.chain.last().map_or(1, |tip| tip.index + 1)
    }

    /// Snapshot the pool onto a candidate extending the current tip.
    pub fn prepare_mining(&self) -> Result<MiningJob> {
        let tip = self.last_block().ok_or(LedgerError::NotInitialized)?;
        if self.pool.is_empty() {
            return Err(LedgerError::EmptyPool);
        }
        Ok(MiningJob {
            candidate: CandidateBlock::new(tip.index + 1, self.pool.transactions(), tip.hash.clone()),
            snapshot: self.pool.snapshot(),
        })
    }

    /// Append a mined block and drop exactly the snapshot's entries from the pool.
    pub fn commit(&mut self, block: Block, snapshot: &PoolSnapshot) -> Result<u64> {
        let index = block.index;
        self.append(block)?;
        self.pool.discard(snapshot);
        Ok(index)
    }

    /// Mine every pending transaction into one block and return its index.
    pub fn mine_pending(&mut self) -> Result<u64> {
        let control = MineControl::from_config(&self.config);
        self.mine_pending_with(&control)
    }

    pub fn mine_pending_with(&mut self, control: &MineControl) -> Result<u64> {
        let MiningJob {
            mut candidate,
            snapshot,
        } = self.prepare_mining()?;
        match self.miner.run(&mut candidate, control) {
            MineOutcome::Found { hash, .. } => self.commit(candidate.seal(hash), &snapshot),
            MineOutcome::Aborted(reason) => {
                warn!(index = candidate.index, %reason, "mining aborted; pool left intact");
                Err(LedgerError::MiningAborted(reason))
            }
        }
    }

    /// Append `block` after checking linkage, index and proof. A rejected
    /// block leaves the chain untouched.
    pub fn append(&mut self, block: Block) -> Result<()> {
        let tip = self.last_block().ok_or(LedgerError::NotInitialized)?;
        if let Err(err) = check_link(&self.proof_of_work(), tip, &block) {
            warn!(index = block.index, %err, "block rejected");
            return Err(err);
        }
        info!(index = block.index, hash = %block.hash, txs = block.transactions.len(), "block appended");
        self.chain.push(block);
        Ok(())
    }

    pub fn validate_chain(&self) -> ChainValidity {
        validate_blocks(&self.chain, &self.proof_of_work())
    }

    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    pub fn get_chain(&self) -> Vec<Block> {
        self.chain.clone()
    }

    pub fn last_block(&self) -> Option<&Block> {
        self.chain.last()
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.pool.transactions()
    }

    pub fn pending_len(&self) -> usize {
        self.pool.len()
    }
}

fn check_genesis(pow: &ProofOfWork, block: &Block) -> Result<()> {
    if block.index != 0 {
        return Err(LedgerError::IndexMismatch {
            expected: 0,
            found: block.index,
        });
    }
    if block.previous_hash != GENESIS_PREVIOUS_HASH {
        return Err(LedgerError::LinkageMismatch {
            expected: GENESIS_PREVIOUS_HASH.to_string(),
            found: block.previous_hash.clone(),
        });
    }
    pow.check_proof(block, &block.hash)
        .map_err(|reason| LedgerError::InvalidProof { index: 0, reason })
}

fn check_link(pow: &ProofOfWork, prev: &Block, block: &Block) -> Result<()> {
    if block.previous_hash != prev.hash {
        return Err(LedgerError::LinkageMismatch {
            expected: prev.hash.clone(),
            found: block.previous_hash.clone(),
        });
    }
    if block.index != prev.index + 1 {
        return Err(LedgerError::IndexMismatch {
            expected: prev.index + 1,
            found: block.index,
        });
    }
    pow.check_proof(block, &block.hash)
        .map_err(|reason| LedgerError::InvalidProof {
            index: block.index,
            reason,
        })
}

/// Re-verify genesis and then every link; reports the first bad position.
pub fn validate_blocks(blocks: &[Block], pow: &ProofOfWork) -> ChainValidity {
    let Some(genesis) = blocks.first() else {
        return ChainValidity::Valid;
    };
    if let Err(err) = check_genesis(pow, genesis) {
        warn!(%err, "chain invalid at genesis");
        return ChainValidity::InvalidAt(0);
    }
    for (position, pair) in blocks.windows(2).enumerate() {
        if let Err(err) = check_link(pow, &pair[0], &pair[1]) {
            let at = position as u64 + 1;
            warn!(index = at, %err, "chain invalid");
            return ChainValidity::InvalidAt(at);
        }
    }
    ChainValidity::Valid
}
