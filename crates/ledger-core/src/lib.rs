pub mod config;
pub mod constants;
pub mod error;
pub mod ledger;
pub mod mine;
pub mod pow;
pub mod shared;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::constants::{GENESIS_PREVIOUS_HASH, HASH_SIZE};

pub use config::LedgerConfig;
pub use error::{ConfigError, LedgerError, Result};
pub use ledger::{ChainValidity, Ledger, MiningJob, PoolSnapshot};
pub use pow::{AbortReason, CancelToken, MineControl, MineOutcome, ProofFailure, ProofOfWork};
pub use shared::{MiningHandle, SharedLedger};

pub type Hash = [u8; HASH_SIZE];

/// Milliseconds since the Unix epoch. A clock set before 1970 reads as 0.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub sender: String,
    pub recipient: String,
    /// Any `f64`; non-finite values travel as `"NaN"`, `"inf"` or `"-inf"`.
    #[serde(with = "amount")]
    pub amount: f64,
}

impl Transaction {
    pub fn new(sender: impl Into<String>, recipient: impl Into<String>, amount: f64) -> Self {
        Self {
            sender: sender.into(),
            recipient: recipient.into(),
            amount,
        }
    }

    fn canonical_value(&self) -> Value {
        let mut fields = BTreeMap::new();
        fields.insert("amount", amount::to_value(self.amount));
        fields.insert("recipient", Value::from(self.recipient.as_str()));
        fields.insert("sender", Value::from(self.sender.as_str()));
        sorted_object(fields)
    }
}

/// JSON has no NaN or infinity, so those amounts are written as labels.
mod amount {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    const NAN: &str = "NaN";
    const INF: &str = "inf";
    const NEG_INF: &str = "-inf";

    fn label(amount: f64) -> Option<&'static str> {
        if amount.is_nan() {
            Some(NAN)
        } else if amount == f64::INFINITY {
            Some(INF)
        } else if amount == f64::NEG_INFINITY {
            Some(NEG_INF)
        } else {
            None
        }
    }

    pub(crate) fn to_value(amount: f64) -> Value {
        match label(amount) {
            Some(label) => Value::from(label),
            None => Value::from(amount),
        }
    }

    pub fn serialize<S: Serializer>(amount: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        match label(*amount) {
            Some(label) => serializer.serialize_str(label),
            None => serializer.serialize_f64(*amount),
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Label(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(n) => Ok(n),
            Repr::Label(label) => match label.as_str() {
                NAN => Ok(f64::NAN),
                INF => Ok(f64::INFINITY),
                NEG_INF => Ok(f64::NEG_INFINITY),
                other => Err(de::Error::invalid_value(
                    de::Unexpected::Str(other),
                    &"a number, \"NaN\", \"inf\" or \"-inf\"",
                )),
            },
        }
    }
}

fn sorted_object(fields: BTreeMap<&'static str, Value>) -> Value {
    Value::Object(
        fields
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect::<Map<String, Value>>(),
    )
}

/// Compact JSON of the hashed block fields with lexicographically sorted keys.
///
/// Both mining and validation hash exactly these bytes, so any change here
/// invalidates every existing chain.
pub fn canonical_encoding(
    index: u64,
    transactions: &[Transaction],
    timestamp: u64,
    previous_hash: &str,
    nonce: u64,
) -> String {
    let mut fields = BTreeMap::new();
    fields.insert("index", Value::from(index));
    fields.insert("nonce", Value::from(nonce));
    fields.insert("previous_hash", Value::from(previous_hash));
    fields.insert("timestamp", Value::from(timestamp));
    fields.insert(
        "transactions",
        Value::Array(transactions.iter().map(Transaction::canonical_value).collect()),
    );
    sorted_object(fields).to_string()
}

pub fn digest(bytes: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

pub fn canonical_hash(
    index: u64,
    transactions: &[Transaction],
    timestamp: u64,
    previous_hash: &str,
    nonce: u64,
) -> String {
    let encoded = canonical_encoding(index, transactions, timestamp, previous_hash, nonce);
    hex::encode(digest(encoded.as_bytes()))
}

/// The encoding split around the nonce, so a search only re-hashes the
/// nonce digits instead of re-serializing every transaction per trial.
///
/// Keys sort as `index < nonce < previous_hash < timestamp < transactions`,
/// which puts the nonce second.
#[derive(Clone, Debug)]
pub struct HashTemplate {
    prefix: String,
    suffix: String,
}

impl HashTemplate {
    pub fn hash_with_nonce(&self, nonce: u64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.prefix.as_bytes());
        hasher.update(nonce.to_string().as_bytes());
        hasher.update(self.suffix.as_bytes());
        let out: Hash = hasher.finalize().into();
        hex::encode(out)
    }
}

/// A block under construction. Only the nonce is expected to change, and
/// only while a proof-of-work search runs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CandidateBlock {
    pub index: u64,
    pub transactions: Vec<Transaction>,
    pub timestamp: u64,
    pub previous_hash: String,
    pub nonce: u64,
}

impl CandidateBlock {
    pub fn new(index: u64, transactions: Vec<Transaction>, previous_hash: impl Into<String>) -> Self {
        Self {
            index,
            transactions,
            timestamp: now_millis(),
            previous_hash: previous_hash.into(),
            nonce: 0,
        }
    }

    pub fn genesis() -> Self {
        Self::new(0, vec![], GENESIS_PREVIOUS_HASH)
    }

    pub fn canonical_encoding(&self) -> String {
        canonical_encoding(
            self.index,
            &self.transactions,
            self.timestamp,
            &self.previous_hash,
            self.nonce,
        )
    }

    pub fn hash(&self) -> String {
        canonical_hash(
            self.index,
            &self.transactions,
            self.timestamp,
            &self.previous_hash,
            self.nonce,
        )
    }

    pub fn hash_template(&self) -> HashTemplate {
        let mut rest = BTreeMap::new();
        rest.insert("previous_hash", Value::from(self.previous_hash.as_str()));
        rest.insert("timestamp", Value::from(self.timestamp));
        rest.insert(
            "transactions",
            Value::Array(
                self.transactions
                    .iter()
                    .map(Transaction::canonical_value)
                    .collect(),
            ),
        );
        let tail = sorted_object(rest).to_string();
        HashTemplate {
            prefix: format!("{{\"index\":{},\"nonce\":", self.index),
            suffix: format!(",{}", &tail[1..]),
        }
    }

    /// Freeze the candidate into a committed block carrying `hash`.
    ///
    /// The hash is taken as claimed; `Ledger::append` is what checks it.
    pub fn seal(self, hash: String) -> Block {
        Block {
            index: self.index,
            timestamp: self.timestamp,
            transactions: self.transactions,
            hash,
            previous_hash: self.previous_hash,
            nonce: self.nonce,
        }
    }

    /// Seal with the block's own recomputed hash.
    pub fn finalize(self) -> Block {
        let hash = self.hash();
        self.seal(hash)
    }
}

/// A committed block. Fields are read-only outside the crate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub(crate) index: u64,
    pub(crate) timestamp: u64,
    pub(crate) transactions: Vec<Transaction>,
    pub(crate) hash: String,
    pub(crate) previous_hash: String,
    pub(crate) nonce: u64,
}

impl Block {
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn previous_hash(&self) -> &str {
        &self.previous_hash
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Hash of the block's current contents, independent of the stored `hash`.
    pub fn recompute_hash(&self) -> String {
        canonical_hash(
            self.index,
            &self.transactions,
            self.timestamp,
            &self.previous_hash,
            self.nonce,
        )
    }

    pub fn to_candidate(&self) -> CandidateBlock {
        CandidateBlock {
            index: self.index,
            transactions: self.transactions.clone(),
            timestamp: self.timestamp,
            previous_hash: self.previous_hash.clone(),
            nonce: self.nonce,
        }
    }
}
