//! Blocks and the proof-of-work search

use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use serde::Serialize;

use crate::{hash::ContentHash, transaction::Transaction};

/// A mined block is accepted when the first four hex characters of its hash
/// sort below this string.
pub const POW_TARGET_PREFIX: &str = "0fff";

/// Nonces are drawn uniformly from `0..=MAX_NONCE`.
pub const MAX_NONCE: u32 = 999_999;

/// Maximum transactions taken from the pool per block.
pub const MAX_BLOCK_TRANSACTIONS: usize = 10;

/// Miner name recorded on the genesis block.
pub const GENESIS_MINER: &str = "genesis";

/// A block under construction. It has no hash until [`BlockCandidate::mine`]
/// succeeds.
#[derive(Debug, Clone)]
pub struct BlockCandidate {
    previous_hash: ContentHash,
    recall_hash: ContentHash,
    height: u64,
    timestamp: i64,
    miner: String,
    transactions: Vec<Arc<Transaction>>,
    cumulative_data_size: u64,
}

impl BlockCandidate {
    pub fn new(previous_hash: ContentHash, height: u64, miner: &str) -> Self {
        Self {
            previous_hash,
            recall_hash: ContentHash::ZERO,
            height,
            timestamp: Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            miner: miner.to_string(),
            transactions: Vec::new(),
            cumulative_data_size: 0,
        }
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn add_transaction(&mut self, tx: Arc<Transaction>) {
        self.cumulative_data_size += tx.data_size;
        self.transactions.push(tx);
    }

    pub fn set_recall_block(&mut self, recall: ContentHash) {
        self.recall_hash = recall;
    }

    /// The string every nonce attempt is appended to.
    fn mining_payload(&self) -> String {
        let mut payload = format!(
            "{}{}{}{}",
            self.previous_hash, self.recall_hash, self.height, self.timestamp
        );
        for tx in &self.transactions {
            payload.push_str(&tx.id.to_hex());
        }
        payload
    }

    /// Search for a nonce whose digest meets the target, then seal the block.
    ///
    /// There is no attempt cap: this blocks the caller until a nonce is found.
    pub fn mine(self) -> Block {
        let payload = self.mining_payload();
        let mut rng = rand::rng();
        loop {
            let nonce = rng.random_range(0..=MAX_NONCE).to_string();
            let hash = ContentHash::digest(format!("{payload}{nonce}"));
            if meets_target(&hash) {
                return Block {
                    hash,
                    previous_hash: self.previous_hash,
                    recall_hash: self.recall_hash,
                    height: self.height,
                    timestamp: self.timestamp,
                    miner: self.miner,
                    transactions: self.transactions,
                    cumulative_data_size: self.cumulative_data_size,
                    nonce,
                };
            }
        }
    }
}

/// Acceptance test for a mined hash. This is a plain string comparison of
/// the first four hex characters, not a numeric difficulty.
pub fn meets_target(hash: &ContentHash) -> bool {
    let hex = hash.to_hex();
    hex[..POW_TARGET_PREFIX.len()] < *POW_TARGET_PREFIX
}

/// A sealed block. Immutable once inserted into the ledger.
#[derive(Debug, Clone, Serialize)]
pub struct Block {
    pub hash: ContentHash,
    pub previous_hash: ContentHash,
    pub recall_hash: ContentHash,
    pub height: u64,

    /// Nanoseconds since the Unix epoch
    pub timestamp: i64,

    pub miner: String,
    pub transactions: Vec<Arc<Transaction>>,

    /// Sum of the payload sizes of `transactions`
    pub cumulative_data_size: u64,

    pub nonce: String,
}

impl Block {
    /// Mine the genesis block: height 0, zero previous hash, no transactions.
    pub fn genesis() -> Self {
        BlockCandidate::new(ContentHash::ZERO, 0, GENESIS_MINER).mine()
    }

    pub fn is_genesis(&self) -> bool {
        self.height == 0
    }
}
