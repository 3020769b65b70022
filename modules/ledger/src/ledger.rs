//! Blockweave ledger
//!
//! Owns every mined block, the pending transaction pool and the mining
//! control flags. All block/pool state sits behind a single lock held for the
//! whole of each public operation; the mining flags are atomics so the mining
//! loop can poll them without contending with request handling.

pub mod mining_loop;

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use blockweave_common::{
    block::{Block, BlockCandidate, MAX_BLOCK_TRANSACTIONS},
    ContentHash, Transaction,
};
use rand::seq::IndexedRandom;
use serde::Serialize;
use tracing::{info, trace};

pub use mining_loop::MiningLoop;

struct LedgerState {
    /// Every block ever mined, by hash. Never shrinks.
    blocks: HashMap<ContentHash, Arc<Block>>,

    /// Block hashes in the order they were appended
    block_hashes: Vec<ContentHash>,

    genesis: ContentHash,
    head: Arc<Block>,

    /// Pending transactions, oldest first
    mempool: VecDeque<Arc<Transaction>>,
}

impl LedgerState {
    fn insert(&mut self, block: Arc<Block>) {
        self.block_hashes.push(block.hash);
        self.blocks.insert(block.hash, block.clone());
        self.head = block;
    }

    // Before there are at least two blocks a random choice could only ever
    // land on genesis, so heights 0 and 1 reference it directly.
    fn select_recall_block(&self, height: u64) -> ContentHash {
        if height <= 1 {
            return self.genesis;
        }
        self.block_hashes.choose(&mut rand::rng()).copied().unwrap_or(self.genesis)
    }
}

/// Summary of the ledger, logged at shutdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerSnapshot {
    pub total_blocks: usize,
    pub height: u64,
    pub head: ContentHash,
    pub mempool_size: usize,
    pub total_data_size: u64,
}

pub struct Ledger {
    state: Mutex<LedgerState>,
    mining_enabled: AtomicBool,
    stop_requested: AtomicBool,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    /// Create a ledger holding only a freshly mined genesis block.
    pub fn new() -> Self {
        let genesis = Arc::new(Block::genesis());
        trace!(hash = %genesis.hash, "Genesis block created");

        let state = LedgerState {
            blocks: HashMap::from([(genesis.hash, genesis.clone())]),
            block_hashes: vec![genesis.hash],
            genesis: genesis.hash,
            head: genesis,
            mempool: VecDeque::new(),
        };

        Self {
            state: Mutex::new(state),
            mining_enabled: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a transaction to the pending pool.
    pub fn submit_transaction(&self, tx: Arc<Transaction>) {
        let mut state = self.lock();
        info!("Transaction added to mempool: {}...", tx.id.short(16));
        state.mempool.push_back(tx);
    }

    /// Mine the oldest pending transactions (at most ten) into a new block on
    /// top of the current head.
    ///
    /// Returns `None` without doing anything when the pool is empty. The
    /// proof-of-work search runs while the ledger lock is held, so this blocks
    /// every other ledger operation until a nonce is found.
    pub fn mine_next_block(&self, miner_address: &str) -> Option<Arc<Block>> {
        let mut state = self.lock();
        if state.mempool.is_empty() {
            return None;
        }

        let mut candidate =
            BlockCandidate::new(state.head.hash, state.head.height + 1, miner_address);

        let count = state.mempool.len().min(MAX_BLOCK_TRANSACTIONS);
        for tx in state.mempool.drain(..count) {
            candidate.add_transaction(tx);
        }

        let recall = state.select_recall_block(candidate.height());
        candidate.set_recall_block(recall);

        info!("Mining block #{} with {} transactions", candidate.height(), count);
        let block = Arc::new(candidate.mine());
        state.insert(block.clone());

        info!(
            "Block #{} mined successfully, hash: {}...",
            block.height,
            block.hash.short(16)
        );
        Some(block)
    }

    /// Pick the recall reference for a block at `height`: genesis for heights
    /// 0 and 1, otherwise a uniformly random known block.
    pub fn select_recall_block(&self, height: u64) -> ContentHash {
        self.lock().select_recall_block(height)
    }

    pub fn get_block(&self, hash: &ContentHash) -> Option<Arc<Block>> {
        self.lock().blocks.get(hash).cloned()
    }

    /// Payload of a mined transaction, or empty if no block contains it.
    ///
    /// This is a linear scan over every block (in append order) and every
    /// transaction in it, which is fine at demo scale.
    pub fn get_transaction_data(&self, tx_id: &ContentHash) -> Vec<u8> {
        let state = self.lock();
        state
            .block_hashes
            .iter()
            .filter_map(|hash| state.blocks.get(hash))
            .flat_map(|block| block.transactions.iter())
            .find(|tx| tx.id == *tx_id)
            .map(|tx| tx.data.clone())
            .unwrap_or_default()
    }

    pub fn head(&self) -> Arc<Block> {
        self.lock().head.clone()
    }

    pub fn genesis_hash(&self) -> ContentHash {
        self.lock().genesis
    }

    /// All block hashes in append order
    pub fn block_hashes(&self) -> Vec<ContentHash> {
        self.lock().block_hashes.clone()
    }

    pub fn mempool_size(&self) -> usize {
        self.lock().mempool.len()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let state = self.lock();
        LedgerSnapshot {
            total_blocks: state.blocks.len(),
            height: state.head.height,
            head: state.head.hash,
            mempool_size: state.mempool.len(),
            total_data_size: state.blocks.values().map(|b| b.cumulative_data_size).sum(),
        }
    }

    pub fn start_mining(&self) {
        self.mining_enabled.store(true, Ordering::SeqCst);
        info!("Mining enabled");
    }

    /// Pause mining. The mining loop keeps running and resumes when
    /// re-enabled.
    pub fn stop_mining(&self) {
        self.mining_enabled.store(false, Ordering::SeqCst);
        info!("Mining disabled");
    }

    pub fn is_mining_enabled(&self) -> bool {
        self.mining_enabled.load(Ordering::SeqCst)
    }

    /// Ask the mining loop to exit. Set once at shutdown and never cleared.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn should_stop_mining(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn submit(ledger: &Ledger, owner: &str, data: &[u8]) -> Arc<Transaction> {
        let tx = Arc::new(Transaction::new(owner, "target", data.to_vec(), 0));
        ledger.submit_transaction(tx.clone());
        tx
    }

    fn mine_until_empty(ledger: &Ledger) -> Vec<Arc<Block>> {
        let mut mined = vec![];
        while let Some(block) = ledger.mine_next_block("miner") {
            mined.push(block);
        }
        mined
    }

    #[test]
    fn test_new_ledger_has_genesis_head() {
        let ledger = Ledger::new();
        let head = ledger.head();
        assert!(head.is_genesis());
        assert_eq!(head.hash, ledger.genesis_hash());
        assert!(ledger.get_block(&head.hash).is_some());
        assert_eq!(ledger.block_hashes(), vec![head.hash]);
        assert_eq!(ledger.mempool_size(), 0);
    }

    #[test]
    fn test_mine_with_empty_pool_is_noop() {
        let ledger = Ledger::new();
        assert!(ledger.mine_next_block("miner").is_none());
        assert_eq!(ledger.block_hashes().len(), 1);
    }

    #[test]
    fn test_submit_grows_pool() {
        let ledger = Ledger::new();
        submit(&ledger, "a", b"one");
        submit(&ledger, "b", b"two");
        assert_eq!(ledger.mempool_size(), 2);
    }

    #[test]
    fn test_block_takes_at_most_ten_oldest() {
        let ledger = Ledger::new();
        let submitted: Vec<_> = (0..13).map(|i| submit(&ledger, &format!("o{i}"), b"x")).collect();

        let before = ledger.mempool_size();
        let block = ledger.mine_next_block("miner").unwrap();
        let after = ledger.mempool_size();

        assert_eq!(block.transactions.len(), 10);
        assert_eq!(before - after, block.transactions.len());
        let ids: Vec<_> = block.transactions.iter().map(|tx| tx.id).collect();
        let expected: Vec<_> = submitted[..10].iter().map(|tx| tx.id).collect();
        assert_eq!(ids, expected);

        let block = ledger.mine_next_block("miner").unwrap();
        assert_eq!(block.transactions.len(), 3);
        assert_eq!(ledger.mempool_size(), 0);
    }

    #[test]
    fn test_blocks_link_to_previous_head() {
        let ledger = Ledger::new();
        let genesis = ledger.head();
        submit(&ledger, "a", b"data");
        let first = ledger.mine_next_block("miner").unwrap();
        submit(&ledger, "b", b"data");
        let second = ledger.mine_next_block("miner").unwrap();

        assert_eq!(first.previous_hash, genesis.hash);
        assert_eq!(first.height, 1);
        assert_eq!(first.recall_hash, genesis.hash);
        assert_eq!(second.previous_hash, first.hash);
        assert_eq!(second.height, 2);
        assert_eq!(ledger.head().hash, second.hash);
        assert_eq!(first.miner, "miner");
    }

    #[test]
    fn test_recall_is_genesis_at_low_heights() {
        let ledger = Ledger::new();
        assert_eq!(ledger.select_recall_block(0), ledger.genesis_hash());
        assert_eq!(ledger.select_recall_block(1), ledger.genesis_hash());
    }

    #[test]
    fn test_recall_is_known_block() {
        let ledger = Ledger::new();
        for i in 0..5 {
            submit(&ledger, &format!("o{i}"), b"x");
            ledger.mine_next_block("miner");
        }
        let known: HashSet<_> = ledger.block_hashes().into_iter().collect();
        for height in 2..50 {
            assert!(known.contains(&ledger.select_recall_block(height)));
        }
        for hash in ledger.block_hashes() {
            let block = ledger.get_block(&hash).unwrap();
            if !block.is_genesis() {
                assert!(known.contains(&block.recall_hash));
            }
        }
    }

    #[test]
    fn test_cumulative_sizes_sum_to_submitted() {
        let ledger = Ledger::new();
        let mut submitted = 0u64;
        for i in 0..25 {
            let data = vec![1u8; i + 1];
            submitted += data.len() as u64;
            submit(&ledger, &format!("o{i}"), &data);
        }
        let mined = mine_until_empty(&ledger);
        assert_eq!(mined.len(), 3);
        let total: u64 = mined.iter().map(|b| b.cumulative_data_size).sum();
        assert_eq!(total, submitted);
        assert_eq!(ledger.snapshot().total_data_size, submitted);
    }

    #[test]
    fn test_transaction_never_in_pool_and_block() {
        let ledger = Ledger::new();
        for i in 0..12 {
            submit(&ledger, &format!("o{i}"), b"x");
        }
        let block = ledger.mine_next_block("miner").unwrap();
        assert_eq!(ledger.mempool_size(), 2);
        let mined: HashSet<_> = block.transactions.iter().map(|tx| tx.id).collect();
        let rest = ledger.mine_next_block("miner").unwrap();
        assert!(rest.transactions.iter().all(|tx| !mined.contains(&tx.id)));
    }

    #[test]
    fn test_get_transaction_data() {
        let ledger = Ledger::new();
        let tx = submit(&ledger, "alice", b"permanent data");
        assert!(ledger.get_transaction_data(&tx.id).is_empty());
        ledger.mine_next_block("miner");
        assert_eq!(ledger.get_transaction_data(&tx.id), b"permanent data");
        assert!(ledger.get_transaction_data(&ContentHash::digest("unknown")).is_empty());
    }

    #[test]
    fn test_get_unknown_block() {
        let ledger = Ledger::new();
        assert!(ledger.get_block(&ContentHash::digest("nope")).is_none());
    }

    #[test]
    fn test_mining_flags_are_independent() {
        let ledger = Ledger::new();
        assert!(!ledger.is_mining_enabled());
        assert!(!ledger.should_stop_mining());

        ledger.start_mining();
        assert!(ledger.is_mining_enabled());
        ledger.stop_mining();
        assert!(!ledger.is_mining_enabled());
        assert!(!ledger.should_stop_mining());

        ledger.request_stop();
        ledger.start_mining();
        assert!(ledger.should_stop_mining());
    }

    #[test]
    fn test_snapshot() {
        let ledger = Ledger::new();
        submit(&ledger, "a", b"abc");
        ledger.mine_next_block("miner");
        submit(&ledger, "b", b"de");

        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.total_blocks, 2);
        assert_eq!(snapshot.height, 1);
        assert_eq!(snapshot.head, ledger.head().hash);
        assert_eq!(snapshot.mempool_size, 1);
        assert_eq!(snapshot.total_data_size, 3);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["total_blocks"], 2);
    }
}
