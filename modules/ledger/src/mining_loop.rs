//! Background mining thread
//!
//! Polls the ledger and mines a block whenever mining is enabled and there
//! are pending transactions. Exits once the ledger's stop flag is raised.

use std::{
    io,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use tracing::{error, info};

use crate::Ledger;

/// Pause after each mined block
const MINED_PAUSE: Duration = Duration::from_millis(500);

/// Pause while there is nothing to do
const IDLE_PAUSE: Duration = Duration::from_millis(100);

pub struct MiningLoop {
    ledger: Arc<Ledger>,
    miner_address: String,
    handle: Option<JoinHandle<()>>,
}

impl MiningLoop {
    pub fn new(ledger: Arc<Ledger>, miner_address: impl Into<String>) -> Self {
        Self {
            ledger,
            miner_address: miner_address.into(),
            handle: None,
        }
    }

    /// Spawn the mining thread. Calling this while already running does
    /// nothing.
    pub fn start(&mut self) -> io::Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }

        let ledger = self.ledger.clone();
        let miner_address = self.miner_address.clone();
        let handle = thread::Builder::new()
            .name("mining-loop".to_string())
            .spawn(move || run(&ledger, &miner_address))?;

        self.handle = Some(handle);
        info!("Mining loop started");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Raise the ledger stop flag and wait for the thread to exit. Safe to
    /// call when never started.
    ///
    /// A proof-of-work search already in progress runs to completion first.
    pub fn stop(&mut self) {
        self.ledger.request_stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Mining thread panicked");
            }
            info!("Mining loop stopped");
        }
    }
}

impl Drop for MiningLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(ledger: &Ledger, miner_address: &str) {
    while !ledger.should_stop_mining() {
        if ledger.is_mining_enabled() && ledger.mempool_size() > 0 {
            ledger.mine_next_block(miner_address);
            thread::sleep(MINED_PAUSE);
        } else {
            thread::sleep(IDLE_PAUSE);
        }
    }
}
