//! Component wiring, startup and orderly shutdown

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use blockweave_common::ShutdownSignal;
use blockweave_module_ledger::{Ledger, LedgerSnapshot, MiningLoop};
use blockweave_module_peer_manager::PeerManager;
use blockweave_module_rest_server::RestServer;
use rand::RngCore;
use tracing::{info, warn};

use crate::{
    pid_file::PidFile,
    settings::{parse_peer, DaemonSettings},
};

/// How often the main thread checks for a shutdown request
const SHUTDOWN_POLL: Duration = Duration::from_secs(1);

/// Random address for runs without a configured miner address
fn ephemeral_miner_address() -> String {
    let mut bytes = [0u8; 20];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub struct Daemon {
    settings: DaemonSettings,
    miner_address: String,
    ledger: Arc<Ledger>,
    rest: RestServer,
    peers: PeerManager,
    mining: MiningLoop,
    pid_file: Option<PidFile>,
}

impl Daemon {
    /// Bring every component up in dependency order. Anything already started
    /// is stopped again if a later step fails.
    pub fn start(settings: DaemonSettings) -> Result<Self> {
        let pid_file = if settings.daemon {
            Some(PidFile::acquire(&settings.pid_file)?)
        } else {
            None
        };

        let miner_address = if settings.miner_address.is_empty() {
            let address = ephemeral_miner_address();
            warn!("No miner address configured, mining to ephemeral address {address}");
            address
        } else {
            settings.miner_address.clone()
        };
        info!("Miner address: {miner_address}");

        let ledger = Arc::new(Ledger::new());
        info!("Genesis block: {}", ledger.genesis_hash());

        let mut rest = RestServer::new(settings.rest_config(&miner_address), ledger.clone());
        rest.start().context("Failed to start REST server")?;

        let mut peers = PeerManager::new(settings.peer_config());
        if let Err(e) = peers.start() {
            rest.stop();
            return Err(e).context("Failed to start peer manager");
        }

        for entry in &settings.peers {
            match parse_peer(entry) {
                Ok((host, port)) => {
                    if let Err(e) = peers.add_peer(&host, port) {
                        warn!("Could not connect to bootstrap peer {entry}: {e}");
                    }
                }
                Err(e) => warn!("Skipping bootstrap peer: {e:#}"),
            }
        }

        ledger.start_mining();
        let mut mining = MiningLoop::new(ledger.clone(), miner_address.clone());
        if let Err(e) = mining.start() {
            peers.stop();
            rest.stop();
            return Err(e).context("Failed to start mining loop");
        }

        info!("Blockweave daemon started");
        Ok(Self {
            settings,
            miner_address,
            ledger,
            rest,
            peers,
            mining,
            pid_file,
        })
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn miner_address(&self) -> &str {
        &self.miner_address
    }

    pub fn rest_addr(&self) -> Option<SocketAddr> {
        self.rest.local_addr()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peers.local_addr()
    }

    pub fn peers(&self) -> &PeerManager {
        &self.peers
    }

    /// Block until `shutdown` is raised, then shut down.
    pub fn run(self, shutdown: &ShutdownSignal) -> LedgerSnapshot {
        while !shutdown.wait_timeout(SHUTDOWN_POLL) {}
        self.shutdown()
    }

    /// Stop mining, peers and the REST server in that order, report the final
    /// ledger state and release the PID file.
    pub fn shutdown(mut self) -> LedgerSnapshot {
        info!("Shutting down");

        self.mining.stop();
        self.peers.stop();
        self.rest.stop();

        let snapshot = self.ledger.snapshot();
        info!(
            total_blocks = snapshot.total_blocks,
            height = snapshot.height,
            mempool_size = snapshot.mempool_size,
            total_data_size = snapshot.total_data_size,
            head = %snapshot.head,
            "Final ledger state"
        );
        if !self.settings.daemon {
            println!("Final ledger state:");
            println!("  Blocks:          {}", snapshot.total_blocks);
            println!("  Height:          {}", snapshot.height);
            println!("  Head:            {}", snapshot.head);
            println!("  Pending:         {}", snapshot.mempool_size);
            println!("  Data stored:     {} bytes", snapshot.total_data_size);
        }

        if let Some(mut pid_file) = self.pid_file.take() {
            pid_file.remove();
        }

        info!("Blockweave daemon stopped");
        snapshot
    }
}
