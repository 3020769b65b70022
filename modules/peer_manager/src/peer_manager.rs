//! Blockweave peer manager
//!
//! Maintains up to a configured number of outbound TCP peer connections,
//! each owned by its own thread, and accepts inbound connections on a
//! listener. A management thread periodically removes closed peers.
//!
//! Peers are held in an arena keyed by [`PeerId`], handed out from a
//! monotonic counter, so removal never disturbs the ids of other peers.

pub mod configuration;
pub mod connection;

use std::{
    collections::BTreeMap,
    io,
    net::{Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread::{self, JoinHandle},
    time::Duration,
};

use blockweave_common::ShutdownSignal;
use socket2::SockRef;
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub use configuration::{KeepaliveConfig, PeerConfig};
pub use connection::{PeerConnection, PeerId, PeerState};
use connection::apply_keepalive;

/// Interval between sweeps for closed peers
const REAP_INTERVAL: Duration = Duration::from_secs(5);

const WAKE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("maximum outbound peers ({0}) reached")]
    CapacityReached(usize),

    #[error("already connected to {0}")]
    AlreadyConnected(String),

    #[error("invalid peer address {0}")]
    InvalidAddress(String),

    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to bind peer listener on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Default)]
struct PeerSet {
    next_id: u64,
    peers: BTreeMap<PeerId, PeerConnection>,
}

impl PeerSet {
    fn live(&self) -> impl Iterator<Item = &PeerConnection> {
        self.peers.values().filter(|peer| peer.state() != PeerState::Closed)
    }

    fn check_admission(&self, address: &str, port: u16, max: usize) -> Result<(), PeerError> {
        if self.live().count() >= max {
            warn!("Cannot add peer {address}:{port}: maximum of {max} outbound peers reached");
            return Err(PeerError::CapacityReached(max));
        }
        if self.live().any(|peer| peer.matches(address, port)) {
            warn!("Already connected to peer {address}:{port}");
            return Err(PeerError::AlreadyConnected(format!("{address}:{port}")));
        }
        Ok(())
    }

    /// Drop closed peers, joining their finished threads.
    fn reap(&mut self) -> usize {
        let before = self.peers.len();
        self.peers.retain(|_, peer| {
            if peer.state() == PeerState::Closed {
                peer.join();
                info!("Removed closed peer {}", peer.endpoint());
                false
            } else {
                true
            }
        });
        before - self.peers.len()
    }
}

struct Running {
    local_addr: SocketAddr,
    listener: TcpListener,
    listener_thread: JoinHandle<()>,
    manager_thread: JoinHandle<()>,
}

pub struct PeerManager {
    config: PeerConfig,
    peers: Arc<Mutex<PeerSet>>,
    stop: ShutdownSignal,
    running: Option<Running>,
}

impl PeerManager {
    pub fn new(config: PeerConfig) -> Self {
        Self {
            config,
            peers: Arc::new(Mutex::new(PeerSet::default())),
            stop: ShutdownSignal::new(),
            running: None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PeerSet> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind the inbound listener and spawn the listener and management
    /// threads. Does nothing if already started or once stopped.
    pub fn start(&mut self) -> Result<(), PeerError> {
        if self.running.is_some() || self.stop.is_requested() {
            return Ok(());
        }

        let port = self.config.port;
        let bind_error = |source| PeerError::Bind { port, source };

        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;
        let accept_handle = listener.try_clone().map_err(bind_error)?;

        let listener_thread = {
            let stop = self.stop.clone();
            let keepalive = self.config.keepalive;
            spawn("peer-listener", move || {
                listen(accept_handle, &keepalive, &stop)
            })?
        };

        let manager_thread = {
            let stop = self.stop.clone();
            let peers = self.peers.clone();
            match spawn("peer-manager", move || manage(&peers, &stop)) {
                Ok(handle) => handle,
                Err(e) => {
                    self.stop.request();
                    close_listener(&listener, local_addr);
                    let _ = listener_thread.join();
                    return Err(e);
                }
            }
        };

        info!("Peer manager listening on {local_addr}");
        self.running = Some(Running {
            local_addr,
            listener,
            listener_thread,
            manager_thread,
        });
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Address the inbound listener is bound to, while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|running| running.local_addr)
    }

    /// Connect to a peer and hand the connection to its own thread.
    ///
    /// Fails if the peer limit is reached or a live connection to the same
    /// address and port exists. The connect happens without holding the peer
    /// set lock; both checks are repeated once it is taken.
    pub fn add_peer(&self, address: &str, port: u16) -> Result<PeerId, PeerError> {
        let max = self.config.max_outbound_peers;
        let endpoint = format!("{address}:{port}");

        self.lock().check_admission(address, port, max)?;

        let remote = (address, port)
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| {
                warn!("Invalid peer address: {endpoint}");
                PeerError::InvalidAddress(endpoint.clone())
            })?;

        let stream =
            TcpStream::connect_timeout(&remote, self.config.connect_timeout).map_err(|source| {
                warn!("Failed to connect to peer {endpoint}: {source}");
                PeerError::Connect {
                    endpoint: endpoint.clone(),
                    source,
                }
            })?;

        if let Err(e) = apply_keepalive(&stream, &self.config.keepalive) {
            warn!("Failed to enable keepalive for {endpoint}: {e}");
        }

        let mut set = self.lock();
        set.check_admission(address, port, max)?;

        let id = PeerId(set.next_id);
        let connection = PeerConnection::spawn(id, address, port, stream, self.stop.clone())
            .map_err(|source| PeerError::Spawn {
                name: id.to_string(),
                source,
            })?;
        set.next_id += 1;
        set.peers.insert(id, connection);

        info!("Added peer {endpoint} as {id} ({} total)", set.peers.len());
        Ok(id)
    }

    /// Mark a peer inactive. Its thread closes the connection and the next
    /// sweep removes it. Returns false for an unknown id.
    pub fn disconnect(&self, id: PeerId) -> bool {
        match self.lock().peers.get(&id) {
            Some(peer) => {
                info!("Disconnecting peer {}", peer.endpoint());
                peer.disconnect();
                true
            }
            None => false,
        }
    }

    /// `address:port` of every peer currently connected
    pub fn connected_peers(&self) -> Vec<String> {
        self.lock()
            .peers
            .values()
            .filter(|peer| peer.state() == PeerState::Connected)
            .map(PeerConnection::endpoint)
            .collect()
    }

    /// Number of tracked outbound peers, including ones not yet swept
    pub fn outbound_peer_count(&self) -> usize {
        self.lock().peers.len()
    }

    pub fn peer_state(&self, id: PeerId) -> Option<PeerState> {
        self.lock().peers.get(&id).map(PeerConnection::state)
    }

    /// Remove closed peers now rather than waiting for the next sweep.
    pub fn reap_closed(&self) -> usize {
        self.lock().reap()
    }

    /// Close the listener and every peer, then join all threads. Does nothing
    /// if the manager was never started and has no peers.
    pub fn stop(&mut self) {
        let running = self.running.take();
        if running.is_none() && self.lock().peers.is_empty() {
            return;
        }

        self.stop.request();
        if let Some(running) = &running {
            close_listener(&running.listener, running.local_addr);
        }

        for peer in self.lock().peers.values() {
            peer.close();
        }

        if let Some(running) = running {
            if running.listener_thread.join().is_err() {
                error!("Peer listener thread panicked");
            }
            if running.manager_thread.join().is_err() {
                error!("Peer management thread panicked");
            }
        }

        let mut set = self.lock();
        for peer in set.peers.values_mut() {
            peer.join();
        }
        set.peers.clear();

        info!("Peer manager stopped");
    }
}

impl Drop for PeerManager {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn<F>(name: &str, f: F) -> Result<JoinHandle<()>, PeerError>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map_err(|source| PeerError::Spawn {
            name: name.to_string(),
            source,
        })
}

/// Unblock a thread sitting in `accept`.
fn close_listener(listener: &TcpListener, local_addr: SocketAddr) {
    if let Err(e) = SockRef::from(listener).shutdown(Shutdown::Both) {
        debug!("Peer listener shutdown: {e}");
    }
    let wake_addr = SocketAddr::from((Ipv4Addr::LOCALHOST, local_addr.port()));
    let _ = TcpStream::connect_timeout(&wake_addr, WAKE_TIMEOUT);
}

fn listen(listener: TcpListener, keepalive: &KeepaliveConfig, stop: &ShutdownSignal) {
    for incoming in listener.incoming() {
        if stop.is_requested() {
            break;
        }
        match incoming {
            Ok(stream) => {
                match stream.peer_addr() {
                    Ok(remote) => info!("Inbound peer connection from {remote}"),
                    Err(_) => info!("Inbound peer connection"),
                }
                if let Err(e) = apply_keepalive(&stream, keepalive) {
                    warn!("Failed to enable keepalive on inbound connection: {e}");
                }
                // Inbound peers are not tracked yet
                drop(stream);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => error!("Failed to accept peer connection: {e}"),
        }
    }
    debug!("Peer listener exiting");
}

fn manage(peers: &Mutex<PeerSet>, stop: &ShutdownSignal) {
    while !stop.wait_timeout(REAP_INTERVAL) {
        let removed = peers.lock().unwrap_or_else(PoisonError::into_inner).reap();
        if removed > 0 {
            debug!("Swept {removed} closed peers");
        }
    }
    debug!("Peer management thread exiting");
}
