//! A single outbound peer connection and the thread that owns it

use std::{
    fmt,
    io::{self, Read},
    net::{Shutdown, TcpStream},
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use blockweave_common::ShutdownSignal;
use socket2::{SockRef, TcpKeepalive};
use tracing::{debug, error, info, trace, warn};

use crate::configuration::KeepaliveConfig;

/// How often the owning thread re-checks its stop conditions
const IDLE_POLL: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(pub(crate) u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// Connection lifecycle. Only the owning thread moves it forward:
/// `Connecting -> Connected -> Closing -> Closed`.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerState {
    Connecting = 0,
    Connected = 1,
    Closing = 2,
    Closed = 3,
}

impl PeerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PeerState::Connecting,
            1 => PeerState::Connected,
            2 => PeerState::Closing,
            _ => PeerState::Closed,
        }
    }
}

#[derive(Debug)]
struct SharedState(AtomicU8);

impl SharedState {
    fn new(state: PeerState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn load(&self) -> PeerState {
        PeerState::from_u8(self.0.load(Ordering::SeqCst))
    }

    fn store(&self, state: PeerState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }
}

/// Enable TCP keepalive probing on a socket.
pub fn apply_keepalive(stream: &TcpStream, keepalive: &KeepaliveConfig) -> io::Result<()> {
    let params = TcpKeepalive::new()
        .with_time(keepalive.idle)
        .with_interval(keepalive.interval)
        .with_retries(keepalive.probes);
    SockRef::from(stream).set_tcp_keepalive(&params)
}

pub struct PeerConnection {
    pub id: PeerId,
    pub address: String,
    pub port: u16,
    stream: TcpStream,
    state: Arc<SharedState>,
    active: ShutdownSignal,
    thread: Option<JoinHandle<()>>,
}

impl PeerConnection {
    /// Take ownership of a connected socket and spawn its lifecycle thread.
    /// The thread exits when the peer is disconnected, the manager stops or
    /// the remote side closes.
    pub fn spawn(
        id: PeerId,
        address: &str,
        port: u16,
        stream: TcpStream,
        manager_stop: ShutdownSignal,
    ) -> io::Result<Self> {
        stream.set_read_timeout(Some(IDLE_POLL))?;
        let reader = stream.try_clone()?;

        let state = Arc::new(SharedState::new(PeerState::Connecting));
        let active = ShutdownSignal::new();
        let endpoint = format!("{address}:{port}");

        let thread = {
            let state = state.clone();
            let active = active.clone();
            thread::Builder::new()
                .name(format!("{id}"))
                .spawn(move || run(reader, &endpoint, &state, &active, &manager_stop))?
        };

        Ok(Self {
            id,
            address: address.to_string(),
            port,
            stream,
            state,
            active,
            thread: Some(thread),
        })
    }

    pub fn state(&self) -> PeerState {
        self.state.load()
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn matches(&self, address: &str, port: u16) -> bool {
        self.address == address && self.port == port
    }

    /// Ask the owning thread to wind the connection down.
    pub fn disconnect(&self) {
        self.active.request();
    }

    /// Disconnect and shut the socket so a blocked read returns at once.
    pub fn close(&self) {
        self.disconnect();
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            trace!("Shutdown of {} socket: {e}", self.id);
        }
    }

    /// Wait for the owning thread to finish.
    pub fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Thread for {} panicked", self.id);
            }
        }
    }
}

fn run(
    mut stream: TcpStream,
    endpoint: &str,
    state: &SharedState,
    active: &ShutdownSignal,
    manager_stop: &ShutdownSignal,
) {
    state.store(PeerState::Connected);
    info!("Connected to peer {endpoint}");

    // No wire protocol yet: incoming bytes are read and discarded so that a
    // remote close is noticed.
    let mut buffer = [0u8; 1024];
    while !active.is_requested() && !manager_stop.is_requested() {
        match stream.read(&mut buffer) {
            Ok(0) => {
                info!("Peer {endpoint} closed the connection");
                break;
            }
            Ok(read) => trace!("Discarding {read} bytes from {endpoint}"),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) => {}
            Err(e) => {
                warn!("Connection to {endpoint} failed: {e}");
                break;
            }
        }
    }

    state.store(PeerState::Closing);
    if let Err(e) = stream.shutdown(Shutdown::Both) {
        debug!("Shutdown of {endpoint}: {e}");
    }
    state.store(PeerState::Closed);
    info!("Disconnected from peer {endpoint}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{net::TcpListener, time::Instant};

    fn wait_for_state(conn: &PeerConnection, state: PeerState) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if conn.state() == state {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    fn connect() -> (TcpListener, TcpStream, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        (listener, stream, port)
    }

    #[test]
    fn test_state_round_trips_through_u8() {
        for state in [
            PeerState::Connecting,
            PeerState::Connected,
            PeerState::Closing,
            PeerState::Closed,
        ] {
            assert_eq!(PeerState::from_u8(state as u8), state);
        }
    }

    #[test]
    fn test_disconnect_closes() {
        let (_listener, stream, port) = connect();
        let mut conn =
            PeerConnection::spawn(PeerId(1), "127.0.0.1", port, stream, ShutdownSignal::new())
                .unwrap();
        assert!(wait_for_state(&conn, PeerState::Connected));
        assert_eq!(conn.endpoint(), format!("127.0.0.1:{port}"));
        assert!(conn.matches("127.0.0.1", port));

        conn.disconnect();
        assert!(wait_for_state(&conn, PeerState::Closed));
        conn.join();
    }

    #[test]
    fn test_remote_close_is_detected() {
        let (listener, stream, port) = connect();
        let mut conn =
            PeerConnection::spawn(PeerId(2), "127.0.0.1", port, stream, ShutdownSignal::new())
                .unwrap();
        let (remote, _) = listener.accept().unwrap();
        assert!(wait_for_state(&conn, PeerState::Connected));

        drop(remote);
        assert!(wait_for_state(&conn, PeerState::Closed));
        conn.join();
    }

    #[test]
    fn test_manager_stop_closes() {
        let (_listener, stream, port) = connect();
        let stop = ShutdownSignal::new();
        let mut conn =
            PeerConnection::spawn(PeerId(3), "127.0.0.1", port, stream, stop.clone()).unwrap();
        stop.request();
        conn.close();
        conn.join();
        assert_eq!(conn.state(), PeerState::Closed);
    }

    #[test]
    fn test_keepalive_applies() {
        let (_listener, stream, _) = connect();
        apply_keepalive(&stream, &KeepaliveConfig::default()).unwrap();
        assert!(SockRef::from(&stream).keepalive().unwrap());
    }
}
