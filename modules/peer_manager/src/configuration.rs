use std::time::Duration;

pub const DEFAULT_PEER_PORT: u16 = 28333;
pub const DEFAULT_MAX_OUTBOUND_PEERS: usize = 8;

/// TCP keepalive probing applied to every peer socket
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeepaliveConfig {
    /// Idle time before the first probe
    pub idle: Duration,

    /// Time between probes
    pub interval: Duration,

    /// Unanswered probes before the connection is dropped
    pub probes: u32,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            idle: Duration::from_secs(60),
            interval: Duration::from_secs(10),
            probes: 6,
        }
    }
}

/// Resolved settings for the peer manager
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerConfig {
    /// Inbound listener port; 0 picks an ephemeral port
    pub port: u16,
    pub max_outbound_peers: usize,
    pub connect_timeout: Duration,
    pub keepalive: KeepaliveConfig,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PEER_PORT,
            max_outbound_peers: DEFAULT_MAX_OUTBOUND_PEERS,
            connect_timeout: Duration::from_secs(10),
            keepalive: KeepaliveConfig::default(),
        }
    }
}
