//! Daemon settings: embedded defaults, optional TOML file, `BLOCKWEAVE_*`
//! environment variables and command-line flags, in increasing precedence.

use std::{path::PathBuf, time::Duration};

use anyhow::{bail, Context, Result};
use blockweave_module_peer_manager::{KeepaliveConfig, PeerConfig};
use blockweave_module_rest_server::RestConfig;
use config::{Case, Config, Environment, File, FileFormat};
use serde::Deserialize;

const ENV_PREFIX: &str = "BLOCKWEAVE";

fn default_config_path() -> PathBuf {
    PathBuf::from(option_env!("BLOCKWEAVE_DEFAULT_CONFIG").unwrap_or("blockweave.toml"))
}

#[derive(clap::Parser, Clone, Debug, Default)]
#[command(name = "blockweave", about = "Blockweave permanent data storage daemon")]
pub struct Args {
    /// Path to configuration file (ignored if missing)
    #[arg(long, default_value = default_config_path().into_os_string())]
    pub config: PathBuf,

    /// Address credited with mined blocks
    #[arg(long)]
    pub miner_address: Option<String>,

    /// REST API port
    #[arg(long)]
    pub rest_port: Option<u16>,

    /// Peer listener port
    #[arg(long)]
    pub peer_port: Option<u16>,

    /// Directory for uploaded files
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Directory for log files
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// trace, debug, info, warn, error or fatal
    #[arg(long)]
    pub log_level: Option<String>,

    /// Run as a daemon: no stdout logging, PID file required
    #[arg(long)]
    pub daemon: bool,

    /// PID file used in daemon mode
    #[arg(long)]
    pub pid_file: Option<PathBuf>,

    /// Number of REST worker threads
    #[arg(long)]
    pub rest_workers: Option<usize>,

    /// Maximum number of outbound peers
    #[arg(long)]
    pub max_outbound_peers: Option<usize>,

    /// Peer to connect to at startup, as host:port (repeatable)
    #[arg(long = "peer", value_name = "HOST:PORT")]
    pub peers: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct DaemonSettings {
    #[serde(default)]
    pub miner_address: String,
    pub rest_port: u16,
    pub peer_port: u16,
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub daemon: bool,
    pub pid_file: PathBuf,
    pub rest_workers: usize,
    pub max_outbound_peers: usize,
    #[serde(default)]
    pub peers: Vec<String>,
    pub keepalive_idle_secs: u64,
    pub keepalive_interval_secs: u64,
    pub keepalive_probes: u32,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            miner_address: String::new(),
            rest_port: 28443,
            peer_port: 28333,
            data_dir: PathBuf::from("./data"),
            log_dir: PathBuf::from("./log"),
            log_level: "info".to_string(),
            daemon: false,
            pid_file: PathBuf::from("/tmp/blockweave.pid"),
            rest_workers: 5,
            max_outbound_peers: 8,
            peers: vec![],
            keepalive_idle_secs: 60,
            keepalive_interval_secs: 10,
            keepalive_probes: 6,
        }
    }
}

impl DaemonSettings {
    /// Layer `config` over the embedded defaults and deserialize.
    pub fn try_load(config: &Config) -> Result<Self> {
        let full_config = Config::builder()
            .add_source(File::from_str(
                include_str!("../config.default.toml"),
                FileFormat::Toml,
            ))
            .add_source(config.clone())
            .build()?;
        let settings: Self = full_config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Resolve the full settings for a run from file, environment and flags.
    pub fn load(args: &Args) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(args.config.as_path()).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).convert_case(Case::Kebab))
            .build()
            .with_context(|| format!("Failed to read configuration {}", args.config.display()))?;

        let mut settings = Self::try_load(&config)?;
        settings.apply_args(args);
        settings.validate()?;
        Ok(settings)
    }

    /// Command-line flags override everything else.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(miner_address) = &args.miner_address {
            self.miner_address = miner_address.clone();
        }
        if let Some(port) = args.rest_port {
            self.rest_port = port;
        }
        if let Some(port) = args.peer_port {
            self.peer_port = port;
        }
        if let Some(dir) = &args.data_dir {
            self.data_dir = dir.clone();
        }
        if let Some(dir) = &args.log_dir {
            self.log_dir = dir.clone();
        }
        if let Some(level) = &args.log_level {
            self.log_level = level.clone();
        }
        if args.daemon {
            self.daemon = true;
        }
        if let Some(pid_file) = &args.pid_file {
            self.pid_file = pid_file.clone();
        }
        if let Some(workers) = args.rest_workers {
            self.rest_workers = workers;
        }
        if let Some(max) = args.max_outbound_peers {
            self.max_outbound_peers = max;
        }
        if !args.peers.is_empty() {
            self.peers = args.peers.clone();
        }
    }

    fn validate(&self) -> Result<()> {
        if self.rest_workers == 0 {
            bail!("rest-workers must be at least 1");
        }
        crate::logging::parse_level(&self.log_level)?;
        Ok(())
    }

    pub fn rest_config(&self, miner_address: &str) -> RestConfig {
        RestConfig {
            port: self.rest_port,
            workers: self.rest_workers,
            data_dir: self.data_dir.clone(),
            miner_address: miner_address.to_string(),
        }
    }

    pub fn peer_config(&self) -> PeerConfig {
        PeerConfig {
            port: self.peer_port,
            max_outbound_peers: self.max_outbound_peers,
            keepalive: KeepaliveConfig {
                idle: Duration::from_secs(self.keepalive_idle_secs),
                interval: Duration::from_secs(self.keepalive_interval_secs),
                probes: self.keepalive_probes,
            },
            ..PeerConfig::default()
        }
    }
}

/// Split a `host:port` peer entry.
pub fn parse_peer(entry: &str) -> Result<(String, u16)> {
    let Some((host, port)) = entry.rsplit_once(':') else {
        bail!("Peer '{entry}' is not in host:port form");
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        bail!("Peer '{entry}' has no host");
    }
    let port = port
        .parse()
        .with_context(|| format!("Peer '{entry}' has an invalid port"))?;
    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::fs;
    use tempfile::TempDir;

    fn empty() -> Config {
        Config::builder().build().unwrap()
    }

    #[test]
    fn test_embedded_defaults_match_default() {
        let settings = DaemonSettings::try_load(&empty()).unwrap();
        assert_eq!(settings, DaemonSettings::default());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blockweave.toml");
        fs::write(
            &path,
            "rest-port = 9000\nmax-outbound-peers = 3\npeers = [\"10.0.0.1:28333\"]\n",
        )
        .unwrap();

        let args = Args {
            config: path,
            ..Args::default()
        };
        let settings = DaemonSettings::load(&args).unwrap();
        assert_eq!(settings.rest_port, 9000);
        assert_eq!(settings.max_outbound_peers, 3);
        assert_eq!(settings.peers, vec!["10.0.0.1:28333".to_string()]);
        assert_eq!(settings.peer_port, 28333);
    }

    #[test]
    fn test_missing_file_is_tolerated() {
        let dir = TempDir::new().unwrap();
        let args = Args {
            config: dir.path().join("absent.toml"),
            ..Args::default()
        };
        let settings = DaemonSettings::load(&args).unwrap();
        assert_eq!(settings.rest_workers, 5);
    }

    #[test]
    fn test_args_override_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blockweave.toml");
        fs::write(&path, "rest-port = 9000\nlog-level = \"debug\"\n").unwrap();

        let args = Args::parse_from([
            "blockweave",
            "--config",
            path.to_str().unwrap(),
            "--rest-port",
            "9100",
            "--daemon",
            "--peer",
            "a:1",
            "--peer",
            "b:2",
        ]);
        let settings = DaemonSettings::load(&args).unwrap();
        assert_eq!(settings.rest_port, 9100);
        assert_eq!(settings.log_level, "debug");
        assert!(settings.daemon);
        assert_eq!(settings.peers, vec!["a:1".to_string(), "b:2".to_string()]);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config = Config::builder()
            .set_override("rest-workers", 0)
            .unwrap()
            .build()
            .unwrap();
        assert!(DaemonSettings::try_load(&config).is_err());

        let config = Config::builder()
            .set_override("log-level", "loud")
            .unwrap()
            .build()
            .unwrap();
        assert!(DaemonSettings::try_load(&config).is_err());
    }

    #[test]
    fn test_component_configs() {
        let settings = DaemonSettings {
            keepalive_idle_secs: 30,
            ..DaemonSettings::default()
        };
        let rest = settings.rest_config("miner");
        assert_eq!(rest.port, 28443);
        assert_eq!(rest.workers, 5);
        assert_eq!(rest.miner_address, "miner");

        let peers = settings.peer_config();
        assert_eq!(peers.port, 28333);
        assert_eq!(peers.max_outbound_peers, 8);
        assert_eq!(peers.keepalive.idle, Duration::from_secs(30));
        assert_eq!(peers.keepalive.probes, 6);
    }

    #[test]
    fn test_parse_peer() {
        assert_eq!(parse_peer("127.0.0.1:28333").unwrap(), ("127.0.0.1".to_string(), 28333));
        assert_eq!(parse_peer("[::1]:9").unwrap(), ("::1".to_string(), 9));
        assert!(parse_peer("nohost").is_err());
        assert!(parse_peer(":80").is_err());
        assert!(parse_peer("host:notaport").is_err());
    }
}
