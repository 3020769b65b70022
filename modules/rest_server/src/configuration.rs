use std::path::PathBuf;

pub const DEFAULT_REST_PORT: u16 = 28443;
pub const DEFAULT_WORKERS: usize = 5;
pub const DEFAULT_DATA_DIR: &str = "./data";

/// Resolved settings for the REST server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestConfig {
    /// TCP port to listen on; 0 picks an ephemeral port
    pub port: u16,

    /// Number of worker threads serving queued requests
    pub workers: usize,

    /// Directory uploads are written into
    pub data_dir: PathBuf,

    /// Owner recorded on transactions created from file uploads
    pub miner_address: String,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_REST_PORT,
            workers: DEFAULT_WORKERS,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            miner_address: String::new(),
        }
    }
}
