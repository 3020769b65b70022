// Blockweave daemon process - startup, configuration and shutdown

pub mod daemon;
pub mod logging;
pub mod pid_file;
pub mod settings;
pub mod signals;

pub use daemon::Daemon;
pub use settings::{Args, DaemonSettings};
