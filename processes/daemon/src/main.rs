//! 'main' for the blockweave daemon

use anyhow::Result;
use blockweave_common::ShutdownSignal;
use blockweave_process_daemon::{logging, signals, Args, Daemon, DaemonSettings};
use clap::Parser;
use tracing::{error, info};

pub fn main() -> Result<()> {
    let args = Args::parse();
    let settings = DaemonSettings::load(&args)?;

    let log_guard = logging::init(&settings)?;
    info!("Blockweave daemon starting, logging to {}", log_guard.path().display());

    let shutdown = ShutdownSignal::new();
    let signal_thread = signals::spawn_listener(shutdown.clone())?;

    let daemon = match Daemon::start(settings) {
        Ok(daemon) => daemon,
        Err(e) => {
            error!("Startup failed: {e:#}");
            shutdown.request();
            let _ = signal_thread.join();
            return Err(e);
        }
    };

    daemon.run(&shutdown);

    let _ = signal_thread.join();
    info!("Exiting");
    log_guard.flush();
    Ok(())
}
