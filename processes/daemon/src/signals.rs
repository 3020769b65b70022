//! SIGINT/SIGTERM handling
//!
//! The rest of the daemon is thread based, so signals are awaited on a
//! dedicated thread running a small single-threaded tokio runtime.

use std::{
    io,
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{Context, Result};
use blockweave_common::ShutdownSignal;
use tracing::{error, info};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Spawn a thread that raises `shutdown` on SIGINT or SIGTERM. The thread
/// also exits if `shutdown` is raised by something else.
pub fn spawn_listener(shutdown: ShutdownSignal) -> Result<JoinHandle<()>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build signal runtime")?;

    thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            runtime.block_on(async {
                tokio::select! {
                    received = wait_for_signal() => match received {
                        Ok(name) => {
                            info!("Received {name}, shutting down");
                            shutdown.request();
                        }
                        Err(e) => error!("Failed to listen for signals: {e}"),
                    },
                    _ = requested(&shutdown) => {}
                }
            })
        })
        .context("Failed to spawn signal thread")
}

async fn requested(shutdown: &ShutdownSignal) {
    while !shutdown.is_requested() {
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|_| "SIGINT"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|_| "Ctrl-C")
}
