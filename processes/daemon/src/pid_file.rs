//! Single-instance guard for daemon mode

use std::{
    fs,
    path::{Path, PathBuf},
    process,
};

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

/// Holds the PID file for the life of the process and removes it on drop.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    held: bool,
}

impl PidFile {
    /// Write this process's id to `path`.
    ///
    /// Fails if the file names another live process. A file left behind by a
    /// process that no longer exists is replaced.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Ok(contents) = fs::read_to_string(path) {
            match contents.trim().parse::<u32>() {
                Ok(pid) if pid != process::id() && process_alive(pid) => {
                    bail!("Blockweave is already running (pid {pid}, {})", path.display());
                }
                _ => {
                    warn!("Removing stale PID file {}", path.display());
                    fs::remove_file(path).with_context(|| {
                        format!("Failed to remove stale PID file {}", path.display())
                    })?;
                }
            }
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(path, format!("{}\n", process::id()))
            .with_context(|| format!("Failed to write PID file {}", path.display()))?;

        info!("Wrote PID file {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            held: true,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn remove(&mut self) {
        if !self.held {
            return;
        }
        self.held = false;
        match fs::remove_file(&self.path) {
            Ok(()) => info!("Removed PID file {}", self.path.display()),
            Err(e) => warn!("Failed to remove PID file {}: {e}", self.path.display()),
        }
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        self.remove();
    }
}

fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}
