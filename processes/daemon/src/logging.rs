//! Log output: stdout (unless running as a daemon) plus a timestamped file
//! under the configured log directory.

use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use tracing_subscriber::{
    filter::LevelFilter, fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _, EnvFilter,
    Layer as _, Registry,
};

use crate::settings::DaemonSettings;

/// Map a configured level name to a filter. `fatal` is treated as `error`.
pub fn parse_level(level: &str) -> Result<LevelFilter> {
    Ok(match level.to_ascii_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" | "warning" => LevelFilter::WARN,
        "error" | "fatal" => LevelFilter::ERROR,
        "off" => LevelFilter::OFF,
        other => bail!("Unknown log level '{other}'"),
    })
}

pub fn log_file_path(log_dir: &Path, started: DateTime<Local>) -> PathBuf {
    log_dir.join(format!("blockweave_{}.log", started.format("%Y%m%d_%H%M%S")))
}

/// Keeps the log file open and flushes it when the daemon exits.
pub struct LogGuard {
    file: Arc<File>,
    path: PathBuf,
}

impl LogGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn flush(&self) {
        let mut file = self.file.as_ref();
        let _ = file.flush();
        let _ = file.sync_data();
    }
}

impl Drop for LogGuard {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Install the global subscriber. RUST_LOG, when set, takes precedence over
/// the configured level.
pub fn init(settings: &DaemonSettings) -> Result<LogGuard> {
    let level = parse_level(&settings.log_level)?;
    let filter = || {
        EnvFilter::builder()
            .with_default_directive(level.into())
            .from_env_lossy()
    };

    fs::create_dir_all(&settings.log_dir).with_context(|| {
        format!("Failed to create log directory {}", settings.log_dir.display())
    })?;
    let path = log_file_path(&settings.log_dir, Local::now());
    let file = Arc::new(
        File::create(&path)
            .with_context(|| format!("Failed to create log file {}", path.display()))?,
    );

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(file.clone())
        .with_filter(filter());
    let stdout_layer = (!settings.daemon).then(|| fmt::layer().with_filter(filter()));

    Registry::default()
        .with(file_layer)
        .with(stdout_layer)
        .try_init()
        .context("Failed to install log subscriber")?;

    Ok(LogGuard { file, path })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("info").unwrap(), LevelFilter::INFO);
        assert_eq!(parse_level("DEBUG").unwrap(), LevelFilter::DEBUG);
        assert_eq!(parse_level("fatal").unwrap(), LevelFilter::ERROR);
        assert_eq!(parse_level("warning").unwrap(), LevelFilter::WARN);
        assert!(parse_level("verbose").is_err());
    }

    #[test]
    fn test_log_file_name() {
        let started = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(
            log_file_path(Path::new("/var/log/bw"), started),
            PathBuf::from("/var/log/bw/blockweave_20240309_070501.log")
        );
    }
}
