//! Tracing setup: env filter, daily rolling file, stderr, and os_log on macOS

use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "bugcast.log";
const LOG_DIR_ENV: &str = "BUGCAST_LOG_PATH";
const DEFAULT_FILTER: &str = "info";
const RETENTION: Duration = Duration::from_secs(60 * 60 * 24 * 7);

#[cfg(target_os = "macos")]
const OSLOG_SUBSYSTEM: &str = "dev.bugcast.agent";

/// Where and how much to log
#[derive(Debug, Clone)]
pub struct LogSettings {
    pub dir: PathBuf,
    /// Filter used when `RUST_LOG` is unset
    pub default_filter: String,
    /// Rotated files older than this are deleted at start-up
    pub retention: Duration,
}

impl LogSettings {
    /// `BUGCAST_LOG_PATH` if set, otherwise the platform state/data directory
    pub fn resolve() -> Result<Self> {
        let dir = match std::env::var_os(LOG_DIR_ENV) {
            Some(dir) => PathBuf::from(dir),
            None => platform_log_dir()?,
        };
        Ok(Self::in_dir(dir))
    }

    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            default_filter: DEFAULT_FILTER.to_string(),
            retention: RETENTION,
        }
    }
}

/// Get the log directory path
pub fn get_log_dir() -> Result<PathBuf> {
    Ok(LogSettings::resolve()?.dir)
}

/// Install the global subscriber with the resolved settings.
///
/// Keep the returned guard alive; dropping it stops flushing the log file.
pub fn init_logging() -> Result<WorkerGuard> {
    init_logging_with(&LogSettings::resolve()?)
}

pub fn init_logging_with(settings: &LogSettings) -> Result<WorkerGuard> {
    std::fs::create_dir_all(&settings.dir)
        .with_context(|| format!("Failed to create log directory: {:?}", settings.dir))?;
    let pruned = prune_old_logs(&settings.dir, settings.retention);

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&settings.dir, LOG_FILE_PREFIX));
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.default_filter));

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(file_writer).with_ansi(false))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    #[cfg(target_os = "macos")]
    let registry = registry.with(tracing_oslog::OsLogger::new(OSLOG_SUBSYSTEM, "default"));

    registry
        .try_init()
        .context("Failed to install tracing subscriber")?;

    info!("Logging to {:?}", settings.dir);
    if pruned > 0 {
        debug!("Removed {} expired log files", pruned);
    }
    Ok(guard)
}

fn platform_log_dir() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("dev", "bugcast", "agent")
        .context("Failed to determine project directories for log path")?;

    // Linux keeps logs under XDG_STATE_HOME when the platform defines it
    #[cfg(target_os = "linux")]
    let base = dirs.state_dir().unwrap_or_else(|| dirs.data_local_dir());
    #[cfg(not(target_os = "linux"))]
    let base = dirs.data_local_dir();

    Ok(base.join("logs"))
}

/// Delete our rotated log files older than `max_age`; returns how many went
fn prune_old_logs(dir: &Path, max_age: Duration) -> usize {
    let (Ok(entries), Some(cutoff)) = (std::fs::read_dir(dir), SystemTime::now().checked_sub(max_age))
    else {
        return 0;
    };

    entries
        .flatten()
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX))
        })
        .filter(|entry| {
            entry
                .metadata()
                .ok()
                .filter(|meta| meta.is_file())
                .and_then(|meta| meta.modified().ok())
                .is_some_and(|modified| modified < cutoff)
        })
        .filter(|entry| std::fs::remove_file(entry.path()).is_ok())
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prune_only_touches_expired_bugcast_logs() {
        let dir = tempfile::tempdir().unwrap();
        let rotated = dir.path().join(format!("{}.2026-10-17", LOG_FILE_PREFIX));
        let foreign = dir.path().join("other.log");
        std::fs::write(&rotated, "x").unwrap();
        std::fs::write(&foreign, "x").unwrap();

        assert_eq!(prune_old_logs(dir.path(), Duration::from_secs(60)), 0);
        assert!(rotated.exists());

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(prune_old_logs(dir.path(), Duration::ZERO), 1);
        assert!(!rotated.exists());
        assert!(foreign.exists());
    }

    #[test]
    fn test_prune_missing_dir_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(prune_old_logs(&dir.path().join("absent"), Duration::ZERO), 0);
    }

    #[test]
    fn test_settings_in_dir_defaults() {
        let settings = LogSettings::in_dir("/var/log/bugcast");
        assert_eq!(settings.dir, PathBuf::from("/var/log/bugcast"));
        assert_eq!(settings.default_filter, "info");
        assert_eq!(settings.retention, Duration::from_secs(7 * 24 * 3600));
    }
}
