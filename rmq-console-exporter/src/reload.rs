//! Hot reload of the queue filter rules.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use rmq_console_collector::FilterHandle;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, ExporterConfig};

/// Watches the config file and swaps new queue rules into a [`FilterHandle`].
///
/// Only the filters are reloaded; every other setting needs a restart. A file that
/// fails to load leaves the current rules in force.
pub struct ConfigWatcher {
    path: PathBuf,
    filter: FilterHandle,
    interval: Duration,
    last_modified: Option<SystemTime>,
}

impl ConfigWatcher {
    pub fn new(path: impl Into<PathBuf>, filter: FilterHandle, interval: Duration) -> Self {
        let path = path.into();
        let last_modified = modified(&path);
        Self {
            path,
            filter,
            interval,
            last_modified,
        }
    }

    /// Reload if the file changed since the last check.
    ///
    /// Returns `Ok(true)` when new rules were swapped in.
    pub fn check(&mut self) -> Result<bool, ConfigError> {
        let current = modified(&self.path);
        if current.is_none() || current == self.last_modified {
            return Ok(false);
        }
        self.last_modified = current;

        debug!(path = %self.path.display(), "Config file changed");
        let config = ExporterConfig::load_from_file(&self.path)?;
        let filter = config.filters.compile()?;

        info!(
            path = %self.path.display(),
            rules = filter.len(),
            "Queue filters reloaded"
        );
        self.filter.replace(filter);
        Ok(true)
    }

    /// Poll the file until the shutdown signal is received.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            path = %self.path.display(),
            interval_secs = self.interval.as_secs(),
            "Watching config file for filter changes"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.check() {
                        warn!(
                            path = %self.path.display(),
                            error = %e,
                            "Config reload failed, keeping current filters"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        debug!("Config watcher stopped");
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
