//! Debounced configuration hot reload.
//!
//! The watcher polls the configuration file's modification time. A change is
//! not applied immediately: the file must sit unchanged for the debounce
//! window (500 ms) first, so a burst of writes collapses into one reload.
//! On reload, every extension's configuration subtree is re-applied through
//! the registry; a failing extension is logged and skipped, the rest still
//! reload. Hosts without filesystem event support run the same loop at the
//! 5-second fallback cadence.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;

use crate::config::HostConfig;
use crate::host_error::HostError;
use crate::registry::ExtensionRegistry;

/// Quiet window a change must survive before it is applied.
pub const DEBOUNCE: Duration = Duration::from_millis(500);

/// Poll cadence when filesystem events are unavailable.
pub const POLL_FALLBACK: Duration = Duration::from_secs(5);

pub struct ConfigWatcher {
    path: PathBuf,
    registry: Arc<ExtensionRegistry>,
    poll_interval: Duration,
}

impl ConfigWatcher {
    pub fn new(path: impl Into<PathBuf>, registry: Arc<ExtensionRegistry>) -> Self {
        Self {
            path: path.into(),
            registry,
            poll_interval: Duration::from_millis(100),
        }
    }

    /// Use the slow polling cadence (no event support).
    pub fn with_fallback_polling(mut self) -> Self {
        self.poll_interval = POLL_FALLBACK;
        self
    }

    #[cfg(test)]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn mtime(&self) -> Option<SystemTime> {
        std::fs::metadata(&self.path).and_then(|m| m.modified()).ok()
    }

    /// Parse the file and re-apply every extension's subtree once.
    ///
    /// Per-extension failures are logged and do not abort the rest; the
    /// first failure is still reported to the caller.
    pub async fn reload_once(&self) -> Result<(), HostError> {
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| HostError::config(format!("cannot read configuration file: {e}")))?;
        let config = HostConfig::parse(&content)?;

        let mut first_error = None;
        for (name, subtree) in &config.config {
            if self.registry.get(name).await.is_none() {
                tracing::debug!(extension = %name, "config subtree for unknown extension ignored");
                continue;
            }
            if let Err(err) = self.registry.apply_config(name, subtree.clone()).await {
                tracing::warn!(extension = %name, error = %err, "config reload failed for extension");
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Spawn the watch loop. Cancelling the token ends it.
    pub fn spawn(self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run(cancel).await;
        })
    }

    async fn run(self, cancel: CancellationToken) {
        let mut applied_mtime = self.mtime();
        let mut pending: Option<(SystemTime, tokio::time::Instant)> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            let current = self.mtime();
            if current != applied_mtime {
                match &mut pending {
                    // New or changed-again candidate: restart the quiet window.
                    Some((candidate, seen_at)) if *candidate != current.unwrap_or(SystemTime::UNIX_EPOCH) => {
                        *candidate = current.unwrap_or(SystemTime::UNIX_EPOCH);
                        *seen_at = tokio::time::Instant::now();
                    }
                    Some(_) => {}
                    None => {
                        pending = Some((
                            current.unwrap_or(SystemTime::UNIX_EPOCH),
                            tokio::time::Instant::now(),
                        ));
                    }
                }
            }

            if let Some((_, seen_at)) = pending {
                if seen_at.elapsed() >= DEBOUNCE {
                    pending = None;
                    applied_mtime = current;
                    tracing::info!(path = %self.path.display(), "configuration changed; reloading");
                    if let Err(err) = self.reload_once().await {
                        tracing::warn!(error = %err, "configuration reload finished with errors");
                    }
                }
            }
        }
    }
}
