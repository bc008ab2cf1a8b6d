//! Config hot reload.
//!
//! [`ConfigWatcher`] polls the config file's mtime on a fixed period. When the mtime
//! moves and the content digest differs from the last accepted version, the file is
//! re-parsed and the new [`AppConfig`] is published on a `tokio::sync::watch`
//! channel. A file that fails to parse is logged and the previous config stays in
//! effect.

use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{AppConfig, Overrides};
use crate::error::{Result, UpkeepError};

/// Default polling period.
pub const DEFAULT_POLL_PERIOD: Duration = Duration::from_secs(5);

/// Polls a config file and publishes changed versions.
#[derive(Debug)]
pub struct ConfigWatcher {
    path: PathBuf,
    period: Duration,
    last_modified: Option<SystemTime>,
    last_digest: Option<String>,
    overrides: Overrides,
}

impl ConfigWatcher {
    /// Create a watcher whose baseline is the file as it is now.
    ///
    /// A zero `period` falls back to [`DEFAULT_POLL_PERIOD`].
    pub fn new(path: impl Into<PathBuf>, period: Duration) -> Self {
        let path = path.into();
        let period = if period.is_zero() {
            log::warn!("Config poll period must be longer than zero, using {:?}", DEFAULT_POLL_PERIOD);
            DEFAULT_POLL_PERIOD
        } else {
            period
        };
        let last_modified = modified(&path).ok();
        let last_digest = fs::read(&path).ok().map(|bytes| digest(&bytes));
        Self {
            path,
            period,
            last_modified,
            last_digest,
            overrides: Overrides::default(),
        }
    }

    /// Apply command-line overrides to every reloaded version.
    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// The watched path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check the file once.
    ///
    /// Returns `Ok(Some(config))` when a new valid version was found, `Ok(None)`
    /// when nothing changed, and an error when the changed file is invalid.
    pub fn check(&mut self) -> Result<Option<AppConfig>> {
        let mtime = modified(&self.path)?;
        if self.last_modified == Some(mtime) {
            return Ok(None);
        }
        self.last_modified = Some(mtime);

        let bytes = fs::read(&self.path)?;
        let fingerprint = digest(&bytes);
        if self.last_digest.as_deref() == Some(fingerprint.as_str()) {
            log::debug!("{} touched without content change", self.path.display());
            return Ok(None);
        }

        let content = String::from_utf8_lossy(&bytes);
        let config = AppConfig::from_yaml(&content)
            .map_err(|e| UpkeepError::Config(format!("failed to parse {}: {}", self.path.display(), e)))?;
        let config = self.overrides.apply(config);
        config.validate()?;

        self.last_digest = Some(fingerprint);
        Ok(Some(config))
    }

    /// Spawn the polling task.
    ///
    /// The returned receiver starts at `initial` and sees every accepted version.
    /// The task ends when `cancel` fires.
    pub fn spawn(self, initial: AppConfig, cancel: CancellationToken) -> (watch::Receiver<AppConfig>, JoinHandle<()>) {
        let (tx, rx) = watch::channel(initial);
        let handle = tokio::spawn(self.run(tx, cancel));
        (rx, handle)
    }

    async fn run(mut self, tx: watch::Sender<AppConfig>, cancel: CancellationToken) {
        log::debug!("Watching for config changes: {}", self.path.display());
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }

            match self.check() {
                Ok(Some(config)) => {
                    log::info!("Config {} updated", self.path.display());
                    tx.send_replace(config);
                }
                Ok(None) => {}
                Err(e) => log::warn!("Ignoring config change, keeping previous config: {}", e),
            }
        }
    }
}

fn modified(path: &Path) -> std::io::Result<SystemTime> {
    fs::metadata(path)?.modified()
}

fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
