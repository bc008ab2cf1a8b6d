//! The supervisor task.
//!
//! Events are handled one at a time, in priority order: cancellation, exit of
//! the live process, a due respawn, a config reload, an update tick. A tick's
//! check, stop and respawn run inline, so there is never more than one update
//! in flight and never more than one live process.

use futures::future::OptionFuture;
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{RestartDecision, SupervisorConfig};
use crate::app::ManagedApp;
use crate::config::AppConfig;
use crate::error::{Result, UpkeepError};
use crate::process::{ExitStatus, Launcher, ProcessHandle};
use crate::revision::RevisionSource;
use crate::termination::TerminationController;

/// Supervises one [`ManagedApp`].
pub struct SupervisorLoop<L: Launcher, R: RevisionSource> {
    app: ManagedApp,
    launcher: L,
    revisions: R,
    config: SupervisorConfig,
    terminator: TerminationController,
    cancel: CancellationToken,
    config_updates: Option<watch::Receiver<AppConfig>>,
    live: Option<L::Handle>,
    failures: u32,
    respawn_at: Option<Instant>,
    last_decision: Option<RestartDecision>,
}

impl<L: Launcher, R: RevisionSource> SupervisorLoop<L, R> {
    /// Create a supervisor with default timing.
    pub fn new(app: ManagedApp, launcher: L, revisions: R, cancel: CancellationToken) -> Self {
        let config = SupervisorConfig::default();
        Self {
            app,
            launcher,
            revisions,
            terminator: TerminationController::new(config.termination),
            config,
            cancel,
            config_updates: None,
            live: None,
            failures: 0,
            respawn_at: None,
            last_decision: None,
        }
    }

    pub fn with_config(mut self, config: SupervisorConfig) -> Self {
        self.terminator = TerminationController::new(config.termination);
        self.config = config;
        self
    }

    /// Apply configs published on `updates`.
    pub fn with_config_updates(mut self, updates: watch::Receiver<AppConfig>) -> Self {
        self.config_updates = Some(updates);
        self
    }

    pub fn app(&self) -> &ManagedApp {
        &self.app
    }

    /// Consecutive failures so far.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// True while a process handle occupies the slot.
    pub fn is_running(&self) -> bool {
        self.live.is_some()
    }

    /// Decision taken by the most recent update tick.
    pub fn last_decision(&self) -> Option<RestartDecision> {
        self.last_decision
    }

    /// Run until cancelled or until the failure ceiling is reached.
    ///
    /// Returns `Ok(())` after cancellation. A failing first spawn is returned as
    /// is; reaching the ceiling cancels the token and returns
    /// [`UpkeepError::FailureBudgetExhausted`]. The live process is stopped
    /// before returning either way.
    pub async fn run(&mut self) -> Result<()> {
        if self.config.update_interval.is_zero() {
            return Err(UpkeepError::Config("update interval must be longer than zero".to_string()));
        }
        tracing::info!(app = %self.app.name, phase = "start", "Supervising {}", self.app);

        if self.app.tracked {
            match self.revisions.check_for_update(&mut self.app, &self.cancel).await {
                Ok(check) => {
                    tracing::info!(app = %self.app.name, phase = "start", revision = %check.new_revision, "Initial revision")
                }
                Err(e) => tracing::error!(app = %self.app.name, phase = "start", error = %e, "Initial update failed"),
            }
        }
        if self.cancel.is_cancelled() {
            return Ok(());
        }

        self.live = Some(self.launcher.spawn(&self.app.launch_spec())?);

        let period = self.config.update_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if self.failures >= self.config.failure_ceiling {
                return self.give_up().await;
            }

            let exited: OptionFuture<_> = self.live.as_ref().map(|handle| handle.exited()).into();
            let respawn_at = self.respawn_at;

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tracing::info!(app = %self.app.name, phase = "shutdown", "Cancelled, stopping {}", self.app.name);
                    self.stop_live().await;
                    return Ok(());
                }
                Some(status) = exited => self.on_exit(status),
                _ = tokio::time::sleep_until(respawn_at.unwrap_or_else(Instant::now)), if respawn_at.is_some() => {
                    self.respawn_at = None;
                    self.respawn_or_cool_down("respawn");
                }
                update = next_config(&mut self.config_updates) => match update {
                    Some(config) => self.on_config(config).await,
                    None => {
                        tracing::debug!(app = %self.app.name, phase = "config", "Config watcher gone");
                        self.config_updates = None;
                    }
                },
                _ = ticker.tick() => {
                    self.on_tick().await;
                    // next update is a full period after this one finished
                    ticker.reset();
                }
            }
        }
    }

    fn on_exit(&mut self, status: ExitStatus) {
        if let Some(handle) = self.live.take() {
            let output = handle.output().contents();
            tracing::warn!(app = %self.app.name, phase = "exit", pid = ?handle.pid(), "Process exited unexpectedly with {}", status);
            if !output.trim().is_empty() {
                tracing::info!(app = %self.app.name, phase = "exit", "Output:\n{}", output.trim_end());
            }
        }
        self.respawn_or_cool_down("exit");
    }

    async fn on_tick(&mut self) {
        tracing::info!(
            app = %self.app.name,
            phase = "update",
            "Updating {} at {}",
            self.app.name,
            chrono::Local::now().format("%b %e %H:%M:%S")
        );

        let check = if self.app.tracked {
            match self.revisions.check_for_update(&mut self.app, &self.cancel).await {
                Ok(check) => Some(check),
                Err(e) => {
                    tracing::error!(app = %self.app.name, phase = "update", error = %e, "Failed update");
                    return;
                }
            }
        } else {
            None
        };

        let decision = RestartDecision::decide(&self.app, check.as_ref());
        self.last_decision = Some(decision);
        if decision.should_restart() {
            self.restart(decision).await;
        } else {
            tracing::debug!(app = %self.app.name, phase = "update", "Up to date, keeping {}", self.app);
        }
    }

    async fn on_config(&mut self, config: AppConfig) {
        match self.app.apply_config(&config) {
            Ok(true) => {
                tracing::info!(app = %self.app.name, phase = "config", "Launch parameters changed");
                self.restart("config changed").await;
            }
            Ok(false) => tracing::info!(app = %self.app.name, phase = "config", "Config updated: {}", self.app),
            Err(e) => tracing::warn!(app = %self.app.name, phase = "config", error = %e, "Ignoring invalid config"),
        }
    }

    /// Stop the live process, then spawn its replacement.
    ///
    /// If the stop fails the old handle stays in the slot and nothing is spawned.
    async fn restart(&mut self, reason: impl fmt::Display) {
        tracing::info!(app = %self.app.name, phase = "restart", "Restarting {} ({})", self.app, reason);

        if let Some(handle) = self.live.as_ref() {
            match self.terminator.stop(handle).await {
                Ok(report) => {
                    tracing::info!(
                        app = %self.app.name,
                        phase = "restart",
                        attempts = report.attempts,
                        kills = report.kill_sent,
                        "Stopped with {}",
                        report.status
                    );
                    self.live = None;
                }
                Err(e) => {
                    tracing::error!(app = %self.app.name, phase = "restart", error = %e, "Failed to stop");
                    self.record_failure();
                    return;
                }
            }
        }

        for attempt in 1..=self.config.respawn_attempts {
            if attempt > 1 && self.pause(self.config.respawn_delay).await.is_err() {
                return;
            }
            if self.try_spawn("restart") {
                return;
            }
        }

        tracing::error!(
            app = %self.app.name,
            phase = "restart",
            "No process after {} attempts, retrying in {:?}",
            self.config.respawn_attempts,
            self.config.respawn_cooldown
        );
        self.record_failure();
        self.respawn_at = Some(Instant::now() + self.config.respawn_cooldown);
    }

    fn respawn_or_cool_down(&mut self, phase: &str) {
        if !self.try_spawn(phase) {
            self.record_failure();
            self.respawn_at = Some(Instant::now() + self.config.respawn_cooldown);
        }
    }

    fn try_spawn(&mut self, phase: &str) -> bool {
        match self.launcher.spawn(&self.app.launch_spec()) {
            Ok(handle) => {
                tracing::info!(app = %self.app.name, phase, pid = ?handle.pid(), "Running {}", self.app);
                self.live = Some(handle);
                self.failures = 0;
                self.respawn_at = None;
                true
            }
            Err(e) => {
                tracing::error!(app = %self.app.name, phase, error = %e, "Failed to execute");
                false
            }
        }
    }

    fn record_failure(&mut self) {
        self.failures += 1;
        tracing::warn!(
            app = %self.app.name,
            failures = self.failures,
            ceiling = self.config.failure_ceiling,
            "Consecutive failure"
        );
    }

    async fn pause(&self, delay: Duration) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(UpkeepError::Cancelled(format!("pause of {:?} interrupted", delay))),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    async fn stop_live(&mut self) {
        let Some(handle) = self.live.take() else {
            return;
        };
        match self.terminator.stop(&handle).await {
            Ok(report) => tracing::info!(app = %self.app.name, phase = "shutdown", "Stopped with {}", report.status),
            Err(e) => tracing::error!(app = %self.app.name, phase = "shutdown", error = %e, "Failed to stop"),
        }
    }

    async fn give_up(&mut self) -> Result<()> {
        tracing::error!(
            app = %self.app.name,
            phase = "shutdown",
            "Giving up after {} consecutive failures",
            self.failures
        );
        self.cancel.cancel();
        self.stop_live().await;
        Err(UpkeepError::FailureBudgetExhausted(self.failures))
    }
}

/// Next config published on `updates`; `None` once the sender is gone.
/// Pending forever when there is no receiver.
async fn next_config(updates: &mut Option<watch::Receiver<AppConfig>>) -> Option<AppConfig> {
    let Some(rx) = updates.as_mut() else {
        return std::future::pending().await;
    };
    match rx.changed().await {
        Ok(()) => Some(rx.borrow_and_update().clone()),
        Err(_) => None,
    }
}
