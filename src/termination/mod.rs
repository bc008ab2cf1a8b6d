//! Graceful-then-forceful process termination.
//!
//! One attempt walks `Running -> TermSent -> {Exited | KillSent} -> Exited`:
//! SIGTERM, wait up to the grace period, SIGKILL, wait up to the kill period. An
//! attempt that runs out of time fails with [`UpkeepError::TerminationTimeout`].
//! Attempts are retried with [`retry_notify`] until the backoff budget runs out.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::error::{Result, UpkeepError};
use crate::process::{ExitStatus, ProcessHandle, StopSignal};
use crate::retry::{BackoffPolicy, retry_notify};

/// Default time a process gets to exit after SIGTERM.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);

/// Default time to wait for the exit after SIGKILL.
pub const DEFAULT_KILL_WAIT: Duration = Duration::from_secs(5);

/// Timing of a stop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TerminationConfig {
    /// Wait after SIGTERM before escalating
    pub grace: Duration,
    /// Wait after SIGKILL before the attempt fails
    pub kill_wait: Duration,
    /// Retry policy wrapped around whole attempts
    pub backoff: BackoffPolicy,
}

impl Default for TerminationConfig {
    fn default() -> Self {
        Self {
            grace: DEFAULT_GRACE,
            kill_wait: DEFAULT_KILL_WAIT,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Where a stop attempt is in its escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationState {
    Running,
    TermSent,
    KillSent,
    Exited,
}

impl fmt::Display for TerminationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TerminationState::Running => "running",
            TerminationState::TermSent => "term-sent",
            TerminationState::KillSent => "kill-sent",
            TerminationState::Exited => "exited",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of a successful stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopReport {
    /// Attempts made, including the successful one
    pub attempts: u32,
    /// SIGTERMs delivered over all attempts
    pub term_sent: u32,
    /// SIGKILLs delivered over all attempts
    pub kill_sent: u32,
    /// State the successful attempt was in when the exit was observed
    pub exited_after: TerminationState,
    /// How the process ended
    pub status: ExitStatus,
}

/// Stops processes, escalating from SIGTERM to SIGKILL.
#[derive(Debug, Clone, Default)]
pub struct TerminationController {
    config: TerminationConfig,
}

#[derive(Default)]
struct Counters {
    attempts: AtomicU32,
    term_sent: AtomicU32,
    kill_sent: AtomicU32,
}

impl TerminationController {
    pub fn new(config: TerminationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TerminationConfig {
        &self.config
    }

    /// Stop `handle` and wait until its exit has been observed.
    ///
    /// A process that already exited is reported without sending anything. When
    /// every attempt within the backoff budget failed, returns
    /// [`UpkeepError::StopFailed`] carrying the last attempt's error.
    pub async fn stop<H: ProcessHandle>(&self, handle: &H) -> Result<StopReport> {
        let counters = Counters::default();
        let pid = handle.pid();

        let outcome = retry_notify(
            &self.config.backoff,
            || self.attempt(handle, &counters),
            |e, delay| {
                tracing::warn!(pid = ?pid, phase = "stop", error = %e, "Stop attempt failed, retrying in {:?}", delay);
            },
        )
        .await;

        let attempts = counters.attempts.load(Ordering::SeqCst);
        match outcome {
            Ok((exited_after, status)) => Ok(StopReport {
                attempts,
                term_sent: counters.term_sent.load(Ordering::SeqCst),
                kill_sent: counters.kill_sent.load(Ordering::SeqCst),
                exited_after,
                status,
            }),
            Err(e) => Err(UpkeepError::StopFailed(format!(
                "process {:?} still running after {} attempts: {}",
                pid, attempts, e
            ))),
        }
    }

    async fn attempt<H: ProcessHandle>(&self, handle: &H, counters: &Counters) -> Result<(TerminationState, ExitStatus)> {
        counters.attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(status) = handle.try_status() {
            return Ok((TerminationState::Running, status));
        }
        let mut exited = handle.exited();

        handle.signal(StopSignal::Terminate)?;
        counters.term_sent.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(pid = ?handle.pid(), state = %TerminationState::TermSent, "Waiting up to {:?}", self.config.grace);

        if let Ok(status) = tokio::time::timeout(self.config.grace, &mut exited).await {
            return Ok((TerminationState::TermSent, status));
        }

        tracing::warn!(
            pid = ?handle.pid(),
            "Process ignored SIGTERM for {:?}, sending SIGKILL",
            self.config.grace
        );
        handle.signal(StopSignal::Kill)?;
        counters.kill_sent.fetch_add(1, Ordering::SeqCst);

        match tokio::time::timeout(self.config.kill_wait, exited).await {
            Ok(status) => Ok((TerminationState::KillSent, status)),
            Err(_) => Err(UpkeepError::TerminationTimeout(format!(
                "no exit {:?} after SIGKILL",
                self.config.kill_wait
            ))),
        }
    }
}
