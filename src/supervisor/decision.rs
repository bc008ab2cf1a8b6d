//! Whether an update tick restarts the app.

use std::fmt;

use crate::app::ManagedApp;
use crate::revision::RevisionCheckResult;

/// Outcome of an update tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Keep the running process
    NoRestart,
    /// Upstream moved
    VersionChanged,
    /// `always_restart` is set
    Policy,
    /// Not a tracked app; every tick restarts it
    NotTracked,
}

impl RestartDecision {
    /// Decide from the app's flags and, for tracked apps, the check result.
    ///
    /// An untracked app restarts regardless of `check`. A tracked app without a
    /// check result only restarts by policy.
    pub fn decide(app: &ManagedApp, check: Option<&RevisionCheckResult>) -> Self {
        if !app.tracked {
            RestartDecision::NotTracked
        } else if check.is_some_and(|c| c.changed) {
            RestartDecision::VersionChanged
        } else if app.always_restart {
            RestartDecision::Policy
        } else {
            RestartDecision::NoRestart
        }
    }

    pub fn should_restart(&self) -> bool {
        !matches!(self, RestartDecision::NoRestart)
    }
}

impl fmt::Display for RestartDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RestartDecision::NoRestart => "no restart",
            RestartDecision::VersionChanged => "version changed",
            RestartDecision::Policy => "always restart",
            RestartDecision::NotTracked => "not tracked",
        };
        write!(f, "{}", s)
    }
}
