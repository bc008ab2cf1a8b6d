//! The supervisor: keeps one app running and up to date.
//!
//! [`SupervisorLoop`] multiplexes cancellation, process exit, pending respawns,
//! config reloads and update ticks in one task. [`RestartDecision`] is the pure
//! verdict an update tick acts on.

use std::time::Duration;

use crate::termination::TerminationConfig;

pub mod decision;
pub mod event_loop;

pub use decision::RestartDecision;
pub use event_loop::SupervisorLoop;

/// Default time between update ticks.
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default number of consecutive failures before giving up.
pub const DEFAULT_FAILURE_CEILING: u32 = 10;

/// Default wait before retrying after a failed respawn.
pub const DEFAULT_RESPAWN_COOLDOWN: Duration = Duration::from_secs(2 * 60);

/// Supervisor timing and limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SupervisorConfig {
    /// Period of update ticks
    pub update_interval: Duration,
    /// Consecutive failures that end the supervisor
    pub failure_ceiling: u32,
    /// Wait before the next spawn attempt after a failed respawn
    pub respawn_cooldown: Duration,
    /// Spawn attempts when restarting on a tick
    pub respawn_attempts: u32,
    /// Pause between those attempts
    pub respawn_delay: Duration,
    /// How running processes are stopped
    pub termination: TerminationConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            update_interval: DEFAULT_UPDATE_INTERVAL,
            failure_ceiling: DEFAULT_FAILURE_CEILING,
            respawn_cooldown: DEFAULT_RESPAWN_COOLDOWN,
            respawn_attempts: 3,
            respawn_delay: Duration::from_secs(20),
            termination: TerminationConfig::default(),
        }
    }
}

impl SupervisorConfig {
    /// Defaults with a different update interval.
    pub fn with_update_interval(update_interval: Duration) -> Self {
        Self {
            update_interval,
            ..Self::default()
        }
    }
}
