//! The managed app: everything the supervisor knows about the one process it keeps alive.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use crate::config::AppConfig;
use crate::error::{Result, UpkeepError};
use crate::process::LaunchSpec;

/// Long-lived state of the supervised app.
///
/// Owned by a single supervisor task; nothing else mutates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedApp {
    /// App name, used in logs
    pub name: String,
    /// Working directory (and git checkout when tracked)
    pub directory: PathBuf,
    /// Program followed by its arguments
    pub command: Vec<String>,
    /// User id for the app and its git commands
    pub uid: Option<u32>,
    /// Group id for the app and its git commands
    pub gid: Option<u32>,
    /// Environment overrides
    pub env: HashMap<String, String>,
    /// Whether update detection applies at all
    pub tracked: bool,
    /// Restart on every tick regardless of version change
    pub always_restart: bool,
    /// Last observed revision; empty when unknown
    pub revision: String,
}

impl ManagedApp {
    /// Build an app from a loaded config.
    ///
    /// Fails when the config has no name or an empty command.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            name: config.name.clone(),
            directory: config.directory.clone(),
            command: config.command_line()?,
            uid: config.uid,
            gid: config.gid,
            env: config.env.clone(),
            tracked: config.tracked,
            always_restart: config.always_restart,
            revision: String::new(),
        })
    }

    /// Replace the configured fields with a newer config, keeping the revision.
    ///
    /// Returns true when the launch parameters changed and the running process is
    /// now out of date. A directory of `""` in the new config keeps the current one.
    ///
    /// Tracking is fixed at startup: a config that switches `git` on or off, or
    /// moves a tracked checkout, is rejected and the app is left untouched.
    pub fn apply_config(&mut self, config: &AppConfig) -> Result<bool> {
        config.validate()?;
        let command = config.command_line()?;
        let directory = if config.directory.as_os_str().is_empty() {
            self.directory.clone()
        } else {
            config.directory.clone()
        };

        if config.tracked != self.tracked {
            return Err(UpkeepError::Config(format!(
                "'{}' cannot switch git tracking {} without a restart of upkeep",
                self.name,
                if config.tracked { "on" } else { "off" }
            )));
        }
        if self.tracked && directory != self.directory {
            return Err(UpkeepError::Config(format!(
                "'{}' cannot move its checkout from {} to {} without a restart of upkeep",
                self.name,
                self.directory.display(),
                directory.display()
            )));
        }

        let before = self.launch_spec();
        self.name = config.name.clone();
        self.directory = directory;
        self.command = command;
        self.uid = config.uid;
        self.gid = config.gid;
        self.env = config.env.clone();
        self.tracked = config.tracked;
        self.always_restart = config.always_restart;

        Ok(before != self.launch_spec())
    }

    /// What to hand to the launcher for the next spawn.
    pub fn launch_spec(&self) -> LaunchSpec {
        let (program, args) = match self.command.split_first() {
            Some((program, args)) => (program.clone(), args.to_vec()),
            None => (String::new(), Vec::new()),
        };
        LaunchSpec {
            name: self.name.clone(),
            program,
            args,
            dir: self.directory.clone(),
            env: self.env.clone(),
            uid: self.uid,
            gid: self.gid,
        }
    }

    /// Make sure the directory exists before anything runs in it.
    pub fn check_directory(&self) -> Result<()> {
        if self.directory.as_os_str().is_empty() {
            return Err(UpkeepError::Config(format!("no directory configured for '{}'", self.name)));
        }
        if !self.directory.is_dir() {
            return Err(UpkeepError::Config(format!(
                "directory {} for '{}' does not exist",
                self.directory.display(),
                self.name
            )));
        }
        Ok(())
    }
}

impl fmt::Display for ManagedApp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rev = if self.revision.is_empty() {
            "unknown"
        } else {
            self.revision.char_indices().nth(10).map_or(self.revision.as_str(), |(end, _)| &self.revision[..end])
        };
        write!(
            f,
            "{} git({}) restart({}) rev: {}",
            self.name, self.tracked, self.always_restart, rev
        )
    }
}
