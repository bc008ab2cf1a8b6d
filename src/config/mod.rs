//! App configuration.
//!
//! Loaded from an explicit path, ./upkeep.yml or ~/.config/upkeep/upkeep.yml.
//! The file describes the one app the supervisor keeps running:
//!
//! ```yaml
//! name: echo
//! directory: /bin
//! command: "echo foobar"
//! git: false
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, UpkeepError};

pub mod watch;

pub use watch::ConfigWatcher;

/// File name searched for when no explicit config path is given.
pub const CONFIG_FILE_NAME: &str = "upkeep.yml";

/// Configuration of the managed app.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// App name, used in logs.
    pub name: String,

    /// Working directory of the app and of its git checkout.
    pub directory: PathBuf,

    /// Command line; `$VAR`/`${VAR}` are expanded, then split on whitespace.
    pub command: String,

    /// Whether the directory is a git checkout to keep up to date.
    #[serde(rename = "git")]
    pub tracked: bool,

    /// Restart on every update tick, even without a new revision.
    pub always_restart: bool,

    /// User id the app and its git commands run as; unset inherits ours.
    pub uid: Option<u32>,

    /// Group id the app and its git commands run as; unset inherits ours.
    pub gid: Option<u32>,

    /// Environment overrides for the app.
    pub env: HashMap<String, String>,
}

impl AppConfig {
    /// Locate and load the config file.
    ///
    /// Search order:
    /// 1. Explicit path if provided
    /// 2. ./upkeep.yml
    /// 3. ~/.config/upkeep/upkeep.yml
    ///
    /// There is no useful default app, so finding nothing is an error.
    pub fn load(config_path: Option<&PathBuf>) -> Result<(Self, PathBuf)> {
        let path = Self::resolve_path(config_path)?;
        let config = Self::load_from_file(&path)?;
        Ok((config, path))
    }

    /// Find the config file to use without reading it.
    pub fn resolve_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
        if let Some(path) = config_path {
            return Ok(path.clone());
        }

        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Ok(local);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("upkeep").join(CONFIG_FILE_NAME);
            if user_config.exists() {
                return Ok(user_config);
            }
        }

        Err(UpkeepError::Config(format!(
            "no config file given and none found at ./{} or the user config dir",
            CONFIG_FILE_NAME
        )))
    }

    /// Read and parse a config file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| UpkeepError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        let config = Self::from_yaml(&content)
            .map_err(|e| UpkeepError::Config(format!("failed to parse {}: {}", path.display(), e)))?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse config from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(UpkeepError::Config("name must not be empty".to_string()));
        }
        self.command_line()?;
        Ok(())
    }

    /// The command expanded and tokenized. Variables come from the app's `env`
    /// first, then from the supervisor's environment.
    pub fn command_line(&self) -> Result<Vec<String>> {
        let expanded = expand_env(&self.command, |key| {
            self.env.get(key).cloned().or_else(|| std::env::var(key).ok())
        });
        let argv: Vec<String> = expanded.split_whitespace().map(str::to_string).collect();
        if argv.is_empty() {
            return Err(UpkeepError::Config(format!("command for '{}' is empty", self.name)));
        }
        Ok(argv)
    }
}

/// Values given on the command line that take precedence over the file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    /// App name
    pub name: Option<String>,
    /// Working directory
    pub directory: Option<PathBuf>,
    /// User id
    pub uid: Option<u32>,
    /// Group id
    pub gid: Option<u32>,
    /// Extra environment, merged over the file's `env`
    pub env: HashMap<String, String>,
}

impl Overrides {
    /// Overlay these values on a config read from disk.
    pub fn apply(&self, mut config: AppConfig) -> AppConfig {
        if let Some(name) = &self.name {
            config.name = name.clone();
        }
        if let Some(directory) = &self.directory {
            config.directory = directory.clone();
        }
        if self.uid.is_some() {
            config.uid = self.uid;
        }
        if self.gid.is_some() {
            config.gid = self.gid;
        }
        config.env.extend(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        config
    }
}

/// Replace `$VAR` and `${VAR}` with values from `lookup`.
///
/// Unset variables expand to nothing. A `$` not followed by a name is kept.
pub fn expand_env<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }

        match chars.peek() {
            Some(&(start, '{')) => {
                let rest = &input[start + 1..];
                if let Some(end) = rest.find('}') {
                    let key = &rest[..end];
                    out.push_str(&lookup(key).unwrap_or_default());
                    // skip past the closing brace
                    for _ in 0..=end + 1 {
                        chars.next();
                    }
                } else {
                    out.push_str(&input[i..]);
                    break;
                }
            }
            Some(&(start, n)) if n == '_' || n.is_ascii_alphanumeric() => {
                let len = input[start..]
                    .find(|ch: char| ch != '_' && !ch.is_ascii_alphanumeric())
                    .unwrap_or(input.len() - start);
                let key = &input[start..start + len];
                out.push_str(&lookup(key).unwrap_or_default());
                for _ in 0..len {
                    chars.next();
                }
            }
            _ => out.push('$'),
        }
    }

    out
}
