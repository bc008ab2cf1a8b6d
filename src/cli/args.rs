//! CLI argument definitions using clap.

use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use upkeep::config::Overrides;
use upkeep::setup::{DEFAULT_REMOTE, DEFAULT_SRC_ROOT, SetupOptions};

/// upkeep - keeps one app running and up to date with its git repository
#[derive(Parser, Debug)]
#[command(name = "upkeep")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Project to clone on first run, e.g. Org/Project
    pub project: Option<String>,

    /// App name; defaults to the config name, then the lowercased project name
    #[arg(long)]
    pub name: Option<String>,

    /// Config file path
    #[arg(short = 'C', long, env = "UPKEEP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Branch to track; defaults to the checked-out one
    #[arg(short, long, env = "BRANCH")]
    pub branch: Option<String>,

    /// Remote projects are cloned from
    #[arg(long, default_value = DEFAULT_REMOTE)]
    pub remote: String,

    /// Parent directory of project checkouts
    #[arg(long, default_value = DEFAULT_SRC_ROOT)]
    pub src_root: PathBuf,

    /// Time between update checks, e.g. 30m or 24h
    #[arg(short = 'u', long, env = "UPDATE_INTERVAL", default_value = "24h", value_parser = parse_interval)]
    pub update_interval: Duration,

    /// User id to run the app as
    #[arg(long, env = "APP_UID")]
    pub uid: Option<u32>,

    /// Group id to run the app as
    #[arg(long, env = "APP_GID")]
    pub gid: Option<u32>,

    /// Extra environment for the app (repeatable)
    #[arg(short, long = "env", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub env: Vec<(String, String)>,

    /// Reload the config file when it changes
    #[arg(long)]
    pub watch_config: bool,

    /// Log level
    #[arg(short, long, env = "LOG_LEVEL", value_parser = ["trace", "debug", "info", "warn", "error"])]
    pub log_level: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Effective log filter: `--log-level`, then debug for `-v`; `None` defers to `RUST_LOG`.
    pub fn log_filter(&self) -> Option<&str> {
        match (&self.log_level, self.verbose) {
            (Some(level), _) => Some(level.as_str()),
            (None, true) => Some("debug"),
            (None, false) => None,
        }
    }

    /// Values that override the config file.
    pub fn overrides(&self) -> Overrides {
        Overrides {
            name: self.name.clone(),
            directory: None,
            uid: self.uid,
            gid: self.gid,
            env: self.env.iter().cloned().collect::<HashMap<_, _>>(),
        }
    }

    pub fn setup_options(&self) -> SetupOptions {
        SetupOptions {
            project: self.project.clone(),
            remote: self.remote.clone(),
            src_root: self.src_root.clone(),
            branch: self.branch.clone(),
            overrides: self.overrides(),
        }
    }
}

/// Parse a humantime duration that must be longer than zero.
fn parse_interval(s: &str) -> Result<Duration, String> {
    let interval = humantime::parse_duration(s).map_err(|e| e.to_string())?;
    if interval.is_zero() {
        return Err("update interval must be longer than zero".to_string());
    }
    Ok(interval)
}

/// Parse `KEY=VALUE`; the value may itself contain `=`.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no `=` found in `{}`", s))?;
    if key.is_empty() {
        return Err(format!("invalid KEY=VALUE: empty key in `{}`", s));
    }
    Ok((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_no_args() {
        let cli = Cli::try_parse_from(["upkeep"]).unwrap();
        assert!(cli.project.is_none());
        assert!(!cli.verbose);
        assert!(!cli.watch_config);
        assert_eq!(cli.remote, "https://github.com");
        assert_eq!(cli.src_root, PathBuf::from("/src"));
        assert!(cli.env.is_empty());
    }

    #[test]
    fn test_cli_project_and_name() {
        let cli = Cli::try_parse_from(["upkeep", "Org/Web", "--name", "frontend"]).unwrap();
        assert_eq!(cli.project.as_deref(), Some("Org/Web"));
        assert_eq!(cli.name.as_deref(), Some("frontend"));
    }

    #[test]
    fn test_cli_config_option() {
        let cli = Cli::try_parse_from(["upkeep", "-C", "/etc/upkeep.yml"]).unwrap();
        assert_eq!(cli.config.as_ref(), Some(&PathBuf::from("/etc/upkeep.yml")));
    }

    #[test]
    fn test_cli_update_interval() {
        let cli = Cli::try_parse_from(["upkeep", "-u", "90m"]).unwrap();
        assert_eq!(cli.update_interval, Duration::from_secs(90 * 60));

        assert!(Cli::try_parse_from(["upkeep", "-u", "soon"]).is_err());
        assert!(Cli::try_parse_from(["upkeep", "-u", "0s"]).is_err());
        assert!(Cli::try_parse_from(["upkeep", "--update-interval", "0ms"]).is_err());
    }

    #[test]
    fn test_cli_env_pairs() {
        let cli = Cli::try_parse_from(["upkeep", "-e", "FOO=bar", "--env", "URL=a=b"]).unwrap();
        let overrides = cli.overrides();
        assert_eq!(overrides.env.get("FOO").map(String::as_str), Some("bar"));
        assert_eq!(overrides.env.get("URL").map(String::as_str), Some("a=b"));

        assert!(Cli::try_parse_from(["upkeep", "-e", "novalue"]).is_err());
        assert!(Cli::try_parse_from(["upkeep", "-e", "=value"]).is_err());
    }

    #[test]
    fn test_cli_identity_overrides() {
        let cli = Cli::try_parse_from(["upkeep", "--uid", "7000", "--gid", "7001"]).unwrap();
        let overrides = cli.overrides();
        assert_eq!(overrides.uid, Some(7000));
        assert_eq!(overrides.gid, Some(7001));
    }

    #[test]
    fn test_cli_log_filter() {
        let cli = Cli::try_parse_from(["upkeep", "-l", "warn", "-v"]).unwrap();
        assert_eq!(cli.log_filter(), Some("warn"));
        assert!(Cli::try_parse_from(["upkeep", "-l", "loud"]).is_err());
    }

    #[test]
    fn test_cli_setup_options() {
        let cli = Cli::try_parse_from(["upkeep", "Org/Web", "--remote", "https://git.example.com", "-b", "stable"])
            .unwrap();
        let options = cli.setup_options();
        assert_eq!(options.project.as_deref(), Some("Org/Web"));
        assert_eq!(options.remote, "https://git.example.com");
        assert_eq!(options.branch.as_deref(), Some("stable"));
    }
}
