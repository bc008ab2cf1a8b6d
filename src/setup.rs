//! Startup: turn the loaded config and command-line options into a runnable app.
//!
//! Resolves defaults derived from the project name, clones the project on first
//! run, finds the branch to track and checks that the working directory exists.

use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use crate::app::ManagedApp;
use crate::config::{AppConfig, Overrides};
use crate::error::Result;
use crate::revision::{CloneRequest, GitTracker, clone_project, current_ref, locate_git};

/// Default remote projects are cloned from.
pub const DEFAULT_REMOTE: &str = "https://github.com";

/// Default parent directory of cloned projects.
pub const DEFAULT_SRC_ROOT: &str = "/src";

/// Set in the app's environment to the checkout directory of a cloned project.
pub const APP_HOME: &str = "APP_HOME";

/// Startup options that do not come from the config file.
#[derive(Debug, Clone)]
pub struct SetupOptions {
    /// `Org/Project` to clone on first run
    pub project: Option<String>,
    /// Remote base URL
    pub remote: String,
    /// Parent of project checkouts
    pub src_root: PathBuf,
    /// Branch to track; the checked-out one when `None`
    pub branch: Option<String>,
    /// Command-line values taking precedence over the file
    pub overrides: Overrides,
}

impl Default for SetupOptions {
    fn default() -> Self {
        Self {
            project: None,
            remote: DEFAULT_REMOTE.to_string(),
            src_root: PathBuf::from(DEFAULT_SRC_ROOT),
            branch: None,
            overrides: Overrides::default(),
        }
    }
}

/// Everything the supervisor needs to start.
#[derive(Debug)]
pub struct Prepared {
    pub app: ManagedApp,
    /// Effective config, the starting point for hot reload
    pub config: AppConfig,
    /// Overrides to re-apply on every reload
    pub overrides: Overrides,
    /// Present when the app is tracked
    pub tracker: Option<GitTracker>,
}

/// App name derived from a project: `Org/MyProject` -> `myproject`.
pub fn project_name(project: &str) -> String {
    project
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(project)
        .trim_end_matches(".git")
        .to_lowercase()
}

/// Fill name and directory from the project when neither the command line nor
/// the file sets them, and point `APP_HOME` at the checkout.
pub fn effective_overrides(config: &AppConfig, options: &SetupOptions) -> Overrides {
    let mut overrides = options.overrides.clone();
    let Some(project) = &options.project else {
        return overrides;
    };

    if overrides.name.is_none() && config.name.trim().is_empty() {
        overrides.name = Some(project_name(project));
    }
    if overrides.directory.is_none() && config.directory.as_os_str().is_empty() {
        let name = overrides.name.clone().unwrap_or_else(|| config.name.clone());
        overrides.directory = Some(options.src_root.join(name));
    }
    if !overrides.env.contains_key(APP_HOME) && !config.env.contains_key(APP_HOME) {
        let home = overrides.directory.clone().unwrap_or_else(|| config.directory.clone());
        overrides.env.insert(APP_HOME.to_string(), home.to_string_lossy().into_owned());
    }
    overrides
}

/// Prepare the app for supervision.
pub async fn prepare(config: AppConfig, options: &SetupOptions, cancel: &CancellationToken) -> Result<Prepared> {
    let overrides = effective_overrides(&config, options);
    let config = overrides.apply(config);
    let app = ManagedApp::from_config(&config)?;

    let needs_git = options.project.is_some() || app.tracked;
    let git = if needs_git { Some(locate_git()?) } else { None };

    if let (Some(git), Some(project)) = (&git, &options.project) {
        let request = CloneRequest {
            remote: options.remote.clone(),
            project: project.clone(),
            branch: options.branch.clone(),
            dest: app.directory.clone(),
            uid: app.uid,
            gid: app.gid,
        };
        clone_project(git, &request, cancel).await?;
    }

    app.check_directory()?;

    let tracker = match git {
        Some(git) if app.tracked => {
            let reference = match &options.branch {
                Some(branch) => branch.clone(),
                None => current_ref(&git, &app.directory, app.uid, app.gid, cancel).await?,
            };
            log::info!("Tracking {} of {}", reference, app.directory.display());
            Some(GitTracker::new(git, reference))
        }
        _ => None,
    };

    Ok(Prepared {
        app,
        config,
        overrides,
        tracker,
    })
}
