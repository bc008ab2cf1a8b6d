//! Git-backed revision tracking.
//!
//! Every check runs, in the app's directory and as the app's uid/gid:
//!
//! 1. `git remote update -p`
//! 2. `git checkout <ref>`
//! 3. `git merge --ff --strategy recursive -Xpatience -Xrenormalize @{u}`
//! 4. `git rev-parse HEAD`
//!
//! The first failing step aborts the check. Every step has its own timeout so a
//! hung remote cannot hold up the supervisor.

use async_trait::async_trait;
use std::env;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::{RevisionCheckResult, RevisionSource};
use crate::app::ManagedApp;
use crate::error::{Result, UpkeepError};
use crate::process::{ExitStatus, set_identity};

/// Time allowed for a single update step.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Time allowed for the first-run clone.
pub const DEFAULT_CLONE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Keeps a git checkout on `reference` up to date with its upstream.
#[derive(Debug, Clone)]
pub struct GitTracker {
    git: PathBuf,
    reference: String,
    step_timeout: Duration,
}

impl GitTracker {
    /// Create a tracker using the git binary at `git`.
    pub fn new(git: impl Into<PathBuf>, reference: impl Into<String>) -> Self {
        Self {
            git: git.into(),
            reference: reference.into(),
            step_timeout: DEFAULT_STEP_TIMEOUT,
        }
    }

    pub fn with_step_timeout(mut self, step_timeout: Duration) -> Self {
        self.step_timeout = step_timeout;
        self
    }

    /// Branch or ref checked out before every merge.
    pub fn reference(&self) -> &str {
        &self.reference
    }

    async fn step(&self, app: &ManagedApp, args: &[&str], cancel: &CancellationToken) -> Result<String> {
        let cmd = git_command(&self.git, &app.directory, app.uid, app.gid, args);
        run_git(cmd, args, self.step_timeout, cancel).await
    }
}

#[async_trait]
impl RevisionSource for GitTracker {
    async fn check_for_update(&self, app: &mut ManagedApp, cancel: &CancellationToken) -> Result<RevisionCheckResult> {
        tracing::debug!(app = %app.name, phase = "update", "Checking {} for updates", app.directory.display());

        self.step(app, &["remote", "update", "-p"], cancel).await?;
        self.step(app, &["checkout", self.reference.as_str()], cancel).await?;
        self.step(
            app,
            &["merge", "--ff", "--strategy", "recursive", "-Xpatience", "-Xrenormalize", "@{u}"],
            cancel,
        )
        .await?;
        let head = self.step(app, &["rev-parse", "HEAD"], cancel).await?;
        if head.is_empty() {
            return Err(UpkeepError::Sync(format!("git rev-parse HEAD printed nothing in {}", app.directory.display())));
        }

        let result = RevisionCheckResult::compare(&app.revision, head);
        if result.changed {
            tracing::info!(app = %app.name, phase = "update", from = %app.revision, to = %result.new_revision, "New revision");
        }
        app.revision = result.new_revision.clone();
        Ok(result)
    }
}

/// Where to clone a project from and to.
#[derive(Debug, Clone, Default)]
pub struct CloneRequest {
    /// Remote base, e.g. `https://github.com`
    pub remote: String,
    /// `Org/Project`
    pub project: String,
    /// Branch to clone; the remote's default when `None`
    pub branch: Option<String>,
    /// Checkout directory
    pub dest: PathBuf,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl CloneRequest {
    /// Full clone URL.
    pub fn url(&self) -> String {
        format!("{}/{}.git", self.remote.trim_end_matches('/'), self.project)
    }
}

/// Clone `request.project` into `request.dest` unless a checkout is already there.
///
/// Returns true when a clone was made.
pub async fn clone_project(git: &Path, request: &CloneRequest, cancel: &CancellationToken) -> Result<bool> {
    if request.dest.join(".git").exists() {
        log::debug!("{} already cloned", request.dest.display());
        return Ok(false);
    }

    let parent = match request.dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    tokio::fs::create_dir_all(parent).await?;

    let url = request.url();
    let dest = request.dest.to_string_lossy().into_owned();
    let mut args = vec!["clone", "--recursive", "--single-branch", "--progress"];
    if let Some(branch) = &request.branch {
        args.extend(["--branch", branch.as_str()]);
    }
    args.extend([url.as_str(), dest.as_str()]);

    log::info!("Cloning {} into {}", url, request.dest.display());
    let cmd = git_command(git, parent, request.uid, request.gid, &args);
    run_git(cmd, &args, DEFAULT_CLONE_TIMEOUT, cancel).await?;
    Ok(true)
}

/// The branch currently checked out in `dir`.
pub async fn current_ref(
    git: &Path,
    dir: &Path,
    uid: Option<u32>,
    gid: Option<u32>,
    cancel: &CancellationToken,
) -> Result<String> {
    let args = ["rev-parse", "--abbrev-ref", "HEAD"];
    let reference = run_git(git_command(git, dir, uid, gid, &args), &args, DEFAULT_STEP_TIMEOUT, cancel).await?;
    if reference.is_empty() {
        return Err(UpkeepError::Sync(format!("no ref checked out in {}", dir.display())));
    }
    Ok(reference)
}

/// Find `git` on `PATH`.
pub fn locate_git() -> Result<PathBuf> {
    let path = env::var_os("PATH").ok_or_else(|| UpkeepError::Config("PATH is not set".to_string()))?;
    env::split_paths(&path)
        .map(|dir| dir.join("git"))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| UpkeepError::Config("git not found on PATH".to_string()))
}

fn git_command(git: &Path, dir: &Path, uid: Option<u32>, gid: Option<u32>, args: &[&str]) -> Command {
    let mut cmd = Command::new(git);
    cmd.args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .kill_on_drop(true);
    set_identity(&mut cmd, uid, gid);
    cmd
}

/// Run a git command to completion and return its trimmed stdout.
///
/// The child is killed when cancelled or after `limit`.
async fn run_git(mut cmd: Command, args: &[&str], limit: Duration, cancel: &CancellationToken) -> Result<String> {
    let what = args.first().copied().unwrap_or("git");

    let output = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            return Err(UpkeepError::Sync(format!("git {} cancelled", what)));
        }
        output = tokio::time::timeout(limit, cmd.output()) => match output {
            Ok(output) => output.map_err(|e| UpkeepError::Sync(format!("failed to run git {}: {}", what, e)))?,
            Err(_) => return Err(UpkeepError::Sync(format!("git {} timed out after {:?}", what, limit))),
        },
    };

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    if !output.status.success() {
        return Err(UpkeepError::Sync(format!(
            "git {} failed with {}: {}",
            args.join(" "),
            ExitStatus::from(output.status),
            combined.trim()
        )));
    }

    log::debug!("git {}: {}", args.join(" "), combined.trim());
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
