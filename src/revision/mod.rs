//! Update detection.
//!
//! A [`RevisionSource`] synchronizes the app's working copy with upstream and
//! reports whether the revision moved. [`GitTracker`] is the git implementation.

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::app::ManagedApp;
use crate::error::{Result, UpkeepError};

pub mod git;

pub use git::{CloneRequest, GitTracker, clone_project, current_ref, locate_git};

/// Verdict of one update check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionCheckResult {
    /// Revision now checked out
    pub new_revision: String,
    /// True if it differs from the previously known one, or none was known
    pub changed: bool,
}

impl RevisionCheckResult {
    /// Compare a freshly observed revision against the previous one.
    pub fn compare(previous: &str, new_revision: String) -> Self {
        let changed = previous.is_empty() || previous != new_revision;
        Self { new_revision, changed }
    }
}

/// Something that can bring an app up to date and tell whether it moved.
#[async_trait]
pub trait RevisionSource: Send + Sync {
    /// Synchronize `app` with upstream.
    ///
    /// On success `app.revision` holds the new revision. On failure it is left
    /// untouched. Blocking steps stop early when `cancel` fires.
    async fn check_for_update(&self, app: &mut ManagedApp, cancel: &CancellationToken) -> Result<RevisionCheckResult>;
}

#[async_trait]
impl<R: RevisionSource + ?Sized> RevisionSource for Arc<R> {
    async fn check_for_update(&self, app: &mut ManagedApp, cancel: &CancellationToken) -> Result<RevisionCheckResult> {
        (**self).check_for_update(app, cancel).await
    }
}

/// No tracking configured: every check fails and the revision stays as it is.
#[async_trait]
impl<R: RevisionSource> RevisionSource for Option<R> {
    async fn check_for_update(&self, app: &mut ManagedApp, cancel: &CancellationToken) -> Result<RevisionCheckResult> {
        match self {
            Some(source) => source.check_for_update(app, cancel).await,
            None => Err(UpkeepError::Sync(format!("no revision tracking set up for '{}'", app.name))),
        }
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Revision source replaying scripted answers; once they run out it keeps
    /// reporting the app's current revision.
    #[derive(Debug, Default)]
    pub struct ScriptedSource {
        answers: Mutex<VecDeque<std::result::Result<String, String>>>,
        calls: AtomicU32,
    }

    impl ScriptedSource {
        pub fn new() -> Self {
            Self::default()
        }

        /// Next check observes `revision`.
        pub fn push_revision(&self, revision: &str) {
            self.answers.lock().unwrap().push_back(Ok(revision.to_string()));
        }

        /// Next check fails.
        pub fn push_failure(&self, message: &str) {
            self.answers.lock().unwrap().push_back(Err(message.to_string()));
        }

        pub fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RevisionSource for ScriptedSource {
        async fn check_for_update(&self, app: &mut ManagedApp, _cancel: &CancellationToken) -> Result<RevisionCheckResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let answer = self.answers.lock().unwrap().pop_front();
            let revision = match answer {
                Some(Ok(revision)) => revision,
                Some(Err(message)) => return Err(UpkeepError::Sync(message)),
                None if app.revision.is_empty() => "initial".to_string(),
                None => app.revision.clone(),
            };
            let result = RevisionCheckResult::compare(&app.revision, revision);
            app.revision = result.new_revision.clone();
            Ok(result)
        }
    }
}
