//! Process capability: spawning, signalling and observing the managed child.
//!
//! [`Launcher`] and [`ProcessHandle`] are the seam between the supervisor and the
//! OS. The real implementation lives in [`child`]; tests substitute fakes.

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::error::Result;

pub mod child;
#[cfg(test)]
pub(crate) mod fake;

pub use child::{ChildHandle, CommandLauncher};

/// Signals the supervisor sends to stop a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StopSignal {
    /// Graceful stop request (SIGTERM)
    Terminate,
    /// Unconditional kill (SIGKILL)
    Kill,
}

impl fmt::Display for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopSignal::Terminate => write!(f, "SIGTERM"),
            StopSignal::Kill => write!(f, "SIGKILL"),
        }
    }
}

/// How a process ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExitStatus {
    /// Exit code if the process exited normally
    pub code: Option<i32>,
    /// Signal that terminated the process
    pub signal: Option<i32>,
}

impl ExitStatus {
    /// Status for a process that exited with `code`.
    pub fn exited(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    /// Status for a process killed by signal number `signal`.
    pub fn signaled(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    /// Returns true if the process exited with code 0
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            Self {
                code: status.code(),
                signal: status.signal(),
            }
        }
        #[cfg(not(unix))]
        {
            Self {
                code: status.code(),
                signal: None,
            }
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => write!(f, "unknown status"),
        }
    }
}

/// Everything needed to start the managed process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchSpec {
    /// App name, used in logs
    pub name: String,
    /// Program to run, resolved through PATH
    pub program: String,
    /// Arguments
    pub args: Vec<String>,
    /// Working directory
    pub dir: PathBuf,
    /// Environment overrides on top of the supervisor's environment
    pub env: HashMap<String, String>,
    /// User id; `None` inherits the supervisor's
    pub uid: Option<u32>,
    /// Group id; `None` inherits the supervisor's
    pub gid: Option<u32>,
}

impl fmt::Display for LaunchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Combined stdout/stderr of one process lifetime.
///
/// Cheap to clone; clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl OutputBuffer {
    /// Append raw bytes.
    pub fn append(&self, bytes: &[u8]) {
        let mut buf = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        buf.extend_from_slice(bytes);
    }

    /// Everything captured so far, lossily decoded.
    pub fn contents(&self) -> String {
        let buf = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Number of captured bytes.
    pub fn len(&self) -> usize {
        self.inner.lock().map(|buf| buf.len()).unwrap_or(0)
    }

    /// True when nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A live (or exited) child process owned by the supervisor.
pub trait ProcessHandle: Send + Sync {
    /// OS process id, if known
    fn pid(&self) -> Option<u32>;

    /// Deliver a stop signal. A no-op once the exit has been observed.
    fn signal(&self, signal: StopSignal) -> Result<()>;

    /// Resolves once the process has terminated, for any cause.
    ///
    /// The returned future owns what it needs, so it is cancel-safe and can be
    /// recreated any number of times; every one of them yields the same status.
    fn exited(&self) -> BoxFuture<'static, ExitStatus>;

    /// The exit status if the process has already terminated.
    fn try_status(&self) -> Option<ExitStatus>;

    /// Output captured for this process lifetime.
    fn output(&self) -> OutputBuffer;
}

/// Capability to start processes.
pub trait Launcher: Send + Sync {
    /// Handle type produced by this launcher.
    type Handle: ProcessHandle + 'static;

    /// Start a process. Fails when the program cannot be resolved or the OS
    /// refuses to create it.
    fn spawn(&self, spec: &LaunchSpec) -> Result<Self::Handle>;
}

impl<L: Launcher + ?Sized> Launcher for Arc<L> {
    type Handle = L::Handle;

    fn spawn(&self, spec: &LaunchSpec) -> Result<Self::Handle> {
        (**self).spawn(spec)
    }
}

/// Run `cmd` as `uid`/`gid` when set and different from our own effective ids.
///
/// Switching identity requires privileges; an unprivileged supervisor asked to run
/// as itself must not attempt it.
#[cfg(unix)]
pub(crate) fn set_identity(cmd: &mut tokio::process::Command, uid: Option<u32>, gid: Option<u32>) {
    use nix::unistd::{getegid, geteuid};

    if let Some(gid) = gid
        && gid != getegid().as_raw()
    {
        cmd.gid(gid);
    }
    if let Some(uid) = uid
        && uid != geteuid().as_raw()
    {
        cmd.uid(uid);
    }
}

#[cfg(not(unix))]
pub(crate) fn set_identity(_cmd: &mut tokio::process::Command, _uid: Option<u32>, _gid: Option<u32>) {}
