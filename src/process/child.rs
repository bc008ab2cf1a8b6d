//! OS-backed launcher built on `tokio::process`.
//!
//! Each spawned child gets a reaper task that pumps stdout and stderr into the
//! handle's [`OutputBuffer`], waits for the process and publishes its exit status
//! once on a watch channel. Signals stop as soon as the process is reaped, before
//! its output has finished draining, so a recycled pid is never signalled.

use futures::FutureExt;
use futures::future::BoxFuture;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;

use super::{ExitStatus, LaunchSpec, Launcher, OutputBuffer, ProcessHandle, StopSignal, set_identity};
use crate::error::{Result, UpkeepError};

/// How long the reaper waits for output to drain after the process exited.
/// Grandchildren holding the pipes open must not delay the exit notification.
const OUTPUT_DRAIN: Duration = Duration::from_secs(1);

/// Launches real OS processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandLauncher;

impl CommandLauncher {
    /// Create a new launcher
    pub fn new() -> Self {
        Self
    }
}

impl Launcher for CommandLauncher {
    type Handle = ChildHandle;

    fn spawn(&self, spec: &LaunchSpec) -> Result<ChildHandle> {
        if spec.program.is_empty() {
            return Err(UpkeepError::Spawn(format!("no program configured for '{}'", spec.name)));
        }

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.dir)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        set_identity(&mut cmd, spec.uid, spec.gid);

        let mut child = cmd.spawn().map_err(|e| {
            UpkeepError::Spawn(format!("failed to start '{}' in {}: {}", spec, spec.dir.display(), e))
        })?;

        let pid = child.id();
        let output = OutputBuffer::default();
        let (status_tx, status_rx) = watch::channel(None);
        let reaped = Arc::new(AtomicBool::new(false));

        tracing::info!(app = %spec.name, pid = ?pid, "Started '{}'", spec);
        let pumps = child_streams(&mut child, &output, &spec.name);
        tokio::spawn(reap(spec.name.clone(), pumps, child, reaped.clone(), status_tx));

        Ok(ChildHandle {
            name: spec.name.clone(),
            pid,
            status_rx,
            reaped,
            output,
        })
    }
}

/// Handle to a child started by [`CommandLauncher`].
#[derive(Debug)]
pub struct ChildHandle {
    name: String,
    pid: Option<u32>,
    status_rx: watch::Receiver<Option<ExitStatus>>,
    reaped: Arc<AtomicBool>,
    output: OutputBuffer,
}

impl ChildHandle {
    /// True once the OS process is gone, possibly before [`ProcessHandle::exited`]
    /// resolves.
    pub fn is_reaped(&self) -> bool {
        self.reaped.load(Ordering::SeqCst)
    }
}

impl ProcessHandle for ChildHandle {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn signal(&self, signal: StopSignal) -> Result<()> {
        if self.is_reaped() {
            return Ok(());
        }
        let Some(pid) = self.pid else {
            return Ok(());
        };
        tracing::debug!(app = %self.name, pid, "Sending {}", signal);
        send_signal(pid, signal)
    }

    fn exited(&self) -> BoxFuture<'static, ExitStatus> {
        let mut rx = self.status_rx.clone();
        async move {
            match rx.wait_for(Option::is_some).await {
                Ok(status) => {
                    let status: Option<ExitStatus> = *status;
                    status.unwrap_or_default()
                }
                // reaper gone without publishing; treat the process as ended
                Err(_) => ExitStatus::default(),
            }
        }
        .boxed()
    }

    fn try_status(&self) -> Option<ExitStatus> {
        *self.status_rx.borrow()
    }

    fn output(&self) -> OutputBuffer {
        self.output.clone()
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: StopSignal) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let sig = match signal {
        StopSignal::Terminate => Signal::SIGTERM,
        StopSignal::Kill => Signal::SIGKILL,
    };
    match kill(Pid::from_raw(pid as i32), sig) {
        // already gone; the reaper will publish the exit
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(UpkeepError::Io(e.into())),
    }
}

#[cfg(not(unix))]
fn send_signal(_pid: u32, _signal: StopSignal) -> Result<()> {
    Err(UpkeepError::Io(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "signals are only supported on unix",
    )))
}

type Pump = tokio::task::JoinHandle<()>;

fn child_streams(child: &mut Child, output: &OutputBuffer, name: &str) -> Vec<Pump> {
    let mut pumps = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        pumps.push(tokio::spawn(pump(stdout, output.clone(), name.to_string())));
    }
    if let Some(stderr) = child.stderr.take() {
        pumps.push(tokio::spawn(pump(stderr, output.clone(), name.to_string())));
    }
    pumps
}

async fn pump<R>(stream: R, output: OutputBuffer, name: String)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                output.append(&line);
                tracing::debug!(app = %name, "{}", String::from_utf8_lossy(&line).trim_end());
            }
            Err(e) => {
                tracing::warn!(app = %name, error = %e, "Failed reading process output");
                break;
            }
        }
    }
}

async fn reap(
    name: String,
    pumps: Vec<Pump>,
    mut child: Child,
    reaped: Arc<AtomicBool>,
    status_tx: watch::Sender<Option<ExitStatus>>,
) {
    let status = match child.wait().await {
        Ok(status) => ExitStatus::from(status),
        Err(e) => {
            tracing::error!(app = %name, error = %e, "Failed waiting for process");
            ExitStatus::default()
        }
    };
    reaped.store(true, Ordering::SeqCst);

    let drained = tokio::time::timeout(OUTPUT_DRAIN, futures::future::join_all(pumps)).await;
    if drained.is_err() {
        tracing::debug!(app = %name, "Output still open after exit, not waiting for it");
    }

    tracing::info!(app = %name, "Process ended with {}", status);
    status_tx.send_replace(Some(status));
}
