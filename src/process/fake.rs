//! In-memory process doubles for tests.
//!
//! A [`FakeLauncher`] hands out [`FakeHandle`]s and keeps a [`FakeControl`] for
//! each, so a test can make the "process" exit, inspect the signals it received,
//! or make further spawns fail.

use futures::FutureExt;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use super::{ExitStatus, LaunchSpec, Launcher, OutputBuffer, ProcessHandle, StopSignal};
use crate::error::{Result, UpkeepError};

const SIGKILL: i32 = 9;
const SIGTERM: i32 = 15;

/// How a fake process reacts to stop signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Exits on SIGTERM
    ExitOnTerm,
    /// Ignores SIGTERM, dies on SIGKILL
    ExitOnKill,
    /// Ignores everything
    Unkillable,
}

#[derive(Debug)]
struct Shared {
    spec: LaunchSpec,
    behavior: Mutex<Behavior>,
    signals: Mutex<Vec<StopSignal>>,
    status_tx: watch::Sender<Option<ExitStatus>>,
    fail_signals: AtomicBool,
    output: OutputBuffer,
}

/// Test-side remote control for one fake process.
#[derive(Debug, Clone)]
pub struct FakeControl {
    shared: Arc<Shared>,
}

impl FakeControl {
    /// Make the process terminate on its own.
    pub fn exit(&self, status: ExitStatus) {
        self.shared.status_tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(status);
                true
            } else {
                false
            }
        });
    }

    /// True once the process has terminated.
    pub fn has_exited(&self) -> bool {
        self.shared.status_tx.borrow().is_some()
    }

    /// All signals received so far.
    pub fn signals(&self) -> Vec<StopSignal> {
        self.shared.signals.lock().unwrap().clone()
    }

    /// Number of times `signal` was received.
    pub fn count(&self, signal: StopSignal) -> usize {
        self.signals().iter().filter(|s| **s == signal).count()
    }

    /// Change how the process reacts to future signals.
    pub fn set_behavior(&self, behavior: Behavior) {
        *self.shared.behavior.lock().unwrap() = behavior;
    }

    /// Make signal delivery fail.
    pub fn fail_signals(&self, fail: bool) {
        self.shared.fail_signals.store(fail, Ordering::SeqCst);
    }

    /// Launch parameters this process was started with.
    pub fn spec(&self) -> LaunchSpec {
        self.shared.spec.clone()
    }

    /// Write to the process's captured output.
    pub fn write(&self, text: &str) {
        self.shared.output.append(text.as_bytes());
    }
}

/// A fake child process.
#[derive(Debug)]
pub struct FakeHandle {
    pid: u32,
    control: FakeControl,
    status_rx: watch::Receiver<Option<ExitStatus>>,
}

impl FakeHandle {
    /// Create a running fake and its control.
    pub fn new(pid: u32, spec: LaunchSpec, behavior: Behavior) -> (Self, FakeControl) {
        let (status_tx, status_rx) = watch::channel(None);
        let control = FakeControl {
            shared: Arc::new(Shared {
                spec,
                behavior: Mutex::new(behavior),
                signals: Mutex::new(Vec::new()),
                status_tx,
                fail_signals: AtomicBool::new(false),
                output: OutputBuffer::default(),
            }),
        };
        let handle = Self {
            pid,
            control: control.clone(),
            status_rx,
        };
        (handle, control)
    }
}

impl ProcessHandle for FakeHandle {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn signal(&self, signal: StopSignal) -> Result<()> {
        if self.control.has_exited() {
            return Ok(());
        }
        if self.control.shared.fail_signals.load(Ordering::SeqCst) {
            return Err(UpkeepError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "signal refused",
            )));
        }

        self.control.shared.signals.lock().unwrap().push(signal);
        let behavior = *self.control.shared.behavior.lock().unwrap();
        match (signal, behavior) {
            (StopSignal::Terminate, Behavior::ExitOnTerm) => self.control.exit(ExitStatus::signaled(SIGTERM)),
            (StopSignal::Kill, Behavior::ExitOnTerm | Behavior::ExitOnKill) => {
                self.control.exit(ExitStatus::signaled(SIGKILL))
            }
            _ => {}
        }
        Ok(())
    }

    fn exited(&self) -> BoxFuture<'static, ExitStatus> {
        let mut rx = self.status_rx.clone();
        async move {
            match rx.wait_for(Option::is_some).await {
                Ok(status) => {
                    let status: Option<ExitStatus> = *status;
                    status.unwrap_or_default()
                }
                Err(_) => ExitStatus::default(),
            }
        }
        .boxed()
    }

    fn try_status(&self) -> Option<ExitStatus> {
        *self.status_rx.borrow()
    }

    fn output(&self) -> OutputBuffer {
        self.control.shared.output.clone()
    }
}

/// Launcher producing [`FakeHandle`]s.
#[derive(Debug)]
pub struct FakeLauncher {
    behavior: Mutex<Behavior>,
    spawned: Mutex<Vec<FakeControl>>,
    fail_next: AtomicU32,
    always_fail: AtomicBool,
    attempts: AtomicU32,
}

impl Default for FakeLauncher {
    fn default() -> Self {
        Self::new(Behavior::ExitOnTerm)
    }
}

impl FakeLauncher {
    /// Launcher whose processes react to signals with `behavior`.
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            spawned: Mutex::new(Vec::new()),
            fail_next: AtomicU32::new(0),
            always_fail: AtomicBool::new(false),
            attempts: AtomicU32::new(0),
        }
    }

    /// Fail the next `n` spawns.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Fail every spawn until switched off.
    pub fn always_fail(&self, fail: bool) {
        self.always_fail.store(fail, Ordering::SeqCst);
    }

    /// Behavior for processes spawned from now on.
    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    /// Controls of every successfully spawned process, oldest first.
    pub fn spawned(&self) -> Vec<FakeControl> {
        self.spawned.lock().unwrap().clone()
    }

    /// Control of the most recent process.
    pub fn last(&self) -> Option<FakeControl> {
        self.spawned.lock().unwrap().last().cloned()
    }

    /// Number of spawn calls, including failed ones.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Number of processes that have not exited.
    pub fn live_count(&self) -> usize {
        self.spawned().iter().filter(|c| !c.has_exited()).count()
    }
}

impl Launcher for FakeLauncher {
    type Handle = FakeHandle;

    fn spawn(&self, spec: &LaunchSpec) -> Result<FakeHandle> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.always_fail.load(Ordering::SeqCst) {
            return Err(UpkeepError::Spawn(format!("spawn {} refused", attempt)));
        }
        let pending = self.fail_next.load(Ordering::SeqCst);
        if pending > 0 {
            self.fail_next.store(pending - 1, Ordering::SeqCst);
            return Err(UpkeepError::Spawn(format!("spawn {} refused", attempt)));
        }

        let behavior = *self.behavior.lock().unwrap();
        let (handle, control) = FakeHandle::new(1000 + attempt, spec.clone(), behavior);
        self.spawned.lock().unwrap().push(control);
        Ok(handle)
    }
}
