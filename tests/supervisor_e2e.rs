//! End-to-end supervision with real processes.

use std::path::Path;
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use upkeep::app::ManagedApp;
use upkeep::config::AppConfig;
use upkeep::process::{ChildHandle, CommandLauncher, LaunchSpec, Launcher, OutputBuffer, ProcessHandle};
use upkeep::revision::{GitTracker, current_ref, locate_git};
use upkeep::supervisor::{RestartDecision, SupervisorConfig, SupervisorLoop};
use upkeep::{Result, setup};

/// Real launcher that remembers what it started.
#[derive(Default)]
struct RecordingLauncher {
    inner: CommandLauncher,
    started: Mutex<Vec<(Option<u32>, OutputBuffer)>>,
}

impl RecordingLauncher {
    fn count(&self) -> usize {
        self.started.lock().unwrap().len()
    }

    fn outputs(&self) -> String {
        let started = self.started.lock().unwrap();
        started.iter().map(|(_, output)| output.contents()).collect()
    }
}

impl Launcher for RecordingLauncher {
    type Handle = ChildHandle;

    fn spawn(&self, spec: &LaunchSpec) -> Result<ChildHandle> {
        let handle = self.inner.spawn(spec)?;
        self.started.lock().unwrap().push((handle.pid(), handle.output()));
        Ok(handle)
    }
}

fn config_with(interval_ms: u64) -> SupervisorConfig {
    SupervisorConfig::with_update_interval(Duration::from_millis(interval_ms))
}

fn git(dir: &Path, args: &[&str]) {
    let output = Command::new("git").args(args).current_dir(dir).output().unwrap();
    assert!(output.status.success(), "git {:?}: {}", args, String::from_utf8_lossy(&output.stderr));
}

fn pid_alive(pid: u32) -> bool {
    // zombies are reaped by the supervisor, so a missing /proc entry means gone
    Path::new(&format!("/proc/{}", pid)).exists()
}

#[tokio::test]
async fn test_echo_app_untracked() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("upkeep.yml");
    std::fs::write(&path, "name: echo\ndirectory: /bin\ncommand: \"echo foobar\"\ngit: false\n").unwrap();

    let (config, _) = AppConfig::load(Some(&path)).unwrap();
    let cancel = CancellationToken::new();
    let prepared = setup::prepare(config, &Default::default(), &cancel).await.unwrap();
    assert!(prepared.tracker.is_none());

    let launcher = Arc::new(RecordingLauncher::default());
    let mut supervisor = SupervisorLoop::new(prepared.app, launcher.clone(), prepared.tracker, cancel.clone())
        .with_config(config_with(200));

    let stopper = cancel.clone();
    let (result, ()) = tokio::join!(supervisor.run(), async move {
        tokio::time::sleep(Duration::from_millis(700)).await;
        stopper.cancel();
    });

    assert!(result.is_ok());
    assert_eq!(supervisor.last_decision(), Some(RestartDecision::NotTracked));
    assert!(launcher.count() >= 1);
    assert!(launcher.outputs().contains("foobar"));
}

#[tokio::test]
async fn test_long_running_app_restarted_on_tick() {
    let config = AppConfig {
        name: "sleeper".to_string(),
        directory: "/tmp".into(),
        command: "sleep 30".to_string(),
        ..Default::default()
    };
    let app = ManagedApp::from_config(&config).unwrap();
    let cancel = CancellationToken::new();
    let launcher = Arc::new(RecordingLauncher::default());
    let mut supervisor =
        SupervisorLoop::new(app, launcher.clone(), None::<GitTracker>, cancel.clone()).with_config(config_with(300));

    let stopper = cancel.clone();
    let (result, ()) = tokio::join!(supervisor.run(), async move {
        tokio::time::sleep(Duration::from_millis(1000)).await;
        stopper.cancel();
    });

    assert!(result.is_ok());
    assert!(launcher.count() >= 2);
    assert!(!supervisor.is_running());

    let pids: Vec<u32> = launcher.started.lock().unwrap().iter().filter_map(|(pid, _)| *pid).collect();
    for pid in pids {
        assert!(!pid_alive(pid), "process {} still running", pid);
    }
}

#[tokio::test]
async fn test_tracked_app_restarts_on_upstream_commit() {
    let temp = TempDir::new().unwrap();
    let origin = temp.path().join("origin");
    std::fs::create_dir_all(&origin).unwrap();
    git(&origin, &["init"]);
    git(&origin, &["config", "user.email", "test@test.com"]);
    git(&origin, &["config", "user.name", "Test"]);
    std::fs::write(origin.join("VERSION"), "1").unwrap();
    git(&origin, &["add", "."]);
    git(&origin, &["commit", "-m", "v1"]);

    let checkout = temp.path().join("checkout");
    git(temp.path(), &["clone", origin.to_str().unwrap(), checkout.to_str().unwrap()]);

    let config = AppConfig {
        name: "web".to_string(),
        directory: checkout.clone(),
        command: "sleep 30".to_string(),
        tracked: true,
        ..Default::default()
    };
    let app = ManagedApp::from_config(&config).unwrap();
    let cancel = CancellationToken::new();
    let git_bin = locate_git().unwrap();
    let reference = current_ref(&git_bin, &checkout, None, None, &cancel).await.unwrap();
    let tracker = GitTracker::new(git_bin, reference);

    let launcher = Arc::new(RecordingLauncher::default());
    let mut supervisor = SupervisorLoop::new(app, launcher.clone(), tracker, cancel.clone()).with_config(config_with(500));

    let stopper = cancel.clone();
    let watched = launcher.clone();
    let origin_dir = origin.clone();
    let (result, ()) = tokio::join!(supervisor.run(), async move {
        // unchanged ticks keep the first process
        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(watched.count(), 1);

        std::fs::write(origin_dir.join("VERSION"), "2").unwrap();
        git(&origin_dir, &["commit", "-am", "v2"]);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while watched.count() < 2 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        stopper.cancel();
    });

    assert!(result.is_ok());
    assert_eq!(launcher.count(), 2);
    assert_eq!(supervisor.last_decision(), Some(RestartDecision::VersionChanged));
    assert_eq!(std::fs::read_to_string(checkout.join("VERSION")).unwrap(), "2");
}
