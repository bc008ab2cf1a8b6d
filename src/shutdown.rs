//! OS signal handling.
//!
//! The listener spawned here is the only thing that cancels the supervisor's
//! token from outside; everything else observes it.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Wait until SIGINT, SIGTERM or SIGQUIT arrives. Returns the signal's name.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    let name = tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
        _ = sigquit.recv() => "SIGQUIT",
    };
    Ok(name)
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}

/// Cancel `cancel` on the first shutdown signal.
///
/// The task also ends, without cancelling, if `cancel` fires for another reason.
/// If the handlers cannot be installed the token is cancelled right away rather
/// than running without a way to stop.
pub fn spawn_listener(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            received = wait_for_shutdown_signal() => {
                match received {
                    Ok(name) => log::info!("Received {}, shutting down", name),
                    Err(e) => log::error!("Failed to install signal handlers: {}", e),
                }
                cancel.cancel();
            }
        }
    })
}
