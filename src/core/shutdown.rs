use std::future::Future;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

/// Graceful shutdown coordinator.
///
/// Two responsibilities: broadcast cancellation to long-lived tasks
/// (uptime gauge, HTTP server drain), and track the fire-and-forget cache
/// write-backs spawned per request so a shutdown can flush them instead
/// of cutting an object-store PUT off mid-flight.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    write_backs: TaskTracker,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            write_backs: TaskTracker::new(),
        }
    }

    /// Cancellation token for long-lived background tasks.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Spawn a cache write-back. The task runs detached from the request
    /// but is waited for by [`ShutdownCoordinator::drain_write_backs`].
    pub fn spawn_write_back<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.write_backs.spawn(task);
    }

    /// Broadcast shutdown to every task listening on the token.
    pub fn trigger_shutdown(&self) {
        info!(
            pending_write_backs = self.write_backs.len(),
            "shutdown signal received, cancelling background tasks"
        );
        self.token.cancel();
    }

    /// Wait for SIGTERM or SIGINT, then trigger coordinated shutdown.
    pub async fn wait_for_signal_and_shutdown(&self) {
        let ctrl_c = tokio::signal::ctrl_c();
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");

        tokio::select! {
            _ = ctrl_c => {
                info!("received SIGINT (Ctrl+C)");
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM");
            }
        }

        self.trigger_shutdown();
    }

    /// Let in-flight cache write-backs finish. Returns once the tracker
    /// is empty; callers bound this with a timeout.
    pub async fn drain_write_backs(&self) {
        self.write_backs.close();
        self.write_backs.wait().await;
        info!("cache write-backs flushed");
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// HTTP server drain timeout in seconds.
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Write-back flush timeout in seconds, applied after the server drain.
pub const WRITE_BACK_FLUSH_TIMEOUT_SECS: u64 = 5;
