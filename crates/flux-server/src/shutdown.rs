//! Shutdown for the listener, WebSocket sessions and publish runs.
//!
//! Cancelling the token stops the listener and ends every session's read
//! loop. Sessions and publish runs are registered with a [`TaskTracker`] so a
//! drain can wait for sessions to send their Close frame and for publishes to
//! reach a terminal status. Publishes are never cancelled, only awaited.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tokio_util::task::task_tracker::TrackedFuture;
use tracing::{info, warn};

/// Drain budget used by the binary on ctrl-c.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns the server-wide stop signal and the set of in-flight work.
#[derive(Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tasks: TaskTracker,
}

impl ShutdownCoordinator {
    /// Create a coordinator with nothing in flight.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clone of the stop signal.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Handle for spawning work that a drain waits for.
    pub fn tracker(&self) -> TaskTracker {
        self.tasks.clone()
    }

    /// Wrap a session future so a drain waits for it.
    pub fn track<F: Future>(&self, future: F) -> TrackedFuture<F> {
        self.tasks.track_future(future)
    }

    /// Sessions and publish runs still running.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Signal the listener and every session to stop.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has started.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Stop everything and wait up to `timeout` for the listener and all
    /// tracked work. Returns `false` if the budget ran out first.
    pub async fn drain(&self, listener: JoinHandle<()>, timeout: Duration) -> bool {
        self.shutdown();
        let _ = self.tasks.close();
        info!(
            in_flight = self.tasks.len(),
            timeout_secs = timeout.as_secs_f64(),
            "draining sessions and publish runs"
        );

        let wait = async {
            let _ = listener.await;
            self.tasks.wait().await;
        };
        if tokio::time::timeout(timeout, wait).await.is_ok() {
            info!("drain complete");
            true
        } else {
            warn!(remaining = self.tasks.len(), "drain timed out");
            false
        }
    }
}
