//! Graceful shutdown handling
//!
//! - Signal handling (SIGTERM, SIGINT)
//! - A cloneable [`ShutdownSignal`] observed by the HTTP server and by every
//!   periodic background task
//! - Joining background tasks once shutdown has been initiated

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Shutdown signal that can be cloned and shared
#[derive(Clone)]
pub struct ShutdownSignal {
    watch_rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Check if shutdown has been initiated
    pub fn is_shutdown(&self) -> bool {
        *self.watch_rx.borrow()
    }

    /// Wait for shutdown. Returns immediately if it was already initiated,
    /// including before this call.
    pub async fn wait(&self) {
        let mut rx = self.watch_rx.clone();
        // Sender dropped counts as shutdown too
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

/// Shutdown coordinator that owns the background tasks
pub struct ShutdownCoordinator {
    shutdown: AtomicBool,
    watch_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (watch_tx, _) = watch::channel(false);

        Self {
            shutdown: AtomicBool::new(false),
            watch_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Get a shutdown signal that can be cloned
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            watch_rx: self.watch_tx.subscribe(),
        }
    }

    /// Track a background task so it is joined on shutdown
    pub async fn track(&self, name: &'static str, handle: JoinHandle<()>) {
        self.tasks.lock().await.push((name, handle));
    }

    /// Initiate shutdown
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Initiating graceful shutdown...");
        self.watch_tx.send_replace(true);
    }

    /// Initiate shutdown and wait for tracked tasks, aborting stragglers
    pub async fn shutdown_and_join(&self, timeout: Duration) {
        self.shutdown();

        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for (name, mut handle) in tasks {
            match tokio::time::timeout(timeout, &mut handle).await {
                Ok(Ok(())) => info!(task = name, "Background task stopped"),
                Ok(Err(e)) => error!(task = name, error = %e, "Background task failed"),
                Err(_) => {
                    warn!(task = name, "Background task did not stop in time, aborting");
                    handle.abort();
                }
            }
        }

        info!("Graceful shutdown complete");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Completes when the process receives Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}

/// Forward OS signals into the coordinator
pub fn shutdown_on_signal(coordinator: Arc<ShutdownCoordinator>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let signal = coordinator.signal();
        tokio::select! {
            _ = shutdown_signal() => coordinator.shutdown(),
            _ = signal.wait() => {}
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_signal() {
        let coordinator = ShutdownCoordinator::new();
        let signal = coordinator.signal();

        assert!(!signal.is_shutdown());

        coordinator.shutdown();

        assert!(signal.is_shutdown());
        assert!(coordinator.is_shutdown());
    }

    #[tokio::test]
    async fn test_wait_after_shutdown_returns() {
        let coordinator = ShutdownCoordinator::new();
        let signal = coordinator.signal();

        coordinator.shutdown();

        tokio::time::timeout(Duration::from_secs(1), signal.wait())
            .await
            .expect("wait should not block after shutdown");
    }

    #[tokio::test]
    async fn test_tracked_tasks_are_joined() {
        let coordinator = ShutdownCoordinator::new();
        let signal = coordinator.signal();
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = stopped.clone();

        let handle = tokio::spawn(async move {
            signal.wait().await;
            flag.store(true, Ordering::SeqCst);
        });
        coordinator.track("waiter", handle).await;

        coordinator.shutdown_and_join(Duration::from_secs(1)).await;

        assert!(stopped.load(Ordering::SeqCst));
    }
}
