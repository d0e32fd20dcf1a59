//! Change detection by periodic file-stat polling
//!
//! A file counts as changed when its size or modification time differs from
//! the last stat observed. Each watch runs as its own task on a fixed
//! interval; the change handler is awaited before the next tick, so runs of
//! the same watch never overlap. A failed handler run is retried on the next
//! tick even if the file has not changed again.

use std::fmt::Display;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::ShutdownSignal;

/// Size and modification time of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub len: u64,
    pub modified: Option<SystemTime>,
}

impl FileStat {
    pub async fn read(path: &Path) -> io::Result<Self> {
        let meta = tokio::fs::metadata(path).await?;
        Ok(Self {
            len: meta.len(),
            modified: meta.modified().ok(),
        })
    }
}

/// Tracks the last-seen stat of one file
#[derive(Debug)]
pub struct FileWatcher {
    path: PathBuf,
    last: Option<FileStat>,
}

impl FileWatcher {
    /// A watcher with no prior stat; the first successful poll reports a change.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last: None,
        }
    }

    /// A watcher primed with the stat taken when the file was first loaded.
    pub fn primed(path: impl Into<PathBuf>, stat: FileStat) -> Self {
        Self {
            path: path.into(),
            last: Some(stat),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drop the last-seen stat so the next poll reports a change.
    pub fn forget(&mut self) {
        self.last = None;
    }

    /// Stat the file and report whether it changed since the last poll.
    ///
    /// A stat error leaves the last-seen stat untouched.
    pub async fn poll_changed(&mut self) -> io::Result<bool> {
        let stat = FileStat::read(&self.path).await?;
        if self.last == Some(stat) {
            return Ok(false);
        }
        self.last = Some(stat);
        Ok(true)
    }
}

/// Spawn a task that polls `watcher` every `interval` and awaits `on_change`
/// whenever the file changed. Stops when `shutdown` fires.
pub fn spawn_file_watch<F, Fut, E>(
    name: &'static str,
    mut watcher: FileWatcher,
    interval: Duration,
    shutdown: ShutdownSignal,
    mut on_change: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        info!(watch = name, path = %watcher.path().display(), "File watch started");

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = ticker.tick() => {}
            }

            match watcher.poll_changed().await {
                Ok(true) => {
                    debug!(watch = name, "File changed");
                    if let Err(e) = on_change().await {
                        error!(watch = name, error = %e, "Reload failed, retrying on next poll");
                        watcher.forget();
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(watch = name, path = %watcher.path().display(), error = %e, "Failed to stat file");
                }
            }
        }

        info!(watch = name, "File watch stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::ShutdownCoordinator;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_unprimed_watcher_reports_first_poll() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut watcher = FileWatcher::new(file.path());

        assert!(watcher.poll_changed().await.unwrap());
        assert!(!watcher.poll_changed().await.unwrap());
    }

    #[tokio::test]
    async fn test_size_change_is_detected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let stat = FileStat::read(file.path()).await.unwrap();
        let mut watcher = FileWatcher::primed(file.path(), stat);

        assert!(!watcher.poll_changed().await.unwrap());

        std::fs::write(file.path(), b"grown").unwrap();
        assert!(watcher.poll_changed().await.unwrap());
        assert!(!watcher.poll_changed().await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = FileWatcher::new(dir.path().join("absent"));

        assert!(watcher.poll_changed().await.is_err());
    }

    #[tokio::test]
    async fn test_spawned_watch_fires_and_stops() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let stat = FileStat::read(file.path()).await.unwrap();
        let coordinator = ShutdownCoordinator::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        let handle = spawn_file_watch(
            "test",
            FileWatcher::primed(file.path(), stat),
            Duration::from_millis(10),
            coordinator.signal(),
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, std::io::Error>(())
                }
            },
        );

        std::fs::write(file.path(), b"changed").unwrap();
        for _ in 0..100 {
            if hits.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        coordinator.shutdown();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_failed_reload_is_retried_without_new_change() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let stat = FileStat::read(file.path()).await.unwrap();
        let coordinator = ShutdownCoordinator::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        let handle = spawn_file_watch(
            "test",
            FileWatcher::primed(file.path(), stat),
            Duration::from_millis(10),
            coordinator.signal(),
            move || {
                let counter = counter.clone();
                async move {
                    // Only the first run fails
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err("store unavailable")
                    } else {
                        Ok(())
                    }
                }
            },
        );

        std::fs::write(file.path(), b"changed").unwrap();
        for _ in 0..100 {
            if hits.load(Ordering::SeqCst) >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        // A successful run settles the watch again
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        coordinator.shutdown();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
