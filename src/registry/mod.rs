//! Installed-app registry
//!
//! Holds the latest manifest snapshot and reconciles it into the durable
//! store. Request-serving lookups go to the store, never to the snapshot, so
//! they are not blocked while a manifest is being loaded.

mod manifest;
mod sync;

pub use manifest::*;
pub use sync::*;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

use crate::domain::{InstalledApp, PersistedApp};
use crate::infra::{
    spawn_file_watch, AuthStore, FileStat, FileWatcher, ShutdownSignal, StoreError,
};

/// Registry error
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("failed to read manifest {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid manifest: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("app {0} has no candidates")]
    NoCandidates(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Default)]
struct Snapshot {
    apps: Vec<InstalledApp>,
    stat: Option<FileStat>,
    loaded_at: Option<DateTime<Utc>>,
}

/// Manifest snapshot plus reconciliation into the store
pub struct AppRegistry {
    source: Arc<dyn ManifestSource>,
    store: Arc<dyn AuthStore>,
    snapshot: Mutex<Snapshot>,
}

impl AppRegistry {
    pub fn new(source: Arc<dyn ManifestSource>, store: Arc<dyn AuthStore>) -> Self {
        Self {
            source,
            store,
            snapshot: Mutex::new(Snapshot::default()),
        }
    }

    async fn load_into(&self, snapshot: &mut Snapshot) -> Result<(), RegistryError> {
        // Stat first so a write racing the read shows up as a change later
        let stat = match self.source.watch_path() {
            Some(path) => FileStat::read(&path).await.ok(),
            None => None,
        };
        let apps = self.source.load().await?;

        info!(apps = apps.len(), "Manifest loaded");
        *snapshot = Snapshot {
            apps,
            stat,
            loaded_at: Some(Utc::now()),
        };
        Ok(())
    }

    /// Replace the snapshot with a fresh manifest read. On error the previous
    /// snapshot is kept.
    pub async fn load(&self) -> Result<(), RegistryError> {
        let mut snapshot = self.snapshot.lock().await;
        self.load_into(&mut snapshot).await
    }

    /// Reconcile the current snapshot into the store.
    pub async fn sync(&self) -> Result<SyncReport, RegistryError> {
        let snapshot = self.snapshot.lock().await;
        sync_to_store(self.store.as_ref(), &snapshot.apps).await
    }

    /// Load then sync, without letting another load in between.
    pub async fn refresh(&self) -> Result<SyncReport, RegistryError> {
        let mut snapshot = self.snapshot.lock().await;
        self.load_into(&mut snapshot).await?;
        let report = sync_to_store(self.store.as_ref(), &snapshot.apps).await?;

        if !report.is_noop() {
            info!(
                apps_created = report.apps_created,
                apps_updated = report.apps_updated,
                apps_deleted = report.apps_deleted,
                roles_created = report.roles_created,
                roles_updated = report.roles_updated,
                roles_deleted = report.roles_deleted,
                "Store synchronized with manifest"
            );
        }
        Ok(report)
    }

    pub async fn get_by_hash(&self, hash: &str) -> Result<Option<PersistedApp>, RegistryError> {
        Ok(self.store.find_app_by_hash(hash).await?)
    }

    pub async fn get_by_mount_point(
        &self,
        mount_point: &str,
    ) -> Result<Option<PersistedApp>, RegistryError> {
        Ok(self.store.find_app_by_mount_point(mount_point).await?)
    }

    /// Copy of the current manifest apps
    pub async fn snapshot(&self) -> Vec<InstalledApp> {
        self.snapshot.lock().await.apps.clone()
    }

    pub async fn last_update(&self) -> Option<DateTime<Utc>> {
        self.snapshot.lock().await.loaded_at
    }

    /// Poll the manifest file and refresh on change. `None` when the source
    /// has nothing to watch.
    pub async fn spawn_watcher(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: ShutdownSignal,
    ) -> Option<JoinHandle<()>> {
        let path = self.source.watch_path()?;
        let watcher = match self.snapshot.lock().await.stat {
            Some(stat) => FileWatcher::primed(path, stat),
            None => FileWatcher::new(path),
        };

        let registry = Arc::clone(self);
        Some(spawn_file_watch(
            "manifest",
            watcher,
            interval,
            shutdown,
            move || {
                let registry = Arc::clone(&registry);
                async move { registry.refresh().await.map(|_| ()) }
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::MockAuthStore;

    fn app(label: &str) -> InstalledApp {
        serde_json::from_value(serde_json::json!({
            "label": label,
            "name": label,
            "mountPoint": label,
            "secret": "00",
            "candidates": [{ "version": "1.0.0" }]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_failed_load_keeps_snapshot() {
        let mut source = MockManifestSource::new();
        source.expect_watch_path().returning(|| None);
        let mut calls = 0;
        source.expect_load().returning(move || {
            calls += 1;
            if calls == 1 {
                Ok(vec![app("first")])
            } else {
                Err(RegistryError::NoCandidates("broken".into()))
            }
        });

        let registry = AppRegistry::new(Arc::new(source), Arc::new(MockAuthStore::new()));

        registry.load().await.unwrap();
        assert!(registry.load().await.is_err());

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].label, "first");
        assert!(registry.last_update().await.is_some());
    }

    #[tokio::test]
    async fn test_no_watcher_without_path() {
        let mut source = MockManifestSource::new();
        source.expect_watch_path().returning(|| None);
        let registry = Arc::new(AppRegistry::new(
            Arc::new(source),
            Arc::new(MockAuthStore::new()),
        ));
        let coordinator = crate::infra::ShutdownCoordinator::new();

        assert!(registry
            .spawn_watcher(Duration::from_secs(1), coordinator.signal())
            .await
            .is_none());
    }
}
