//! Reconciliation of the manifest into the durable store
//!
//! Runs as a sequence of independent store operations, not one transaction.
//! The first failure aborts the run; the next successful run picks up from
//! whatever state the store was left in.

use std::collections::HashSet;

use tracing::debug;

use super::RegistryError;
use crate::domain::{Candidate, InstalledApp, NewApp, NewRole, PersistedApp, RoleDescriptor};
use crate::infra::{AppFilter, AuthStore};

/// What a sync run changed
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub apps_created: usize,
    pub apps_updated: usize,
    pub apps_deleted: usize,
    pub roles_created: usize,
    pub roles_updated: usize,
    pub roles_deleted: usize,
}

impl SyncReport {
    /// True when the store already matched the manifest
    pub fn is_noop(&self) -> bool {
        *self == SyncReport::default()
    }
}

fn new_role(app_id: i64, descriptor: &RoleDescriptor) -> NewRole {
    NewRole {
        id: None,
        app_id,
        name: descriptor.name.clone(),
        description: descriptor.description.clone(),
        auto_assign: descriptor.auto_assign,
    }
}

/// Make the store match `apps`.
pub async fn sync_to_store(
    store: &dyn AuthStore,
    apps: &[InstalledApp],
) -> Result<SyncReport, RegistryError> {
    let mut report = SyncReport::default();

    for app in apps {
        let candidate = app
            .active_candidate()
            .ok_or_else(|| RegistryError::NoCandidates(app.label.clone()))?;

        match store.find_app_by_hash(&app.hash()).await? {
            None => {
                let created = store
                    .create_app(NewApp::from_manifest(app, candidate))
                    .await?;
                debug!(app_id = created.id, name = %created.name, "Created app");
                report.apps_created += 1;

                for descriptor in &candidate.available_roles {
                    store.create_role(new_role(created.id, descriptor)).await?;
                    report.roles_created += 1;
                }
            }
            Some(mut persisted) => {
                if persisted.apply_manifest(app, candidate) {
                    store.update_app(&persisted).await?;
                    debug!(app_id = persisted.id, name = %persisted.name, "Updated app");
                    report.apps_updated += 1;
                }
                reconcile_roles(store, &persisted, candidate, &mut report).await?;
            }
        }
    }

    let hashes: HashSet<String> = apps.iter().map(InstalledApp::hash).collect();
    for stored in store.find_apps(AppFilter::unreserved()).await? {
        if !hashes.contains(&stored.hash) {
            store.delete_app(stored.id).await?;
            debug!(app_id = stored.id, name = %stored.name, "Deleted app");
            report.apps_deleted += 1;
        }
    }

    Ok(report)
}

async fn reconcile_roles(
    store: &dyn AuthStore,
    app: &PersistedApp,
    candidate: &Candidate,
    report: &mut SyncReport,
) -> Result<(), RegistryError> {
    for descriptor in &candidate.available_roles {
        match app
            .available_roles
            .iter()
            .find(|r| r.name == descriptor.name)
        {
            None => {
                store.create_role(new_role(app.id, descriptor)).await?;
                debug!(app_id = app.id, role = %descriptor.name, "Created role");
                report.roles_created += 1;
            }
            Some(stored)
                if stored.description != descriptor.description
                    || stored.auto_assign != descriptor.auto_assign =>
            {
                let mut updated = stored.clone();
                updated.description = descriptor.description.clone();
                updated.auto_assign = descriptor.auto_assign;
                store.update_role(&updated).await?;
                debug!(app_id = app.id, role = %descriptor.name, "Updated role");
                report.roles_updated += 1;
            }
            Some(_) => {}
        }
    }

    let wanted: HashSet<&str> = candidate
        .available_roles
        .iter()
        .map(|d| d.name.as_str())
        .collect();
    for stored in &app.available_roles {
        if !wanted.contains(stored.name.as_str()) {
            store.remove_role_from_app(app.id, stored.id).await?;
            debug!(app_id = app.id, role = %stored.name, "Removed role");
            report.roles_deleted += 1;
        }
    }

    Ok(())
}
