//! Durable store contract for apps, roles and users

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::domain::{NewApp, NewRole, NewUser, PersistedApp, Role, RoleOwner, User};

use super::Result;

/// Filter for listing apps
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppFilter {
    /// Skip the app with this id
    pub exclude_id: Option<i64>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl AppFilter {
    /// Every app except the reserved administrative one.
    pub fn unreserved() -> Self {
        Self {
            exclude_id: Some(crate::domain::RESERVED_ID),
            ..Self::default()
        }
    }
}

/// Persistence for apps, roles, users and their role bindings.
///
/// Cascades are part of the contract:
/// - creating a role grants it to the reserved user, and to every user when
///   it is auto-assigned
/// - updating a role to manual strips it from every user except the
///   reserved one
/// - deleting a role strips it from every user; deleting an app deletes its
///   roles
/// - creating a user grants every auto-assign role
///
/// The reserved app, role and user (id 1) cannot be deleted, and the reserved
/// role cannot be removed from the reserved app or user.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AuthStore: Send + Sync {
    /// Get an app by id, optionally with its roles
    async fn get_app(&self, id: i64, load_roles: bool) -> Result<Option<PersistedApp>>;

    /// Find an app by identity hash, roles loaded
    async fn find_app_by_hash(&self, hash: &str) -> Result<Option<PersistedApp>>;

    /// Find an app by mount point, roles loaded
    async fn find_app_by_mount_point(&self, mount_point: &str) -> Result<Option<PersistedApp>>;

    /// List apps ordered by id, roles not loaded
    async fn find_apps(&self, filter: AppFilter) -> Result<Vec<PersistedApp>>;

    /// Insert an app; its hash must be unused
    async fn create_app(&self, app: NewApp) -> Result<PersistedApp>;

    /// Save the mutable fields of an existing app
    async fn update_app(&self, app: &PersistedApp) -> Result<()>;

    /// Delete an app, its roles and their user bindings
    async fn delete_app(&self, id: i64) -> Result<()>;

    async fn create_role(&self, role: NewRole) -> Result<Role>;

    async fn update_role(&self, role: &Role) -> Result<()>;

    /// Delete a role and strip it from every user
    async fn delete_role(&self, id: i64) -> Result<()>;

    /// Delete a role that must belong to `app_id`
    async fn remove_role_from_app(&self, app_id: i64, role_id: i64) -> Result<()>;

    /// Roles bound to a user or owned by an app
    async fn load_roles(&self, owner: RoleOwner) -> Result<Vec<Role>>;

    /// Ids of users holding a role
    async fn users_for_role(&self, role_id: i64) -> Result<Vec<i64>>;

    async fn get_user(&self, id: i64, load_roles: bool) -> Result<Option<User>>;

    async fn find_user_by_login(&self, login: &str) -> Result<Option<User>>;

    async fn create_user(&self, user: NewUser) -> Result<User>;

    async fn delete_user(&self, id: i64) -> Result<()>;

    async fn add_role_to_user(&self, user_id: i64, role_id: i64) -> Result<()>;

    async fn remove_role_from_user(&self, user_id: i64, role_id: i64) -> Result<()>;

    /// Names of a user's roles owned by one app
    async fn roles_for_user_in_app(&self, user_id: i64, app_id: i64) -> Result<Vec<String>>;
}
