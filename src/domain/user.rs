//! Users and roles

use serde::{Deserialize, Serialize};

/// A role owned by exactly one app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub id: i64,
    pub app_id: i64,
    pub name: String,
    pub description: String,
    pub auto_assign: bool,
}

/// Fields for inserting a new role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRole {
    /// Explicit row id; only used for the reserved roles
    pub id: Option<i64>,
    pub app_id: i64,
    pub name: String,
    pub description: String,
    pub auto_assign: bool,
}

/// A user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub login: String,
    pub name: String,

    #[serde(skip_serializing)]
    pub password_hash: String,

    pub email_address: String,

    /// Bound roles (empty unless loaded)
    pub roles: Vec<Role>,
}

/// Fields for inserting a new user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    /// Explicit row id; only used for the reserved administrative user
    pub id: Option<i64>,
    pub login: String,
    pub name: String,
    pub password_hash: String,
    pub email_address: String,

    /// Roles to bind explicitly, in addition to every auto-assign role
    pub role_ids: Vec<i64>,
}

/// Entities that carry a role collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleOwner {
    /// Roles bound to a user
    User(i64),
    /// Roles an app makes available
    App(i64),
}
