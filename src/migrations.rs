//! Database migrations and the reserved-entity bootstrap.
//!
//! Schema migrations are embedded with SQLx. [`seed_reserved`] then makes
//! sure the administrative app, its `admin` and `user` roles and the admin
//! user exist under their reserved ids.

use anyhow::Context;
use rand::RngCore;
use sqlx::SqlitePool;
use tracing::info;

use crate::crypto::{app_identity_hash, hash_password};
use crate::domain::{Meta, NewApp, NewRole, NewUser, RESERVED_ID};
use crate::infra::{AuthStore, StoreError};
use crate::policy::AccessPolicyRule;

static SQLITE_MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("migrations/sqlite");

pub const ADMIN_APP_NAME: &str = "Forward Gate Admin";
pub const ADMIN_APP_DESCRIPTION: &str = "Manage installed apps and users";
pub const ADMIN_APP_MOUNT_POINT: &str = "admin";
const ADMIN_APP_SOURCE: &str = "builtin";

pub const ADMIN_ROLE_ID: i64 = RESERVED_ID;
pub const ADMIN_ROLE_NAME: &str = "admin";
pub const USER_ROLE_ID: i64 = 2;
pub const USER_ROLE_NAME: &str = "user";

pub async fn run_sqlite(pool: &SqlitePool) -> anyhow::Result<()> {
    SQLITE_MIGRATOR.run(pool).await?;
    Ok(())
}

/// Credentials of the initial admin user
#[derive(Debug, Clone)]
pub struct AdminSeed {
    pub login: String,
    pub password: String,
    pub name: String,
    pub email_address: String,
}

/// Built-in policy of the administrative app.
pub fn admin_policies() -> Vec<AccessPolicyRule> {
    vec![
        AccessPolicyRule::allow(["favicon.ico$"], ["*"], ["options", "get"]),
        AccessPolicyRule::allow(["^/api/v0/login$"], ["*"], ["options", "post"]),
        AccessPolicyRule::allow(
            ["^/api/v0/users", "^/api/v0/docker", "^/api/v0/files"],
            ["admin"],
            ["options", "get", "post", "patch", "delete"],
        ),
        AccessPolicyRule::allow(
            [
                "^/api/v0/apps",
                "^/api/v0/status",
                "^/api/v0/blocks",
                "^/api/v0/users/me$",
            ],
            ["*"],
            ["options", "get"],
        ),
        AccessPolicyRule::allow(["^/api/v0/apps"], ["admin"], ["options", "post", "patch"]),
        AccessPolicyRule::allow(["^/$", "^/_/"], ["*"], ["options", "get"]),
    ]
}

fn random_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Create whichever reserved entities are missing. Safe to run on every start.
pub async fn seed_reserved(store: &dyn AuthStore, admin: &AdminSeed) -> anyhow::Result<()> {
    if store.get_app(RESERVED_ID, false).await?.is_none() {
        info!("Adding admin app");
        store
            .create_app(NewApp {
                id: Some(RESERVED_ID),
                hash: app_identity_hash(ADMIN_APP_NAME, ADMIN_APP_SOURCE),
                secret: random_secret(),
                mount_point: ADMIN_APP_MOUNT_POINT.to_string(),
                name: ADMIN_APP_NAME.to_string(),
                description: ADMIN_APP_DESCRIPTION.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                meta: Meta {
                    icon: None,
                    color: Some("#000000".to_string()),
                },
                access_policies: admin_policies(),
            })
            .await
            .context("failed to create admin app")?;
    }

    let roles = [
        (ADMIN_ROLE_ID, ADMIN_ROLE_NAME, "Main admin with god mode", false),
        (USER_ROLE_ID, USER_ROLE_NAME, "Regular user", true),
    ];
    let existing = store
        .load_roles(crate::domain::RoleOwner::App(RESERVED_ID))
        .await?;
    for (id, name, description, auto_assign) in roles {
        if existing.iter().any(|r| r.id == id) {
            continue;
        }
        info!(role = name, "Adding reserved role");
        store
            .create_role(NewRole {
                id: Some(id),
                app_id: RESERVED_ID,
                name: name.to_string(),
                description: description.to_string(),
                auto_assign,
            })
            .await
            .with_context(|| format!("failed to create {name} role"))?;
    }

    if store.get_user(RESERVED_ID, false).await?.is_none() {
        info!(login = %admin.login, "Adding admin user");
        let password_hash = hash_password(&admin.password)
            .map_err(|e| anyhow::anyhow!("failed to hash admin password: {e}"))?;
        store
            .create_user(NewUser {
                id: Some(RESERVED_ID),
                login: admin.login.clone(),
                name: admin.name.clone(),
                password_hash,
                email_address: admin.email_address.clone(),
                role_ids: vec![ADMIN_ROLE_ID, USER_ROLE_ID],
            })
            .await
            .context("failed to create admin user")?;
    }

    for role_id in [ADMIN_ROLE_ID, USER_ROLE_ID] {
        match store.add_role_to_user(RESERVED_ID, role_id).await {
            Ok(()) | Err(StoreError::AlreadyHasRole { .. }) => {}
            Err(e) => return Err(e).context("failed to bind reserved roles"),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicySet;

    fn roles(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_admin_policies() {
        let policy = PolicySet::compile(&admin_policies());
        assert_eq!(policy.len(), 6);

        assert!(policy.check("POST", "/api/v0/login", None).allowed);
        assert!(policy.check("GET", "/api/v0/apps", None).allowed);
        assert!(policy.check("GET", "/favicon.ico", None).allowed);
        assert!(!policy.check("GET", "/api/v0/users", None).allowed);
        assert!(!policy.check("POST", "/api/v0/apps", Some(&roles(&["user"]))).allowed);
        assert!(policy.check("POST", "/api/v0/apps", Some(&roles(&["admin"]))).allowed);
        assert!(policy.check("DELETE", "/api/v0/users/7", Some(&roles(&["admin"]))).allowed);
    }

    #[test]
    fn test_random_secret_is_hex() {
        let a = random_secret();
        let b = random_secret();

        assert_eq!(a.len(), 64);
        assert!(hex::decode(&a).is_ok());
        assert_ne!(a, b);
    }
}
